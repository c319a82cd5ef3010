mod handler;
mod model;

pub use handler::{
    activity_availability, activity_detail, activity_statistics, activity_status_flow, change_activity_status,
    create_activity, delete_activity, list_activities, my_activities, organizer_summary, update_activity,
};
pub use model::{
    Activity, ActivityStatus, ActivityView, CreateActivityRequest, NotBookable, UpdateActivityRequest,
    check_bookable, load_activity, lock_activity, require_organizer,
};
