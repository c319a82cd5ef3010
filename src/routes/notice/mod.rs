mod handler;
mod model;

pub use handler::*;
pub use model::{
    CreateNoticeRequest, Notice, NoticeDetail, NoticeStatus, NoticeType, ReadStatistics, ReviewRequest,
    UpdateNoticeRequest, can_view, check_expiration, expiration_transition, read_rate, sweep_expiration,
    target_user_count, unread_count,
};
