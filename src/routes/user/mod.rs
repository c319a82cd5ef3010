mod handler;
mod model;

pub use handler::{
    admin_delete_user, admin_list_users, admin_set_role, delete_account, login, me, register,
    update_profile,
};
pub use model::{DELETE_CONFIRMATION, DeletedUser, NewUser, SoftDeleteOutcome, User, has_admin_record};
