mod handler;
mod model;

pub use handler::*;
pub use model::{
    CreatePostRequest, CreateReplyRequest, EntryDeleted, EntryStatus, Floor, FloorRequest, FloorView,
    ForumPageQuery, Post, PostListQuery, PostSort, PostStatus, Reply, floor_label, like, unlike,
};
