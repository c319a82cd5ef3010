mod handler;
mod model;

pub use handler::{
    create_comment, create_discussion, delete_comment, delete_discussion, discussion_detail, list_comments,
    list_discussions, nested_comments, search_discussions, update_comment, update_discussion,
};
pub use model::{
    CommentDeleted, CommentNode, CreateCommentRequest, CreateDiscussionRequest, Discussion, DiscussionComment,
    DiscussionDeleted, DiscussionSort, UpdateCommentRequest, build_comment_tree,
};
