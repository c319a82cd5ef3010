use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};

use crate::{
    AppState,
    db::with_deadline,
    error::ApiResult,
    middleware::Principal,
    utils::{Paginated, message_to_api_response, success_to_api_response},
};

use super::model::{
    CommentDeleted, CommentListQuery, CreateCommentRequest, CreateDiscussionRequest, Discussion, DiscussionComment,
    DiscussionDeleted, DiscussionListQuery, DiscussionSearchQuery, DiscussionView, NestedComments,
    UpdateCommentRequest, UpdateDiscussionRequest,
};

pub async fn create_discussion(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Json(req): Json<CreateDiscussionRequest>,
) -> ApiResult<Discussion> {
    let discussion = with_deadline(
        state.config.tx_timeout(),
        Discussion::create(&state.pool, principal.user_id, activity_id, req),
    )
    .await?;
    Ok(message_to_api_response("讨论发表成功", discussion))
}

pub async fn list_discussions(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
    Query(query): Query<DiscussionListQuery>,
) -> ApiResult<Paginated<DiscussionView>> {
    let page = Discussion::list(&state.pool, activity_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn search_discussions(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
    Query(query): Query<DiscussionSearchQuery>,
) -> ApiResult<Paginated<DiscussionView>> {
    let page = Discussion::search(&state.pool, activity_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn discussion_detail(
    State(state): State<AppState>,
    Path(discussion_id): Path<i64>,
) -> ApiResult<DiscussionView> {
    let discussion = Discussion::find(&state.pool, discussion_id).await?;
    Ok(success_to_api_response(discussion))
}

pub async fn update_discussion(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(discussion_id): Path<i64>,
    Json(req): Json<UpdateDiscussionRequest>,
) -> ApiResult<Discussion> {
    let discussion = with_deadline(
        state.config.tx_timeout(),
        Discussion::update(&state.pool, principal.user_id, discussion_id, req),
    )
    .await?;
    Ok(message_to_api_response("讨论更新成功", discussion))
}

pub async fn delete_discussion(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(discussion_id): Path<i64>,
) -> ApiResult<DiscussionDeleted> {
    let deleted = with_deadline(
        state.config.tx_timeout(),
        Discussion::delete(&state.pool, principal.user_id, discussion_id),
    )
    .await?;
    Ok(message_to_api_response("讨论删除成功，所有相关留言已删除", deleted))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(discussion_id): Path<i64>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<DiscussionComment> {
    let comment = with_deadline(
        state.config.tx_timeout(),
        DiscussionComment::create(&state.pool, principal.user_id, discussion_id, req),
    )
    .await?;
    Ok(message_to_api_response("留言发表成功", comment))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(discussion_id): Path<i64>,
    Query(query): Query<CommentListQuery>,
) -> ApiResult<Paginated<DiscussionComment>> {
    let page = DiscussionComment::list(&state.pool, discussion_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn nested_comments(
    State(state): State<AppState>,
    Path(discussion_id): Path<i64>,
) -> ApiResult<NestedComments> {
    let nested = DiscussionComment::nested(&state.pool, discussion_id).await?;
    Ok(success_to_api_response(nested))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(comment_id): Path<i64>,
    Json(req): Json<UpdateCommentRequest>,
) -> ApiResult<DiscussionComment> {
    let comment = with_deadline(
        state.config.tx_timeout(),
        DiscussionComment::update(&state.pool, principal.user_id, comment_id, req),
    )
    .await?;
    Ok(message_to_api_response("留言更新成功", comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(comment_id): Path<i64>,
) -> ApiResult<CommentDeleted> {
    let deleted = with_deadline(
        state.config.tx_timeout(),
        DiscussionComment::delete(&state.pool, principal.user_id, comment_id),
    )
    .await?;
    Ok(message_to_api_response("留言删除成功，子留言已保留", deleted))
}
