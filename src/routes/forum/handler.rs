use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};

use crate::{
    AppState,
    counters::{LikeOutcome, LikeTarget, UnlikeOutcome},
    db::with_deadline,
    error::{ApiResult, AppError},
    middleware::Principal,
    utils::{Paginated, message_to_api_response, success_to_api_response},
};

use super::model::{
    self, CreatePostRequest, CreateReplyRequest, EntryDeleted, Floor, FloorRequest, FloorView, ForumPageQuery,
    LikeStatus, LikeStatusQuery, MyLike, Post, PostDetail, PostListQuery, PostStatusRequest, QuoteInfo,
    RecountReport, Reply, UpdatePostRequest, UpdateReplyRequest,
};

async fn do_like(state: &AppState, principal: &Principal, target: LikeTarget, id: i64) -> ApiResult<LikeOutcome> {
    let outcome = with_deadline(
        state.config.tx_timeout(),
        model::like(&state.pool, principal.user_id, target, id),
    )
    .await?;
    match outcome {
        LikeOutcome::Liked { .. } => Ok(message_to_api_response("点赞成功", outcome)),
        LikeOutcome::AlreadyLiked => Err(AppError::conflict("已经点过赞了")),
    }
}

async fn do_unlike(state: &AppState, principal: &Principal, target: LikeTarget, id: i64) -> ApiResult<UnlikeOutcome> {
    let outcome = with_deadline(
        state.config.tx_timeout(),
        model::unlike(&state.pool, principal.user_id, target, id),
    )
    .await?;
    match outcome {
        UnlikeOutcome::Unliked { .. } => Ok(message_to_api_response("取消点赞成功", outcome)),
        UnlikeOutcome::NotLiked => Err(AppError::conflict("尚未点赞")),
    }
}

// 帖子

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostListQuery>,
) -> ApiResult<Paginated<Post>> {
    let page = Post::list(&state.pool, &query, false).await?;
    Ok(success_to_api_response(page))
}

pub async fn public_post_detail(State(state): State<AppState>, Path(post_id): Path<i64>) -> ApiResult<PostDetail> {
    let post = Post::find_published(&state.pool, post_id).await?;
    Ok(success_to_api_response(PostDetail {
        post,
        is_liked: false,
        visit: None,
    }))
}

pub async fn post_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
) -> ApiResult<PostDetail> {
    let detail = with_deadline(
        state.config.tx_timeout(),
        Post::view(&state.pool, principal.user_id, post_id),
    )
    .await?;
    Ok(success_to_api_response(detail))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<Post> {
    let post = with_deadline(
        state.config.tx_timeout(),
        Post::create(&state.pool, principal.user_id, req),
    )
    .await?;
    Ok(message_to_api_response("帖子发布成功", post))
}

pub async fn update_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
    Json(req): Json<UpdatePostRequest>,
) -> ApiResult<Post> {
    let post = with_deadline(
        state.config.tx_timeout(),
        Post::update(&state.pool, principal.user_id, post_id, req),
    )
    .await?;
    Ok(message_to_api_response("帖子更新成功", post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
) -> ApiResult<EntryDeleted> {
    let deleted = with_deadline(
        state.config.tx_timeout(),
        Post::soft_delete(&state.pool, principal.user_id, post_id),
    )
    .await?;
    Ok(message_to_api_response("帖子删除成功", deleted))
}

pub async fn like_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
) -> ApiResult<LikeOutcome> {
    do_like(&state, &principal, LikeTarget::Post, post_id).await
}

pub async fn unlike_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
) -> ApiResult<UnlikeOutcome> {
    do_unlike(&state, &principal, LikeTarget::Post, post_id).await
}

// 楼层

pub async fn list_floors(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Query(query): Query<ForumPageQuery>,
) -> ApiResult<Paginated<FloorView>> {
    let page = Floor::list_for_post(&state.pool, post_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn floor_detail(State(state): State<AppState>, Path(floor_id): Path<i64>) -> ApiResult<Floor> {
    let floor = Floor::find(&state.pool, floor_id).await?;
    Ok(success_to_api_response(floor))
}

pub async fn create_floor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
    Json(req): Json<FloorRequest>,
) -> ApiResult<Floor> {
    let floor = with_deadline(
        state.config.tx_timeout(),
        Floor::create(&state.pool, principal.user_id, post_id, req),
    )
    .await?;
    Ok(message_to_api_response("楼层发布成功", floor))
}

pub async fn update_floor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(floor_id): Path<i64>,
    Json(req): Json<FloorRequest>,
) -> ApiResult<Floor> {
    let floor = with_deadline(
        state.config.tx_timeout(),
        Floor::update(&state.pool, principal.user_id, floor_id, req),
    )
    .await?;
    Ok(message_to_api_response("楼层更新成功", floor))
}

pub async fn delete_floor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(floor_id): Path<i64>,
) -> ApiResult<EntryDeleted> {
    let deleted = with_deadline(
        state.config.tx_timeout(),
        Floor::soft_delete(&state.pool, principal.user_id, floor_id),
    )
    .await?;
    Ok(message_to_api_response("楼层删除成功", deleted))
}

pub async fn like_floor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(floor_id): Path<i64>,
) -> ApiResult<LikeOutcome> {
    do_like(&state, &principal, LikeTarget::Floor, floor_id).await
}

pub async fn unlike_floor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(floor_id): Path<i64>,
) -> ApiResult<UnlikeOutcome> {
    do_unlike(&state, &principal, LikeTarget::Floor, floor_id).await
}

// 回复

pub async fn list_replies(
    State(state): State<AppState>,
    Path(floor_id): Path<i64>,
    Query(query): Query<ForumPageQuery>,
) -> ApiResult<Paginated<Reply>> {
    let page = Reply::list_for_floor(&state.pool, floor_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn reply_detail(State(state): State<AppState>, Path(reply_id): Path<i64>) -> ApiResult<Reply> {
    let reply = Reply::find(&state.pool, reply_id).await?;
    Ok(success_to_api_response(reply))
}

pub async fn reply_quote(State(state): State<AppState>, Path(reply_id): Path<i64>) -> ApiResult<QuoteInfo> {
    let info = Reply::quote_info(&state.pool, reply_id).await?;
    Ok(success_to_api_response(info))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(floor_id): Path<i64>,
    Json(req): Json<CreateReplyRequest>,
) -> ApiResult<Reply> {
    let reply = with_deadline(
        state.config.tx_timeout(),
        Reply::create(&state.pool, principal.user_id, floor_id, req),
    )
    .await?;
    Ok(message_to_api_response("回复发布成功", reply))
}

pub async fn update_reply(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reply_id): Path<i64>,
    Json(req): Json<UpdateReplyRequest>,
) -> ApiResult<Reply> {
    let reply = with_deadline(
        state.config.tx_timeout(),
        Reply::update(&state.pool, principal.user_id, reply_id, req),
    )
    .await?;
    Ok(message_to_api_response("回复更新成功", reply))
}

pub async fn delete_reply(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reply_id): Path<i64>,
) -> ApiResult<EntryDeleted> {
    let deleted = with_deadline(
        state.config.tx_timeout(),
        Reply::soft_delete(&state.pool, principal.user_id, reply_id),
    )
    .await?;
    Ok(message_to_api_response("回复删除成功", deleted))
}

pub async fn like_reply(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reply_id): Path<i64>,
) -> ApiResult<LikeOutcome> {
    do_like(&state, &principal, LikeTarget::Reply, reply_id).await
}

pub async fn unlike_reply(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reply_id): Path<i64>,
) -> ApiResult<UnlikeOutcome> {
    do_unlike(&state, &principal, LikeTarget::Reply, reply_id).await
}

// 我的

pub async fn like_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<LikeStatusQuery>,
) -> ApiResult<LikeStatus> {
    let status = model::like_status(&state.pool, principal.user_id, query.target_type, query.target_id).await?;
    Ok(success_to_api_response(status))
}

pub async fn my_posts(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ForumPageQuery>,
) -> ApiResult<Paginated<Post>> {
    let page = Post::mine(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn my_floors(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ForumPageQuery>,
) -> ApiResult<Paginated<Floor>> {
    let page = Floor::mine(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn my_replies(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ForumPageQuery>,
) -> ApiResult<Paginated<Reply>> {
    let page = Reply::mine(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn my_likes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ForumPageQuery>,
) -> ApiResult<Paginated<MyLike>> {
    let page = model::my_likes(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}

// 管理

pub async fn admin_list_posts(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<PostListQuery>,
) -> ApiResult<Paginated<Post>> {
    principal.require_admin()?;
    let page = Post::list(&state.pool, &query, true).await?;
    Ok(success_to_api_response(page))
}

pub async fn admin_set_post_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
    Json(req): Json<PostStatusRequest>,
) -> ApiResult<Post> {
    principal.require_admin()?;
    let post = Post::set_status(&state.pool, post_id, req.status).await?;
    Ok(message_to_api_response("帖子状态已更新", post))
}

pub async fn admin_delete_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
) -> ApiResult<EntryDeleted> {
    principal.require_admin()?;
    let deleted = with_deadline(state.config.tx_timeout(), Post::hard_delete(&state.pool, post_id)).await?;
    Ok(message_to_api_response("帖子已删除", deleted))
}

pub async fn admin_delete_floor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(floor_id): Path<i64>,
) -> ApiResult<EntryDeleted> {
    principal.require_admin()?;
    let deleted = with_deadline(state.config.tx_timeout(), Floor::hard_delete(&state.pool, floor_id)).await?;
    Ok(message_to_api_response("楼层已删除", deleted))
}

pub async fn admin_delete_reply(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reply_id): Path<i64>,
) -> ApiResult<EntryDeleted> {
    principal.require_admin()?;
    let deleted = with_deadline(state.config.tx_timeout(), Reply::hard_delete(&state.pool, reply_id)).await?;
    Ok(message_to_api_response("回复已删除", deleted))
}

pub async fn admin_recount_post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(post_id): Path<i64>,
) -> ApiResult<RecountReport> {
    principal.require_admin()?;
    let report = with_deadline(state.config.tx_timeout(), Post::recount(&state.pool, post_id)).await?;
    Ok(message_to_api_response("计数已重算", report))
}
