use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use serde_json::{Value, json};

use crate::{
    AppState,
    counters::{LikeOutcome, UnlikeOutcome},
    db::with_deadline,
    error::{ApiResult, AppError},
    middleware::Principal,
    utils::{Paginated, message_to_api_response, success_to_api_response},
};

use super::model::{
    ArticleDetail, ArticleListQuery, CreateArticleRequest, ReviewArticleRequest, ScienceArticle, UpdateArticleRequest,
};

pub async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ArticleListQuery>,
) -> ApiResult<Paginated<ScienceArticle>> {
    let page = ScienceArticle::list_published(&state.pool, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn public_article_detail(
    State(state): State<AppState>,
    Path(article_id): Path<i64>,
) -> ApiResult<ArticleDetail> {
    let article = ScienceArticle::find_published(&state.pool, article_id).await?;
    Ok(success_to_api_response(ArticleDetail {
        article,
        is_liked: false,
        visit: None,
    }))
}

pub async fn article_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
) -> ApiResult<ArticleDetail> {
    let detail = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::view(&state.pool, principal.user_id, article_id),
    )
    .await?;
    Ok(success_to_api_response(detail))
}

pub async fn my_articles(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ArticleListQuery>,
) -> ApiResult<Paginated<ScienceArticle>> {
    let page = ScienceArticle::mine(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn create_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateArticleRequest>,
) -> ApiResult<ScienceArticle> {
    let article = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::create(&state.pool, principal.user_id, principal.is_admin(), req),
    )
    .await?;
    Ok(message_to_api_response("文章创建成功", article))
}

pub async fn update_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
    Json(req): Json<UpdateArticleRequest>,
) -> ApiResult<ScienceArticle> {
    let article = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::update(&state.pool, principal.user_id, article_id, req),
    )
    .await?;
    Ok(message_to_api_response("文章更新成功", article))
}

pub async fn submit_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
) -> ApiResult<ScienceArticle> {
    let article = ScienceArticle::submit(&state.pool, principal.user_id, article_id).await?;
    Ok(message_to_api_response("已提交审核", article))
}

pub async fn delete_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
) -> ApiResult<Value> {
    let id = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::delete(&state.pool, principal.user_id, principal.is_admin(), article_id),
    )
    .await?;
    Ok(message_to_api_response("文章删除成功", json!({ "article_id": id })))
}

pub async fn like_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
) -> ApiResult<LikeOutcome> {
    let outcome = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::like(&state.pool, principal.user_id, article_id),
    )
    .await?;
    match outcome {
        LikeOutcome::Liked { .. } => Ok(message_to_api_response("点赞成功", outcome)),
        LikeOutcome::AlreadyLiked => Err(AppError::conflict("已经点过赞了")),
    }
}

pub async fn unlike_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
) -> ApiResult<UnlikeOutcome> {
    let outcome = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::unlike(&state.pool, principal.user_id, article_id),
    )
    .await?;
    match outcome {
        UnlikeOutcome::Unliked { .. } => Ok(message_to_api_response("取消点赞成功", outcome)),
        UnlikeOutcome::NotLiked => Err(AppError::conflict("尚未点赞")),
    }
}

// 管理端

pub async fn admin_list_articles(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ArticleListQuery>,
) -> ApiResult<Paginated<ScienceArticle>> {
    principal.require_admin()?;
    let page = ScienceArticle::admin_list(&state.pool, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn admin_article_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
) -> ApiResult<ScienceArticle> {
    principal.require_admin()?;
    let article = ScienceArticle::find(&state.pool, article_id).await?;
    Ok(success_to_api_response(article))
}

pub async fn review_article(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(article_id): Path<i64>,
    Json(req): Json<ReviewArticleRequest>,
) -> ApiResult<ScienceArticle> {
    principal.require_admin()?;
    let article = with_deadline(
        state.config.tx_timeout(),
        ScienceArticle::review(&state.pool, principal.user_id, article_id, req.approve),
    )
    .await?;
    let message = if req.approve { "文章已发布" } else { "文章已驳回" };
    Ok(message_to_api_response(message, article))
}
