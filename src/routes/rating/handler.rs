use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use serde_json::{Value, json};

use crate::{
    AppState,
    db::with_deadline,
    error::ApiResult,
    middleware::Principal,
    utils::{Paginated, message_to_api_response, success_to_api_response},
};

use super::model::{ActivityRating, CreateRatingRequest, MyRatingItem, RatingListQuery, UpdateRatingRequest};

pub async fn create_rating(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Json(req): Json<CreateRatingRequest>,
) -> ApiResult<ActivityRating> {
    let rating = with_deadline(
        state.config.tx_timeout(),
        ActivityRating::create(&state.pool, principal.user_id, activity_id, req),
    )
    .await?;
    Ok(message_to_api_response("评分发表成功", rating))
}

pub async fn update_rating(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Json(req): Json<UpdateRatingRequest>,
) -> ApiResult<ActivityRating> {
    let rating = with_deadline(
        state.config.tx_timeout(),
        ActivityRating::update(&state.pool, principal.user_id, activity_id, req),
    )
    .await?;
    Ok(message_to_api_response("评分更新成功", rating))
}

pub async fn delete_rating(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
) -> ApiResult<Value> {
    let id = with_deadline(
        state.config.tx_timeout(),
        ActivityRating::delete(&state.pool, principal.user_id, activity_id),
    )
    .await?;
    Ok(message_to_api_response("评分删除成功", json!({ "rating_id": id })))
}

pub async fn activity_ratings(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
    Query(query): Query<RatingListQuery>,
) -> ApiResult<Paginated<ActivityRating>> {
    let page = ActivityRating::list_for_activity(&state.pool, activity_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn my_ratings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<RatingListQuery>,
) -> ApiResult<Paginated<MyRatingItem>> {
    let page = ActivityRating::mine(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}
