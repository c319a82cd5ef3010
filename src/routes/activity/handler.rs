use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    db::with_deadline,
    error::{ApiResult, AppError},
    middleware::Principal,
    routes::{
        booking::{Booking, BookingStatistics, account_of},
        rating::{ActivityRating, RatingStatistics},
    },
    utils::{Paginated, message_to_api_response, success_to_api_response},
};

use super::model::{
    Activity, ActivityListQuery, ActivityStatus, ActivityView, Availability, CreateActivityRequest,
    MyActivitiesQuery, OrganizerSummary, StatusFlow, UpdateActivityRequest, require_organizer, status_flow,
};

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: ActivityStatus,
}

#[derive(Debug, Serialize)]
pub struct ActivityStatistics {
    pub activity_id: i64,
    pub activity_title: String,
    pub activity_status: ActivityStatus,
    pub booking_statistics: BookingStatistics,
    pub rating_statistics: RatingStatistics,
    pub generated_at: DateTime<Utc>,
}

pub async fn create_activity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateActivityRequest>,
) -> ApiResult<ActivityView> {
    let activity = with_deadline(
        state.config.tx_timeout(),
        Activity::create(&state.pool, principal.user_id, req),
    )
    .await?;
    Ok(message_to_api_response("活动创建成功", activity))
}

pub async fn list_activities(
    State(state): State<AppState>,
    Query(query): Query<ActivityListQuery>,
) -> ApiResult<Paginated<ActivityView>> {
    let page = Activity::list(&state.pool, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn activity_detail(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
) -> ApiResult<ActivityView> {
    let activity = Activity::find(&state.pool, activity_id)
        .await?
        .ok_or_else(|| AppError::not_found("活动不存在"))?;
    Ok(success_to_api_response(activity))
}

pub async fn update_activity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Json(req): Json<UpdateActivityRequest>,
) -> ApiResult<ActivityView> {
    let activity = with_deadline(
        state.config.tx_timeout(),
        Activity::update(&state.pool, principal.user_id, activity_id, req),
    )
    .await?;
    Ok(message_to_api_response("活动更新成功", activity))
}

pub async fn change_activity_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<ActivityView> {
    let activity = with_deadline(
        state.config.tx_timeout(),
        Activity::transition(&state.pool, principal.user_id, activity_id, req.status),
    )
    .await?;
    Ok(message_to_api_response("活动状态已更新", activity))
}

pub async fn delete_activity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
) -> ApiResult<ActivityView> {
    let activity = with_deadline(
        state.config.tx_timeout(),
        Activity::delete(&state.pool, principal.user_id, activity_id),
    )
    .await?;
    Ok(message_to_api_response("活动已删除", activity))
}

pub async fn activity_availability(
    State(state): State<AppState>,
    Path(activity_id): Path<i64>,
) -> ApiResult<Availability> {
    let availability = Activity::availability(&state.pool, activity_id).await?;
    Ok(success_to_api_response(availability))
}

pub async fn my_activities(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<MyActivitiesQuery>,
) -> ApiResult<Paginated<ActivityView>> {
    let account = {
        let mut conn = state.pool.acquire().await?;
        account_of(&mut conn, principal.user_id).await?
    };
    let page = Activity::my_activities(&state.pool, principal.user_id, &account, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn organizer_summary(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<OrganizerSummary> {
    let summary = Activity::organizer_summary(&state.pool, principal.user_id).await?;
    Ok(success_to_api_response(summary))
}

pub async fn activity_statistics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
) -> ApiResult<ActivityStatistics> {
    let activity = require_organizer(&state.pool, activity_id, principal.user_id).await?;
    let booking_statistics = Booking::statistics(&state.pool, activity_id).await?;
    let rating_statistics = ActivityRating::statistics(&state.pool, activity_id).await?;

    Ok(success_to_api_response(ActivityStatistics {
        activity_id,
        activity_title: activity.title,
        activity_status: activity.status,
        booking_statistics,
        rating_statistics,
        generated_at: Utc::now(),
    }))
}

pub async fn activity_status_flow() -> ApiResult<Vec<StatusFlow>> {
    Ok(success_to_api_response(status_flow()))
}
