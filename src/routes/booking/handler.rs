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
    ActivityBookingsQuery, BatchRequest, BatchResult, BookRequest, Booking, BookingStatistics, MyBookingItem,
    MyBookingsQuery, UpdateBookingStatusRequest,
};

pub async fn book_activity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    body: Option<Json<BookRequest>>,
) -> ApiResult<Booking> {
    let notes = body.and_then(|Json(req)| req.notes);
    let booking = with_deadline(
        state.config.tx_timeout(),
        Booking::book(&state.pool, principal.user_id, activity_id, notes),
    )
    .await?;
    Ok(message_to_api_response("预约成功", booking))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
) -> ApiResult<Booking> {
    let booking = with_deadline(
        state.config.tx_timeout(),
        Booking::cancel(&state.pool, principal.user_id, activity_id),
    )
    .await?;
    Ok(message_to_api_response("取消预约成功", booking))
}

pub async fn my_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<MyBookingsQuery>,
) -> ApiResult<Paginated<MyBookingItem>> {
    let page = Booking::my_bookings(&state.pool, principal.user_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn booking_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(booking_id): Path<i64>,
) -> ApiResult<Booking> {
    let booking = Booking::detail(&state.pool, principal.user_id, booking_id).await?;
    Ok(success_to_api_response(booking))
}

pub async fn activity_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Query(query): Query<ActivityBookingsQuery>,
) -> ApiResult<Paginated<Booking>> {
    let page = Booking::list_for_activity(&state.pool, principal.user_id, activity_id, &query).await?;
    Ok(success_to_api_response(page))
}

pub async fn update_booking_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((activity_id, booking_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateBookingStatusRequest>,
) -> ApiResult<Booking> {
    let booking = with_deadline(
        state.config.tx_timeout(),
        Booking::update_status(&state.pool, principal.user_id, activity_id, booking_id, req),
    )
    .await?;
    Ok(message_to_api_response("预约状态已更新", booking))
}

pub async fn delete_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((activity_id, booking_id)): Path<(i64, i64)>,
) -> ApiResult<Booking> {
    let booking = with_deadline(
        state.config.tx_timeout(),
        Booking::delete(&state.pool, principal.user_id, activity_id, booking_id),
    )
    .await?;
    Ok(message_to_api_response("预约记录已删除", booking))
}

pub async fn batch_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<BatchResult> {
    let result = with_deadline(
        state.config.tx_timeout(),
        Booking::batch(&state.pool, principal.user_id, activity_id, req),
    )
    .await?;
    let message = if result.committed {
        format!("批量操作完成，成功 {} 条", result.success_count)
    } else {
        "批量操作全部失败，未做任何修改".to_string()
    };
    Ok(message_to_api_response(message, result))
}

pub async fn booking_statistics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(activity_id): Path<i64>,
) -> ApiResult<BookingStatistics> {
    crate::routes::activity::require_organizer(&state.pool, activity_id, principal.user_id).await?;
    let stats = Booking::statistics(&state.pool, activity_id).await?;
    Ok(success_to_api_response(stats))
}
