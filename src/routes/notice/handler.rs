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

use super::model::{
    AdminNoticeQuery, AttachmentInput, CreateNoticeRequest, Notice, NoticeAttachment, NoticeDetail, NoticeListItem,
    NoticeListPage, NoticeListQuery, ReadStatistics, ReviewRequest, SweepReport, UpdateNoticeRequest,
};

pub async fn list_notices(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<NoticeListQuery>,
) -> ApiResult<NoticeListPage> {
    let page = with_deadline(state.config.tx_timeout(), Notice::list(&state.pool, principal.user_id, &query)).await?;
    Ok(success_to_api_response(page))
}

pub async fn notice_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<NoticeDetail> {
    let detail = with_deadline(
        state.config.tx_timeout(),
        Notice::detail(&state.pool, Some(principal.user_id), notice_id),
    )
    .await?;
    Ok(success_to_api_response(detail))
}

pub async fn mark_notice_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<Value> {
    let inserted = with_deadline(
        state.config.tx_timeout(),
        Notice::mark_read(&state.pool, principal.user_id, notice_id),
    )
    .await?;
    let message = if inserted { "已标记为已读" } else { "公告已读" };
    Ok(message_to_api_response(
        message,
        json!({ "notice_id": notice_id, "newly_marked": inserted }),
    ))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Value> {
    let count = with_deadline(state.config.tx_timeout(), Notice::mark_all(&state.pool, principal.user_id)).await?;
    Ok(message_to_api_response(
        format!("已标记 {} 条公告为已读", count),
        json!({ "marked_count": count }),
    ))
}

pub async fn notice_unread_count(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Value> {
    let count = with_deadline(state.config.tx_timeout(), Notice::unread_count(&state.pool, principal.user_id)).await?;
    Ok(success_to_api_response(json!({ "unread_count": count })))
}

pub async fn public_notices(
    State(state): State<AppState>,
    Query(query): Query<NoticeListQuery>,
) -> ApiResult<Paginated<NoticeListItem>> {
    let page = with_deadline(state.config.tx_timeout(), Notice::public_list(&state.pool, &query)).await?;
    Ok(success_to_api_response(page))
}

pub async fn public_notice_detail(State(state): State<AppState>, Path(notice_id): Path<i64>) -> ApiResult<NoticeDetail> {
    let detail = with_deadline(state.config.tx_timeout(), Notice::detail(&state.pool, None, notice_id)).await?;
    Ok(success_to_api_response(detail))
}

// 管理端

pub async fn admin_list_notices(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<AdminNoticeQuery>,
) -> ApiResult<Paginated<Notice>> {
    principal.require_admin()?;
    let page = with_deadline(state.config.tx_timeout(), Notice::admin_list(&state.pool, &query)).await?;
    Ok(success_to_api_response(page))
}

pub async fn admin_notice_detail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<NoticeDetail> {
    principal.require_admin()?;
    let detail = with_deadline(state.config.tx_timeout(), Notice::admin_detail(&state.pool, notice_id)).await?;
    Ok(success_to_api_response(detail))
}

pub async fn create_notice(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateNoticeRequest>,
) -> ApiResult<NoticeDetail> {
    principal.require_admin()?;
    let detail = with_deadline(
        state.config.tx_timeout(),
        Notice::create(&state.pool, principal.user_id, req),
    )
    .await?;
    Ok(message_to_api_response("公告创建成功", detail))
}

pub async fn update_notice(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
    Json(req): Json<UpdateNoticeRequest>,
) -> ApiResult<Notice> {
    principal.require_admin()?;
    let notice = with_deadline(
        state.config.tx_timeout(),
        Notice::update(&state.pool, principal.user_id, principal.role, notice_id, req),
    )
    .await?;
    Ok(message_to_api_response("公告更新成功", notice))
}

pub async fn submit_notice(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<Notice> {
    principal.require_admin()?;
    let notice = with_deadline(
        state.config.tx_timeout(),
        Notice::submit(&state.pool, principal.user_id, notice_id),
    )
    .await?;
    Ok(message_to_api_response("已提交审核", notice))
}

pub async fn review_notice(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Notice> {
    principal.require_admin()?;
    let notice = with_deadline(
        state.config.tx_timeout(),
        Notice::review(&state.pool, principal.user_id, notice_id, req),
    )
    .await?;
    Ok(message_to_api_response("审核完成", notice))
}

pub async fn toggle_notice_top(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<Notice> {
    principal.require_admin()?;
    let notice = with_deadline(state.config.tx_timeout(), Notice::toggle_top(&state.pool, notice_id)).await?;
    let message = if notice.is_top { "已置顶" } else { "已取消置顶" };
    Ok(message_to_api_response(message, notice))
}

pub async fn delete_notice(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<Value> {
    principal.require_admin()?;
    let anonymized = with_deadline(
        state.config.tx_timeout(),
        Notice::delete(&state.pool, principal.user_id, principal.role, notice_id),
    )
    .await?;
    Ok(message_to_api_response(
        "公告删除成功",
        json!({ "notice_id": notice_id, "anonymized_read_count": anonymized }),
    ))
}

pub async fn add_notice_attachment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
    Json(input): Json<AttachmentInput>,
) -> ApiResult<NoticeAttachment> {
    principal.require_admin()?;
    let attachment = with_deadline(
        state.config.tx_timeout(),
        Notice::add_attachment(&state.pool, principal.user_id, notice_id, input),
    )
    .await?;
    Ok(message_to_api_response("附件上传成功", attachment))
}

pub async fn notice_read_statistics(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(notice_id): Path<i64>,
) -> ApiResult<ReadStatistics> {
    principal.require_admin()?;
    let stats = Notice::read_statistics(&state.pool, notice_id).await?;
    Ok(success_to_api_response(stats))
}

pub async fn sweep_notices(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<SweepReport> {
    principal.require_admin()?;
    let report = with_deadline(state.config.tx_timeout(), Notice::sweep(&state.pool)).await?;
    Ok(success_to_api_response(report))
}
