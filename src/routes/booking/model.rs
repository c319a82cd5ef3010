use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    counters,
    db::text_enum,
    error::{AppError, AppResult},
    routes::activity::{ActivityStatus, check_bookable, load_activity, lock_activity, require_organizer},
    utils::{PageQuery, Paginated},
};

text_enum! {
    pub enum BookingStatus {
        Booked => "booked",
        Cancelled => "cancelled",
        Attended => "attended",
        Absent => "absent",
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Booking {
    pub id: i64,
    pub activity_id: i64,
    pub user_account: String,
    pub booking_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

const BOOKING_COLUMNS: &str = "id, activity_id, user_account, booking_time, status, notes, updated_at";

/// 对已有预约记录的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingDecision {
    Insert,
    Reactivate,
    AlreadyBooked,
    CannotRebook,
}

pub fn decide_booking(existing: Option<BookingStatus>) -> BookingDecision {
    match existing {
        None => BookingDecision::Insert,
        Some(BookingStatus::Booked) => BookingDecision::AlreadyBooked,
        Some(BookingStatus::Cancelled) => BookingDecision::Reactivate,
        Some(BookingStatus::Attended | BookingStatus::Absent) => BookingDecision::CannotRebook,
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BookRequest {
    pub notes: Option<String>,
}

text_enum! {
    /// 「我的预约」在活动状态过滤后的总数口径
    pub enum TotalScope {
        Filtered => "filtered",
        Unfiltered => "unfiltered",
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MyBookingsQuery {
    pub status: Option<BookingStatus>,
    pub activity_status: Option<ActivityStatus>,
    pub total_scope: Option<TotalScope>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MyBookingItem {
    pub id: i64,
    pub activity_id: i64,
    pub activity_title: String,
    pub activity_location: String,
    pub activity_start_time: DateTime<Utc>,
    pub activity_end_time: DateTime<Utc>,
    pub activity_max_participants: i32,
    pub activity_current_participants: i64,
    pub activity_organizer_display: String,
    pub activity_tags: Vec<String>,
    pub activity_status: ActivityStatus,
    pub booking_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityBookingsQuery {
    pub status: Option<BookingStatus>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
    pub notes: Option<String>,
}

text_enum! {
    pub enum BatchOperation {
        ConfirmAttendance => "confirm_attendance",
        MarkAbsent => "mark_absent",
        Cancel => "cancel",
    }
}

impl BatchOperation {
    pub fn target_status(&self) -> BookingStatus {
        match self {
            BatchOperation::ConfirmAttendance => BookingStatus::Attended,
            BatchOperation::MarkAbsent => BookingStatus::Absent,
            BatchOperation::Cancel => BookingStatus::Cancelled,
        }
    }

    /// 单条预约能否执行该批量操作
    pub fn check(&self, current: BookingStatus) -> Result<(), String> {
        let target = self.target_status();
        if current == target {
            return Err(format!("预约已经是 {} 状态", target));
        }
        let allowed = match self {
            BatchOperation::ConfirmAttendance => matches!(current, BookingStatus::Booked | BookingStatus::Absent),
            BatchOperation::MarkAbsent => matches!(current, BookingStatus::Booked | BookingStatus::Attended),
            BatchOperation::Cancel => current == BookingStatus::Booked,
        };
        if allowed {
            Ok(())
        } else {
            Err(format!("{} 状态的预约不能执行 {}", current, self))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operation: BatchOperation,
    pub booking_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRowError {
    pub booking_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub operation: BatchOperation,
    pub activity_id: i64,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<BatchRowError>,
    pub committed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingStatistics {
    pub activity_id: i64,
    pub max_participants: i32,
    pub total_bookings: i64,
    pub booked_count: i64,
    pub cancelled_count: i64,
    pub attended_count: i64,
    pub absent_count: i64,
    pub available_spots: i64,
    pub attendance_rate: f64,
}

#[derive(FromRow)]
struct BookingCounts {
    total: i64,
    booked: i64,
    cancelled: i64,
    attended: i64,
    absent: i64,
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// 出席率：出席数 / 预约总数（至少按 1 计）
pub fn attendance_rate(attended: i64, total: i64) -> f64 {
    round_to(attended as f64 / total.max(1) as f64 * 100.0, 2)
}

/// 当前登录用户的账号；预约按账号关联
pub async fn account_of(conn: &mut PgConnection, user_id: i64) -> AppResult<String> {
    sqlx::query_scalar("SELECT account FROM users WHERE id = $1 AND NOT is_deleted")
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::forbidden("用户不存在或已注销"))
}

impl Booking {
    /// 预约：先锁活动行再统计人数，取消过的记录原地恢复
    pub async fn book(pool: &PgPool, user_id: i64, activity_id: i64, notes: Option<String>) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let account = account_of(&mut tx, user_id).await?;
        let activity = lock_activity(&mut tx, activity_id).await?;

        let existing = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM activity_bookings WHERE activity_id = $1 AND user_account = $2 FOR UPDATE"
        ))
        .bind(activity_id)
        .bind(&account)
        .fetch_optional(&mut *tx)
        .await?;

        let decision = decide_booking(existing.as_ref().map(|b| b.status));
        match decision {
            BookingDecision::AlreadyBooked => return Err(AppError::conflict("您已经预约过该活动")),
            BookingDecision::CannotRebook => {
                return Err(AppError::conflict("该预约已签到或标记缺席，不能重新预约"));
            }
            BookingDecision::Insert | BookingDecision::Reactivate => {}
        }

        let booked = counters::booked_count(&mut tx, activity_id).await?;
        check_bookable(&activity, booked, Utc::now())?;

        let booking = match (decision, existing) {
            (BookingDecision::Reactivate, Some(previous)) => {
                sqlx::query_as::<_, Booking>(&format!(
                    "UPDATE activity_bookings SET status = 'booked', notes = NULL, updated_at = NOW() \
                     WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
                ))
                .bind(previous.id)
                .fetch_one(&mut *tx)
                .await?
            }
            _ => {
                sqlx::query_as::<_, Booking>(&format!(
                    "INSERT INTO activity_bookings (activity_id, user_account, status, notes) \
                     VALUES ($1, $2, 'booked', $3) RETURNING {BOOKING_COLUMNS}"
                ))
                .bind(activity_id)
                .bind(&account)
                .bind(notes.as_deref().map(str::trim).filter(|n| !n.is_empty()))
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        tracing::info!(
            "用户 {} 预约活动 {} 成功 (booking={}, {})",
            account,
            activity_id,
            booking.id,
            if decision == BookingDecision::Reactivate { "重新激活" } else { "新建" }
        );
        Ok(booking)
    }

    pub async fn cancel(pool: &PgPool, user_id: i64, activity_id: i64) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let account = account_of(&mut tx, user_id).await?;
        let activity = lock_activity(&mut tx, activity_id).await?;

        if activity.status == ActivityStatus::Completed {
            return Err(AppError::forbidden("活动已完成，无法取消预约"));
        }

        let booking = sqlx::query_as::<_, Booking>(&format!(
            "UPDATE activity_bookings SET status = 'cancelled', updated_at = NOW() \
             WHERE activity_id = $1 AND user_account = $2 AND status = 'booked' \
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(activity_id)
        .bind(&account)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("未找到有效的预约记录"))?;

        tx.commit().await?;
        tracing::info!("用户 {} 取消了活动 {} 的预约", account, activity_id);
        Ok(booking)
    }

    /// 我的预约；所有过滤都在 SQL 中完成，total 的口径由 `total_scope` 决定
    pub async fn my_bookings(pool: &PgPool, user_id: i64, query: &MyBookingsQuery) -> AppResult<Paginated<MyBookingItem>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let mut conn = pool.acquire().await?;
        let account = account_of(&mut conn, user_id).await?;

        let booking_filter = "b.user_account = $1 AND ($2::TEXT IS NULL OR b.status = $2)";
        let activity_filter = "($3::TEXT IS NULL OR a.status = $3)";

        let total: i64 = match query.total_scope.unwrap_or(TotalScope::Filtered) {
            TotalScope::Filtered => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM activity_bookings b JOIN activities a ON a.id = b.activity_id \
                     WHERE {booking_filter} AND {activity_filter}"
                ))
                .bind(&account)
                .bind(query.status)
                .bind(query.activity_status)
                .fetch_one(&mut *conn)
                .await?
            }
            TotalScope::Unfiltered => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM activity_bookings b WHERE {booking_filter}"
                ))
                .bind(&account)
                .bind(query.status)
                .fetch_one(&mut *conn)
                .await?
            }
        };

        let items = sqlx::query_as::<_, MyBookingItem>(&format!(
            r#"
            SELECT b.id, b.activity_id,
                   a.title AS activity_title, a.location AS activity_location,
                   a.start_time AS activity_start_time, a.end_time AS activity_end_time,
                   a.max_participants AS activity_max_participants,
                   (SELECT COUNT(*) FROM activity_bookings cb
                        WHERE cb.activity_id = a.id AND cb.status = 'booked') AS activity_current_participants,
                   a.organizer_display AS activity_organizer_display,
                   a.tags AS activity_tags, a.status AS activity_status,
                   b.booking_time, b.status, b.notes, b.updated_at
            FROM activity_bookings b
            JOIN activities a ON a.id = b.activity_id
            WHERE {booking_filter} AND {activity_filter}
            ORDER BY b.booking_time DESC, b.id DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(&account)
        .bind(query.status)
        .bind(query.activity_status)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(&mut *conn)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    /// 预约详情：预约者本人或活动发布者可见
    pub async fn detail(pool: &PgPool, user_id: i64, booking_id: i64) -> AppResult<Self> {
        let mut conn = pool.acquire().await?;
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM activity_bookings WHERE id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found("预约记录不存在"))?;

        let account: Option<String> = sqlx::query_scalar("SELECT account FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
        if account.as_deref() == Some(booking.user_account.as_str()) {
            return Ok(booking);
        }

        let activity = load_activity(&mut conn, booking.activity_id).await?;
        if activity.organizer_user_id != Some(user_id) {
            return Err(AppError::forbidden("无权限查看此预约记录"));
        }
        Ok(booking)
    }

    pub async fn list_for_activity(
        pool: &PgPool,
        organizer_id: i64,
        activity_id: i64,
        query: &ActivityBookingsQuery,
    ) -> AppResult<Paginated<Self>> {
        require_organizer(pool, activity_id, organizer_id).await?;
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activity_bookings WHERE activity_id = $1 AND ($2::TEXT IS NULL OR status = $2)",
        )
        .bind(activity_id)
        .bind(query.status)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM activity_bookings \
             WHERE activity_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY booking_time DESC, id DESC LIMIT $3 OFFSET $4"
        ))
        .bind(activity_id)
        .bind(query.status)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    /// 发布者直接设置单条预约状态；恢复为 booked 时同样受名额约束
    pub async fn update_status(
        pool: &PgPool,
        organizer_id: i64,
        activity_id: i64,
        booking_id: i64,
        req: UpdateBookingStatusRequest,
    ) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let activity = lock_activity(&mut tx, activity_id).await?;
        if activity.organizer_user_id != Some(organizer_id) {
            return Err(AppError::forbidden("只有活动发布者可以管理预约"));
        }

        let current = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM activity_bookings WHERE id = $1 AND activity_id = $2 FOR UPDATE"
        ))
        .bind(booking_id)
        .bind(activity_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("预约记录不存在"))?;

        if req.status == BookingStatus::Booked && current.status != BookingStatus::Booked {
            let booked = counters::booked_count(&mut tx, activity_id).await?;
            if booked >= activity.max_participants as i64 {
                return Err(AppError::CapacityExceeded("活动名额已满".into()));
            }
        }

        let booking = sqlx::query_as::<_, Booking>(&format!(
            "UPDATE activity_bookings SET status = $2, notes = COALESCE($3, notes), updated_at = NOW() \
             WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking_id)
        .bind(req.status)
        .bind(&req.notes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            "预约 {} 状态 {} -> {}，操作者 {}",
            booking_id,
            current.status,
            booking.status,
            organizer_id
        );
        Ok(booking)
    }

    pub async fn delete(pool: &PgPool, organizer_id: i64, activity_id: i64, booking_id: i64) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let activity = lock_activity(&mut tx, activity_id).await?;
        if activity.organizer_user_id != Some(organizer_id) {
            return Err(AppError::forbidden("无权限删除此预约记录"));
        }

        let booking = sqlx::query_as::<_, Booking>(&format!(
            "DELETE FROM activity_bookings WHERE id = $1 AND activity_id = $2 RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking_id)
        .bind(activity_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("预约记录不存在"))?;

        tx.commit().await?;
        tracing::info!("预约记录 {} 已被 {} 删除", booking_id, organizer_id);
        Ok(booking)
    }

    /// 批量操作逐行执行，逐行收集失败；至少一行成功才提交
    pub async fn batch(pool: &PgPool, organizer_id: i64, activity_id: i64, req: BatchRequest) -> AppResult<BatchResult> {
        if req.booking_ids.is_empty() {
            return Err(AppError::bad_request("预约ID列表不能为空"));
        }

        let mut tx = pool.begin().await?;
        let activity = lock_activity(&mut tx, activity_id).await?;
        if activity.organizer_user_id != Some(organizer_id) {
            return Err(AppError::forbidden("只有活动发布者可以管理预约"));
        }

        let target = req.operation.target_status();
        let mut success_count = 0;
        let mut errors = Vec::new();

        for booking_id in req.booking_ids {
            let current: Option<BookingStatus> = sqlx::query_scalar(
                "SELECT status FROM activity_bookings WHERE id = $1 AND activity_id = $2 FOR UPDATE",
            )
            .bind(booking_id)
            .bind(activity_id)
            .fetch_optional(&mut *tx)
            .await?;

            let outcome = match current {
                None => Err("预约记录不存在".to_string()),
                Some(status) => req.operation.check(status),
            };
            if let Err(message) = outcome {
                errors.push(BatchRowError { booking_id, message });
                continue;
            }

            sqlx::query("UPDATE activity_bookings SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(booking_id)
                .bind(target)
                .execute(&mut *tx)
                .await?;
            success_count += 1;
        }

        let committed = success_count > 0;
        if committed {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        tracing::info!(
            "活动 {} 批量 {}：成功 {}，失败 {}",
            activity_id,
            req.operation,
            success_count,
            errors.len()
        );

        Ok(BatchResult {
            operation: req.operation,
            activity_id,
            success_count,
            error_count: errors.len(),
            errors,
            committed,
        })
    }

    /// 预约统计，完全基于预约行重新计算
    pub async fn statistics(pool: &PgPool, activity_id: i64) -> AppResult<BookingStatistics> {
        let mut conn = pool.acquire().await?;
        let activity = load_activity(&mut conn, activity_id).await?;

        let counts = sqlx::query_as::<_, BookingCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'booked') AS booked,
                   COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                   COUNT(*) FILTER (WHERE status = 'attended') AS attended,
                   COUNT(*) FILTER (WHERE status = 'absent') AS absent
            FROM activity_bookings
            WHERE activity_id = $1
            "#,
        )
        .bind(activity_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(BookingStatistics {
            activity_id,
            max_participants: activity.max_participants,
            total_bookings: counts.total,
            booked_count: counts.booked,
            cancelled_count: counts.cancelled,
            attended_count: counts.attended,
            absent_count: counts.absent,
            available_spots: (activity.max_participants as i64 - counts.booked).max(0),
            attendance_rate: attendance_rate(counts.attended, counts.total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_decisions() {
        assert_eq!(decide_booking(None), BookingDecision::Insert);
        assert_eq!(decide_booking(Some(BookingStatus::Booked)), BookingDecision::AlreadyBooked);
        assert_eq!(decide_booking(Some(BookingStatus::Cancelled)), BookingDecision::Reactivate);
        assert_eq!(decide_booking(Some(BookingStatus::Attended)), BookingDecision::CannotRebook);
        assert_eq!(decide_booking(Some(BookingStatus::Absent)), BookingDecision::CannotRebook);
    }

    #[test]
    fn batch_operation_rules() {
        use BookingStatus::*;
        assert!(BatchOperation::ConfirmAttendance.check(Booked).is_ok());
        assert!(BatchOperation::ConfirmAttendance.check(Absent).is_ok());
        assert!(BatchOperation::ConfirmAttendance.check(Attended).is_err());
        assert!(BatchOperation::ConfirmAttendance.check(Cancelled).is_err());
        assert!(BatchOperation::MarkAbsent.check(Attended).is_ok());
        assert!(BatchOperation::Cancel.check(Booked).is_ok());
        assert!(BatchOperation::Cancel.check(Attended).is_err());
        assert_eq!(BatchOperation::MarkAbsent.target_status(), Absent);
    }

    #[test]
    fn attendance_rate_rounds_to_two_places() {
        assert_eq!(attendance_rate(0, 0), 0.0);
        assert_eq!(attendance_rate(1, 3), 33.33);
        assert_eq!(attendance_rate(2, 3), 66.67);
        assert_eq!(attendance_rate(4, 4), 100.0);
    }

    #[test]
    fn total_scope_parses_from_query_text() {
        assert_eq!("unfiltered".parse::<TotalScope>().unwrap(), TotalScope::Unfiltered);
        assert!("everything".parse::<TotalScope>().is_err());
    }
}
