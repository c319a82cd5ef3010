use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, author_join, live_author_columns},
    counters,
    db::text_enum,
    error::{AppError, AppResult},
    utils::{PageQuery, Paginated},
};

text_enum! {
    pub enum ActivityStatus {
        Draft => "draft",
        Published => "published",
        Cancelled => "cancelled",
        Completed => "completed",
    }
}

impl ActivityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivityStatus::Cancelled | ActivityStatus::Completed)
    }

    pub fn allowed_next(&self) -> &'static [ActivityStatus] {
        match self {
            ActivityStatus::Draft => &[ActivityStatus::Published, ActivityStatus::Cancelled],
            ActivityStatus::Published => &[ActivityStatus::Cancelled, ActivityStatus::Completed],
            ActivityStatus::Cancelled | ActivityStatus::Completed => &[],
        }
    }

    /// 状态迁移校验；完成需要活动已经结束
    pub fn check_transition(self, to: ActivityStatus, end_time: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<()> {
        if !self.allowed_next().contains(&to) {
            return Err(AppError::bad_request(format!(
                "活动状态不能从 {} 变更为 {}",
                self, to
            )));
        }
        if to == ActivityStatus::Completed && end_time > now {
            return Err(AppError::bad_request("活动尚未结束，不能标记为已完成"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Activity {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_participants: i32,
    pub organizer_user_id: Option<i64>,
    pub organizer_display: String,
    pub tags: Vec<String>,
    pub status: ActivityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 活动及其从预约行实时统计出的人数
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub activity: Activity,
    pub current_participants: i64,
    pub available_spots: i64,
}

static ACTIVITY_VIEW_SELECT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT a.id, a.title, a.description, a.location, a.start_time, a.end_time, a.max_participants, \
         {}, a.tags, a.status, a.created_at, a.updated_at, \
         bc.booked AS current_participants, GREATEST(a.max_participants - bc.booked, 0) AS available_spots \
         FROM activities a {} \
         CROSS JOIN LATERAL (SELECT COUNT(*) AS booked FROM activity_bookings b \
             WHERE b.activity_id = a.id AND b.status = 'booked') bc",
        live_author_columns("a", "organizer_user_id", "organizer_display", None),
        author_join("a", "organizer_user_id"),
    )
});

const ACTIVITY_COLUMNS: &str = "id, title, description, location, start_time, end_time, max_participants, \
     organizer_user_id, organizer_display, tags, status, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateActivityRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub max_participants: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: Option<ActivityStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateActivityRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub max_participants: Option<i32>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ActivityStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityListQuery {
    pub status: Option<ActivityStatus>,
    pub organizer_user_id: Option<i64>,
    pub keyword: Option<String>,
    pub tag: Option<String>,
    pub start_from: Option<DateTime<Utc>>,
    pub start_to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

text_enum! {
    pub enum MyActivityRole {
        Organizer => "organizer",
        Participant => "participant",
        All => "all",
    }
}

#[derive(Debug, Deserialize)]
pub struct MyActivitiesQuery {
    pub role: Option<MyActivityRole>,
    pub status: Option<ActivityStatus>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct Availability {
    pub activity_id: i64,
    pub status: ActivityStatus,
    pub bookable: bool,
    pub reason: Option<String>,
    pub booked_count: i64,
    pub max_participants: i32,
    pub available_spots: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusFlow {
    pub status: ActivityStatus,
    pub next: &'static [ActivityStatus],
    pub terminal: bool,
}

#[derive(Debug, Serialize, FromRow)]
pub struct OrganizerSummary {
    pub total_activities: i64,
    pub draft_count: i64,
    pub published_count: i64,
    pub cancelled_count: i64,
    pub completed_count: i64,
    pub total_bookings: i64,
    pub booked_count: i64,
    pub attended_count: i64,
}

/// 不可预约的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotBookable {
    NotPublished(ActivityStatus),
    Ended,
    Full,
}

impl NotBookable {
    pub fn reason(&self) -> String {
        match self {
            NotBookable::NotPublished(ActivityStatus::Draft) => "活动尚未发布".to_string(),
            NotBookable::NotPublished(ActivityStatus::Cancelled) => "活动已取消".to_string(),
            NotBookable::NotPublished(ActivityStatus::Completed) => "活动已完成".to_string(),
            NotBookable::NotPublished(status) => format!("活动状态为 {}，不可预约", status),
            NotBookable::Ended => "活动已结束".to_string(),
            NotBookable::Full => "活动名额已满".to_string(),
        }
    }
}

impl From<NotBookable> for AppError {
    fn from(value: NotBookable) -> Self {
        match value {
            NotBookable::Ended => AppError::Expired(value.reason()),
            NotBookable::Full => AppError::CapacityExceeded(value.reason()),
            NotBookable::NotPublished(_) => AppError::BadRequest(value.reason()),
        }
    }
}

/// 可预约检查：已发布、未结束、仍有名额
pub fn check_bookable(activity: &Activity, booked: i64, now: DateTime<Utc>) -> Result<(), NotBookable> {
    if activity.status != ActivityStatus::Published {
        return Err(NotBookable::NotPublished(activity.status));
    }
    if activity.end_time <= now {
        return Err(NotBookable::Ended);
    }
    if booked >= activity.max_participants as i64 {
        return Err(NotBookable::Full);
    }
    Ok(())
}

pub fn validate_new_activity(req: &CreateActivityRequest, now: DateTime<Utc>) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    if req.title.trim().is_empty() {
        return Err(AppError::bad_request("活动标题不能为空"));
    }
    let (Some(start), Some(end)) = (req.start_time, req.end_time) else {
        return Err(AppError::bad_request("开始时间和结束时间不能为空"));
    };
    if start >= end {
        return Err(AppError::bad_request("开始时间必须早于结束时间"));
    }
    if start < now {
        return Err(AppError::bad_request("开始时间不能早于当前时间"));
    }
    if req.max_participants <= 0 {
        return Err(AppError::bad_request("最大参与人数必须大于0"));
    }
    if let Some(status) = req.status {
        if !matches!(status, ActivityStatus::Draft | ActivityStatus::Published) {
            return Err(AppError::bad_request("新活动只能是草稿或已发布状态"));
        }
    }
    Ok((start, end))
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// 锁定活动行，后续预约人数统计在锁内进行
pub async fn lock_activity(conn: &mut PgConnection, id: i64) -> AppResult<Activity> {
    sqlx::query_as::<_, Activity>(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found("活动不存在"))
}

pub async fn load_activity(conn: &mut PgConnection, id: i64) -> AppResult<Activity> {
    sqlx::query_as::<_, Activity>(&format!("SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("活动不存在"))
}

fn ensure_organizer(activity: &Activity, user_id: i64) -> AppResult<()> {
    if activity.organizer_user_id == Some(user_id) {
        Ok(())
    } else {
        Err(AppError::forbidden("只有活动发布者可以管理该活动"))
    }
}

/// 校验调用者是活动发布者，返回活动
pub async fn require_organizer(pool: &PgPool, activity_id: i64, user_id: i64) -> AppResult<Activity> {
    let mut conn = pool.acquire().await?;
    let activity = load_activity(&mut conn, activity_id).await?;
    ensure_organizer(&activity, user_id)?;
    Ok(activity)
}

impl Activity {
    pub async fn create(pool: &PgPool, organizer_id: i64, req: CreateActivityRequest) -> AppResult<ActivityView> {
        let (start, end) = validate_new_activity(&req, Utc::now())?;

        let mut tx = pool.begin().await?;
        let (_, author) = authorship::resolve_active(&mut tx, organizer_id).await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO activities
                (title, description, location, start_time, end_time, max_participants,
                 organizer_user_id, organizer_display, tags, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(req.title.trim())
        .bind(req.description.trim())
        .bind(req.location.trim())
        .bind(start)
        .bind(end)
        .bind(req.max_participants)
        .bind(author.user_id)
        .bind(&author.display)
        .bind(clean_tags(req.tags))
        .bind(req.status.unwrap_or(ActivityStatus::Draft))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("用户 {} 创建活动 {}", organizer_id, id);

        Self::find(pool, id)
            .await?
            .ok_or_else(|| AppError::Internal("新建活动读取失败".into()))
    }

    pub async fn find(pool: &PgPool, id: i64) -> AppResult<Option<ActivityView>> {
        let view = sqlx::query_as::<_, ActivityView>(&format!("{} WHERE a.id = $1", *ACTIVITY_VIEW_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(view)
    }

    pub async fn list(pool: &PgPool, query: &ActivityListQuery) -> AppResult<Paginated<ActivityView>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", k));
        let filter = "($1::TEXT IS NULL OR a.status = $1) \
             AND ($2::BIGINT IS NULL OR a.organizer_user_id = $2) \
             AND ($3::TEXT IS NULL OR a.title LIKE $3 OR a.description LIKE $3 OR a.location LIKE $3) \
             AND ($4::TEXT IS NULL OR $4 = ANY(a.tags)) \
             AND ($5::TIMESTAMPTZ IS NULL OR a.start_time >= $5) \
             AND ($6::TIMESTAMPTZ IS NULL OR a.start_time <= $6)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM activities a WHERE {filter}"))
            .bind(query.status)
            .bind(query.organizer_user_id)
            .bind(&keyword)
            .bind(&query.tag)
            .bind(query.start_from)
            .bind(query.start_to)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, ActivityView>(&format!(
            "{} WHERE {filter} ORDER BY a.updated_at DESC, a.id DESC LIMIT $7 OFFSET $8",
            *ACTIVITY_VIEW_SELECT
        ))
        .bind(query.status)
        .bind(query.organizer_user_id)
        .bind(&keyword)
        .bind(&query.tag)
        .bind(query.start_from)
        .bind(query.start_to)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn update(pool: &PgPool, user_id: i64, id: i64, req: UpdateActivityRequest) -> AppResult<ActivityView> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        let current = lock_activity(&mut tx, id).await?;
        ensure_organizer(&current, user_id)?;

        if current.status.is_terminal() {
            return Err(AppError::bad_request("已取消或已完成的活动不能修改"));
        }

        let title = match req.title {
            Some(t) if t.trim().is_empty() => return Err(AppError::bad_request("活动标题不能为空")),
            Some(t) => t.trim().to_string(),
            None => current.title.clone(),
        };
        let start = req.start_time.unwrap_or(current.start_time);
        let end = req.end_time.unwrap_or(current.end_time);
        if start >= end {
            return Err(AppError::bad_request("开始时间必须早于结束时间"));
        }

        let max_participants = req.max_participants.unwrap_or(current.max_participants);
        if max_participants <= 0 {
            return Err(AppError::bad_request("最大参与人数必须大于0"));
        }
        if max_participants < current.max_participants {
            let booked = counters::booked_count(&mut tx, id).await?;
            if (max_participants as i64) < booked {
                return Err(AppError::bad_request(format!(
                    "最大参与人数不能少于当前已预约人数({})",
                    booked
                )));
            }
        }

        let status = match req.status {
            Some(next) if next != current.status => {
                current.status.check_transition(next, end, now)?;
                next
            }
            _ => current.status,
        };

        sqlx::query(
            r#"
            UPDATE activities
            SET title = $2, description = $3, location = $4, start_time = $5, end_time = $6,
                max_participants = $7, tags = $8, status = $9, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&title)
        .bind(req.description.as_deref().map(str::trim).unwrap_or(&current.description))
        .bind(req.location.as_deref().map(str::trim).unwrap_or(&current.location))
        .bind(start)
        .bind(end)
        .bind(max_participants)
        .bind(req.tags.map(clean_tags).unwrap_or_else(|| current.tags.clone()))
        .bind(status)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        if status != current.status {
            tracing::info!("活动 {} 状态 {} -> {}", id, current.status, status);
        }

        Self::find(pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("活动不存在"))
    }

    pub async fn transition(pool: &PgPool, user_id: i64, id: i64, to: ActivityStatus) -> AppResult<ActivityView> {
        let mut tx = pool.begin().await?;
        let current = lock_activity(&mut tx, id).await?;
        ensure_organizer(&current, user_id)?;
        current.status.check_transition(to, current.end_time, Utc::now())?;

        sqlx::query("UPDATE activities SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(to)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!("活动 {} 状态 {} -> {}", id, current.status, to);

        Self::find(pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("活动不存在"))
    }

    /// 删除即取消；仍有有效预约时拒绝
    pub async fn delete(pool: &PgPool, user_id: i64, id: i64) -> AppResult<ActivityView> {
        let mut tx = pool.begin().await?;
        let current = lock_activity(&mut tx, id).await?;
        ensure_organizer(&current, user_id)?;

        let booked = counters::booked_count(&mut tx, id).await?;
        if booked > 0 {
            return Err(AppError::bad_request(format!(
                "活动还有 {} 个有效预约，无法删除",
                booked
            )));
        }

        if current.status != ActivityStatus::Cancelled {
            current
                .status
                .check_transition(ActivityStatus::Cancelled, current.end_time, Utc::now())?;
            sqlx::query("UPDATE activities SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!("活动 {} 已被发布者 {} 删除（取消）", id, user_id);

        Self::find(pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("活动不存在"))
    }

    pub async fn availability(pool: &PgPool, id: i64) -> AppResult<Availability> {
        let mut conn = pool.acquire().await?;
        let activity = load_activity(&mut conn, id).await?;
        let booked = counters::booked_count(&mut conn, id).await?;
        let verdict = check_bookable(&activity, booked, Utc::now());

        Ok(Availability {
            activity_id: id,
            status: activity.status,
            bookable: verdict.is_ok(),
            reason: verdict.err().map(|r| r.reason()),
            booked_count: booked,
            max_participants: activity.max_participants,
            available_spots: (activity.max_participants as i64 - booked).max(0),
        })
    }

    pub async fn my_activities(
        pool: &PgPool,
        user_id: i64,
        account: &str,
        query: &MyActivitiesQuery,
    ) -> AppResult<Paginated<ActivityView>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let role = query.role.unwrap_or(MyActivityRole::All);
        let as_organizer = matches!(role, MyActivityRole::Organizer | MyActivityRole::All);
        let as_participant = matches!(role, MyActivityRole::Participant | MyActivityRole::All);

        let filter = "(($1 AND a.organizer_user_id = $3) \
              OR ($2 AND EXISTS(SELECT 1 FROM activity_bookings mb WHERE mb.activity_id = a.id \
                  AND mb.user_account = $4 AND mb.status IN ('booked', 'attended')))) \
             AND ($5::TEXT IS NULL OR a.status = $5)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM activities a WHERE {filter}"))
            .bind(as_organizer)
            .bind(as_participant)
            .bind(user_id)
            .bind(account)
            .bind(query.status)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, ActivityView>(&format!(
            "{} WHERE {filter} ORDER BY a.start_time DESC, a.id DESC LIMIT $6 OFFSET $7",
            *ACTIVITY_VIEW_SELECT
        ))
        .bind(as_organizer)
        .bind(as_participant)
        .bind(user_id)
        .bind(account)
        .bind(query.status)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn organizer_summary(pool: &PgPool, user_id: i64) -> AppResult<OrganizerSummary> {
        let summary = sqlx::query_as::<_, OrganizerSummary>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM activities WHERE organizer_user_id = $1) AS total_activities,
                (SELECT COUNT(*) FROM activities WHERE organizer_user_id = $1 AND status = 'draft') AS draft_count,
                (SELECT COUNT(*) FROM activities WHERE organizer_user_id = $1 AND status = 'published') AS published_count,
                (SELECT COUNT(*) FROM activities WHERE organizer_user_id = $1 AND status = 'cancelled') AS cancelled_count,
                (SELECT COUNT(*) FROM activities WHERE organizer_user_id = $1 AND status = 'completed') AS completed_count,
                (SELECT COUNT(*) FROM activity_bookings b JOIN activities a ON a.id = b.activity_id
                    WHERE a.organizer_user_id = $1) AS total_bookings,
                (SELECT COUNT(*) FROM activity_bookings b JOIN activities a ON a.id = b.activity_id
                    WHERE a.organizer_user_id = $1 AND b.status = 'booked') AS booked_count,
                (SELECT COUNT(*) FROM activity_bookings b JOIN activities a ON a.id = b.activity_id
                    WHERE a.organizer_user_id = $1 AND b.status = 'attended') AS attended_count
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(summary)
    }
}

pub fn status_flow() -> Vec<StatusFlow> {
    ActivityStatus::ALL
        .iter()
        .map(|s| StatusFlow {
            status: *s,
            next: s.allowed_next(),
            terminal: s.is_terminal(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn activity(status: ActivityStatus, end_offset_hours: i64, max: i32) -> Activity {
        let now = Utc::now();
        Activity {
            id: 1,
            title: "读书会".into(),
            description: String::new(),
            location: String::new(),
            start_time: now + Duration::hours(end_offset_hours - 2),
            end_time: now + Duration::hours(end_offset_hours),
            max_participants: max,
            organizer_user_id: Some(1),
            organizer_display: "组织者（组织用户）".into(),
            tags: vec![],
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn allowed_transitions() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        let future = now + Duration::hours(1);
        use ActivityStatus::*;

        assert!(Draft.check_transition(Published, future, now).is_ok());
        assert!(Draft.check_transition(Cancelled, future, now).is_ok());
        assert!(Published.check_transition(Cancelled, future, now).is_ok());
        assert!(Published.check_transition(Completed, past, now).is_ok());
    }

    #[test]
    fn rejected_transitions() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        let future = now + Duration::hours(1);
        use ActivityStatus::*;

        assert!(Draft.check_transition(Completed, past, now).is_err());
        assert!(Published.check_transition(Draft, future, now).is_err());
        assert!(Cancelled.check_transition(Published, future, now).is_err());
        assert!(Completed.check_transition(Cancelled, past, now).is_err());
        // 未结束的活动不能完成
        let err = Published.check_transition(Completed, future, now).unwrap_err();
        assert_eq!(err.kind(), "bad_request");
        // 结束时间恰好等于当前时间可以完成
        assert!(Published.check_transition(Completed, now, now).is_ok());
    }

    #[test]
    fn bookability_reasons() {
        let now = Utc::now();
        assert_eq!(
            check_bookable(&activity(ActivityStatus::Draft, 5, 2), 0, now),
            Err(NotBookable::NotPublished(ActivityStatus::Draft))
        );
        assert_eq!(
            check_bookable(&activity(ActivityStatus::Published, -1, 2), 0, now),
            Err(NotBookable::Ended)
        );
        assert_eq!(
            check_bookable(&activity(ActivityStatus::Published, 5, 2), 2, now),
            Err(NotBookable::Full)
        );
        assert!(check_bookable(&activity(ActivityStatus::Published, 5, 2), 1, now).is_ok());
    }

    #[test]
    fn not_bookable_maps_to_error_kinds() {
        assert_eq!(AppError::from(NotBookable::Full).kind(), "capacity_exceeded");
        assert_eq!(AppError::from(NotBookable::Ended).kind(), "expired");
        assert_eq!(
            AppError::from(NotBookable::NotPublished(ActivityStatus::Cancelled)).to_string(),
            "活动已取消"
        );
    }

    #[test]
    fn new_activity_validation() {
        let now = Utc::now();
        let mut req = CreateActivityRequest {
            title: "徒步".into(),
            description: String::new(),
            location: String::new(),
            start_time: Some(now + Duration::hours(1)),
            end_time: Some(now + Duration::hours(3)),
            max_participants: 10,
            tags: vec![],
            status: None,
        };
        assert!(validate_new_activity(&req, now).is_ok());

        req.start_time = Some(now - Duration::hours(1));
        assert!(validate_new_activity(&req, now).is_err());

        req.start_time = Some(now + Duration::hours(4));
        assert!(validate_new_activity(&req, now).is_err());

        req.start_time = Some(now + Duration::hours(1));
        req.max_participants = 0;
        assert!(validate_new_activity(&req, now).is_err());

        req.max_participants = 5;
        req.status = Some(ActivityStatus::Completed);
        assert!(validate_new_activity(&req, now).is_err());

        req.status = None;
        req.end_time = None;
        assert!(validate_new_activity(&req, now).is_err());
    }

    #[test]
    fn status_flow_lists_terminal_states() {
        let flow = status_flow();
        assert_eq!(flow.len(), 4);
        assert!(flow.iter().filter(|f| f.terminal).all(|f| f.next.is_empty()));
    }

    #[test]
    fn timestamps_serialise_with_z_suffix() {
        let a = activity(ActivityStatus::Published, 5, 2);
        let v = serde_json::to_value(&a).unwrap();
        assert!(v["start_time"].as_str().unwrap().ends_with('Z'));
        assert_eq!(v["status"], "published");
    }
}
