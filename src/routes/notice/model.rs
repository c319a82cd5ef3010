use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, Role},
    content,
    db::text_enum,
    error::{AppError, AppResult},
    routes::{booking::round_to, user::has_admin_record},
    utils::{PageQuery, Paginated},
};

pub const NOTICE_DELETED_DISPLAY: &str = "公告已删除";
const PREVIEW_CHARS: i32 = 200;

text_enum! {
    pub enum NoticeType {
        System => "SYSTEM",
        Admin => "ADMIN",
        General => "GENERAL",
        Activity => "ACTIVITY",
    }
}

impl NoticeType {
    /// ADMIN 是旧类型，只读，不再新建
    pub fn is_legacy(&self) -> bool {
        matches!(self, NoticeType::Admin)
    }

    pub fn visible_to(&self, is_admin: bool) -> bool {
        is_admin || !self.is_legacy()
    }
}

text_enum! {
    pub enum NoticeStatus {
        Draft => "DRAFT",
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Expired => "EXPIRED",
    }
}

/// 到期状态迁移：已发布且到期变为 EXPIRED；到期时间被推后则回到 APPROVED
pub fn expiration_transition(
    status: NoticeStatus,
    expiration: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<NoticeStatus> {
    let due = expiration.is_some_and(|e| e <= now);
    match status {
        NoticeStatus::Approved if due => Some(NoticeStatus::Expired),
        NoticeStatus::Expired if !due => Some(NoticeStatus::Approved),
        _ => None,
    }
}

/// 阅读统计的目标人数。管理员本身也是用户，SYSTEM 公告不重复计入
pub fn target_user_count(notice_type: NoticeType, user_count: i64, admin_count: i64) -> i64 {
    match notice_type {
        NoticeType::System | NoticeType::Activity | NoticeType::General => user_count,
        NoticeType::Admin => admin_count,
    }
}

pub fn read_rate(read_count: i64, target: i64) -> f64 {
    if target > 0 {
        round_to(read_count as f64 / target as f64 * 100.0, 2)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Notice {
    pub id: i64,
    pub release_title: String,
    pub release_notice: String,
    pub notice_type: NoticeType,
    pub status: NoticeStatus,
    pub is_top: bool,
    pub is_expired: bool,
    pub release_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub expiration: Option<DateTime<Utc>>,
    pub author_user_id: Option<i64>,
    pub author_display: String,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
}

const NOTICE_COLUMNS: &str = "id, release_title, release_notice, notice_type, status, is_top, is_expired, \
     release_time, update_time, expiration, author_user_id, author_display, reviewed_by, reviewed_at, review_comment";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NoticeAttachment {
    pub id: i64,
    pub notice_id: i64,
    pub uploader_user_id: Option<i64>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
    pub upload_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NoticeListItem {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub notice_type: NoticeType,
    pub is_top: bool,
    pub release_time: DateTime<Utc>,
    pub expiration: Option<DateTime<Utc>>,
    pub author_display: String,
    pub is_read: bool,
    pub attachment_count: i64,
}

#[derive(Debug, Serialize)]
pub struct NoticeListPage {
    #[serde(flatten)]
    pub page: Paginated<NoticeListItem>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct NoticeDetail {
    #[serde(flatten)]
    pub notice: Notice,
    pub attachments: Vec<NoticeAttachment>,
    pub is_read: bool,
    pub unread_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadStatistics {
    pub notice_id: i64,
    pub notice_title: String,
    pub notice_type: NoticeType,
    pub target_user_count: i64,
    pub read_count: i64,
    pub unread_count: i64,
    pub read_rate: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoticeListQuery {
    pub notice_type: Option<NoticeType>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminNoticeQuery {
    pub status: Option<NoticeStatus>,
    pub notice_type: Option<NoticeType>,
    pub keyword: Option<String>,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentInput {
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNoticeRequest {
    pub title: String,
    pub content: String,
    pub notice_type: NoticeType,
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_top: bool,
    pub status: Option<NoticeStatus>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNoticeRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub notice_type: Option<NoticeType>,
    pub expiration: Option<DateTime<Utc>>,
    pub is_top: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approve: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub expired: u64,
    pub restored: u64,
}

const ACTIVE: &str = "n.status = 'APPROVED' AND (n.expiration IS NULL OR n.expiration > NOW())";
const VISIBLE: &str = "($2 OR n.notice_type <> 'ADMIN')";

/// 列表读路径上的到期扫描，只处理已到期仍为 APPROVED 的公告（走 notices_overdue_idx）
pub async fn sweep_expiration(conn: &mut PgConnection) -> AppResult<u64> {
    let expired = sqlx::query(
        "UPDATE notices SET status = 'EXPIRED', is_expired = TRUE, update_time = NOW() \
         WHERE status = 'APPROVED' AND expiration IS NOT NULL AND expiration <= NOW()",
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if expired > 0 {
        tracing::info!("公告到期扫描：{} 条过期", expired);
    }
    Ok(expired)
}

/// 到期时间被推后的 EXPIRED 公告回到 APPROVED，仅管理端全量扫描使用
async fn restore_extended(conn: &mut PgConnection) -> AppResult<u64> {
    let restored = sqlx::query(
        "UPDATE notices SET status = 'APPROVED', is_expired = FALSE, update_time = NOW() \
         WHERE status = 'EXPIRED' AND (expiration IS NULL OR expiration > NOW())",
    )
    .execute(conn)
    .await?
    .rows_affected();
    Ok(restored)
}

/// 单条公告的到期检查，返回迁移后的状态
pub async fn check_expiration(conn: &mut PgConnection, notice_id: i64) -> AppResult<Option<NoticeStatus>> {
    let notice = lock_notice(conn, notice_id).await?;
    let Some(next) = expiration_transition(notice.status, notice.expiration, Utc::now()) else {
        return Ok(None);
    };

    sqlx::query("UPDATE notices SET status = $2, is_expired = $3, update_time = NOW() WHERE id = $1")
        .bind(notice_id)
        .bind(next)
        .bind(next == NoticeStatus::Expired)
        .execute(&mut *conn)
        .await?;
    tracing::info!("公告 {} 状态 {} -> {}", notice_id, notice.status, next);
    Ok(Some(next))
}

async fn lock_notice(conn: &mut PgConnection, id: i64) -> AppResult<Notice> {
    sqlx::query_as::<_, Notice>(&format!("SELECT {NOTICE_COLUMNS} FROM notices WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("公告不存在"))
}

async fn load_notice(conn: &mut PgConnection, id: i64) -> AppResult<Notice> {
    sqlx::query_as::<_, Notice>(&format!("SELECT {NOTICE_COLUMNS} FROM notices WHERE id = $1"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("公告不存在"))
}

async fn attachments_of(conn: &mut PgConnection, notice_id: i64) -> AppResult<Vec<NoticeAttachment>> {
    let attachments = sqlx::query_as::<_, NoticeAttachment>(
        "SELECT id, notice_id, uploader_user_id, file_name, file_path, file_size, file_type, upload_time \
         FROM notice_attachments WHERE notice_id = $1 ORDER BY id",
    )
    .bind(notice_id)
    .fetch_all(conn)
    .await?;
    Ok(attachments)
}

async fn insert_attachment(
    conn: &mut PgConnection,
    notice_id: i64,
    uploader: i64,
    input: &AttachmentInput,
) -> AppResult<NoticeAttachment> {
    if input.file_name.trim().is_empty() || input.file_path.trim().is_empty() {
        return Err(AppError::bad_request("附件信息不完整"));
    }
    if input.file_size < 0 {
        return Err(AppError::bad_request("附件大小无效"));
    }
    let attachment = sqlx::query_as::<_, NoticeAttachment>(
        "INSERT INTO notice_attachments (notice_id, uploader_user_id, file_name, file_path, file_size, file_type) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING id, notice_id, uploader_user_id, file_name, file_path, file_size, file_type, upload_time",
    )
    .bind(notice_id)
    .bind(uploader)
    .bind(input.file_name.trim())
    .bind(input.file_path.trim())
    .bind(input.file_size)
    .bind(input.file_type.trim())
    .fetch_one(conn)
    .await?;
    Ok(attachment)
}

/// 查看权限：不存在或未发布为 not_found，过期为 expired，旧 ADMIN 类型仅管理员可见
pub fn can_view(notice: &Notice, is_admin: bool, now: DateTime<Utc>) -> AppResult<()> {
    match notice.status {
        NoticeStatus::Approved => {}
        NoticeStatus::Expired => return Err(AppError::Expired("公告已过期".into())),
        _ => return Err(AppError::not_found("公告不存在或未发布")),
    }
    if notice.expiration.is_some_and(|e| e <= now) {
        return Err(AppError::Expired("公告已过期".into()));
    }
    if !notice.notice_type.visible_to(is_admin) {
        return Err(AppError::forbidden("无权限查看此类型公告"));
    }
    Ok(())
}

/// 未读数：可见的有效公告反连接本人的已读记录
pub async fn unread_count(conn: &mut PgConnection, user_id: i64, is_admin: bool) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM notices n \
         WHERE {ACTIVE} AND {VISIBLE} \
           AND NOT EXISTS (SELECT 1 FROM notice_reads r WHERE r.notice_id = n.id AND r.user_id = $1)"
    ))
    .bind(user_id)
    .bind(is_admin)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

impl Notice {
    /// 未读数的过滤条件本身排除了已到期公告，这里不做扫描
    pub async fn unread_count(pool: &PgPool, user_id: i64) -> AppResult<i64> {
        let mut conn = pool.acquire().await?;
        let is_admin = has_admin_record(&mut conn, user_id).await?;
        unread_count(&mut conn, user_id, is_admin).await
    }

    /// 用户公告列表：置顶优先、发布时间倒序，带已读标记和附件数
    pub async fn list(pool: &PgPool, user_id: i64, query: &NoticeListQuery) -> AppResult<NoticeListPage> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let mut tx = pool.begin().await?;
        sweep_expiration(&mut tx).await?;
        let is_admin = has_admin_record(&mut tx, user_id).await?;

        let filter = format!("{ACTIVE} AND {VISIBLE} AND ($3::TEXT IS NULL OR n.notice_type = $3)");
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notices n WHERE {filter}"))
            .bind(user_id)
            .bind(is_admin)
            .bind(query.notice_type)
            .fetch_one(&mut *tx)
            .await?;

        let items = sqlx::query_as::<_, NoticeListItem>(&format!(
            r#"
            SELECT n.id, n.release_title AS title,
                   CASE WHEN char_length(n.release_notice) > {PREVIEW_CHARS}
                        THEN LEFT(n.release_notice, {PREVIEW_CHARS}) || '...'
                        ELSE n.release_notice END AS content,
                   n.notice_type, n.is_top, n.release_time, n.expiration, n.author_display,
                   EXISTS (SELECT 1 FROM notice_reads r WHERE r.notice_id = n.id AND r.user_id = $1) AS is_read,
                   (SELECT COUNT(*) FROM notice_attachments a WHERE a.notice_id = n.id) AS attachment_count
            FROM notices n
            WHERE {filter}
            ORDER BY n.is_top DESC, n.release_time DESC, n.id DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(user_id)
        .bind(is_admin)
        .bind(query.notice_type)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(&mut *tx)
        .await?;

        let unread = unread_count(&mut tx, user_id, is_admin).await?;
        tx.commit().await?;

        Ok(NoticeListPage {
            page: Paginated::new(items, total, &paging),
            unread_count: unread,
        })
    }

    /// 公开列表，不含旧 ADMIN 类型，也没有已读信息
    pub async fn public_list(pool: &PgPool, query: &NoticeListQuery) -> AppResult<Paginated<NoticeListItem>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let mut tx = pool.begin().await?;
        sweep_expiration(&mut tx).await?;

        let filter = format!("{ACTIVE} AND n.notice_type <> 'ADMIN' AND ($1::TEXT IS NULL OR n.notice_type = $1)");
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notices n WHERE {filter}"))
            .bind(query.notice_type)
            .fetch_one(&mut *tx)
            .await?;

        let items = sqlx::query_as::<_, NoticeListItem>(&format!(
            r#"
            SELECT n.id, n.release_title AS title,
                   CASE WHEN char_length(n.release_notice) > {PREVIEW_CHARS}
                        THEN LEFT(n.release_notice, {PREVIEW_CHARS}) || '...'
                        ELSE n.release_notice END AS content,
                   n.notice_type, n.is_top, n.release_time, n.expiration, n.author_display,
                   FALSE AS is_read,
                   (SELECT COUNT(*) FROM notice_attachments a WHERE a.notice_id = n.id) AS attachment_count
            FROM notices n
            WHERE {filter}
            ORDER BY n.is_top DESC, n.release_time DESC, n.id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(query.notice_type)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Paginated::new(items, total, &paging))
    }

    /// 公告详情；`user_id` 存在时顺带标记已读
    pub async fn detail(pool: &PgPool, user_id: Option<i64>, notice_id: i64) -> AppResult<NoticeDetail> {
        let mut tx = pool.begin().await?;
        check_expiration(&mut tx, notice_id).await?;
        let notice = load_notice(&mut tx, notice_id).await?;
        let is_admin = match user_id {
            Some(id) => has_admin_record(&mut tx, id).await?,
            None => false,
        };
        if let Err(e) = can_view(&notice, is_admin, Utc::now()) {
            // 到期迁移需要落库
            tx.commit().await?;
            return Err(e);
        }

        let unread = match user_id {
            Some(id) => {
                insert_read(&mut tx, id, notice_id).await?;
                Some(unread_count(&mut tx, id, is_admin).await?)
            }
            None => None,
        };
        let attachments = attachments_of(&mut tx, notice_id).await?;
        tx.commit().await?;

        Ok(NoticeDetail {
            notice,
            attachments,
            is_read: user_id.is_some(),
            unread_count: unread,
        })
    }

    /// 重复标记不产生新记录；返回是否新插入
    pub async fn mark_read(pool: &PgPool, user_id: i64, notice_id: i64) -> AppResult<bool> {
        let mut tx = pool.begin().await?;
        check_expiration(&mut tx, notice_id).await?;
        let notice = load_notice(&mut tx, notice_id).await?;
        let is_admin = has_admin_record(&mut tx, user_id).await?;
        if let Err(e) = can_view(&notice, is_admin, Utc::now()) {
            tx.commit().await?;
            return Err(e);
        }

        let inserted = insert_read(&mut tx, user_id, notice_id).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn mark_all(pool: &PgPool, user_id: i64) -> AppResult<u64> {
        let mut tx = pool.begin().await?;
        let is_admin = has_admin_record(&mut tx, user_id).await?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO notice_reads (user_id, notice_id) \
             SELECT $1, n.id FROM notices n \
             WHERE {ACTIVE} AND {VISIBLE} \
               AND NOT EXISTS (SELECT 1 FROM notice_reads r WHERE r.notice_id = n.id AND r.user_id = $1) \
             ON CONFLICT (user_id, notice_id) WHERE user_id IS NOT NULL AND notice_id IS NOT NULL DO NOTHING"
        ))
        .bind(user_id)
        .bind(is_admin)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        tracing::info!("用户 {} 一键已读 {} 条公告", user_id, inserted);
        Ok(inserted)
    }

    pub async fn read_statistics(pool: &PgPool, notice_id: i64) -> AppResult<ReadStatistics> {
        let mut conn = pool.acquire().await?;
        let notice = load_notice(&mut conn, notice_id).await?;

        // 已注销用户的已读记录已经匿名化，不计入分子也不计入分母
        let (read_count, user_count, admin_count): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT (SELECT COUNT(*) FROM notice_reads r
                    JOIN users u ON u.id = r.user_id AND NOT u.is_deleted
                    WHERE r.notice_id = $1),
                   (SELECT COUNT(*) FROM users WHERE NOT is_deleted),
                   (SELECT COUNT(*) FROM admins a
                    JOIN users u ON u.id = a.user_id AND NOT u.is_deleted)
            "#,
        )
        .bind(notice_id)
        .fetch_one(&mut *conn)
        .await?;

        let target = target_user_count(notice.notice_type, user_count, admin_count);
        Ok(ReadStatistics {
            notice_id,
            notice_title: notice.release_title,
            notice_type: notice.notice_type,
            target_user_count: target,
            read_count,
            unread_count: (target - read_count).max(0),
            read_rate: read_rate(read_count, target),
        })
    }

    pub async fn create(pool: &PgPool, admin_id: i64, req: CreateNoticeRequest) -> AppResult<NoticeDetail> {
        content::validate_title(&req.title)?;
        content::validate_body(&req.content)?;
        if req.notice_type.is_legacy() {
            return Err(AppError::bad_request("ADMIN 类型公告已停用，请使用 SYSTEM、GENERAL 或 ACTIVITY"));
        }
        let status = req.status.unwrap_or(NoticeStatus::Approved);
        if !matches!(status, NoticeStatus::Draft | NoticeStatus::Pending | NoticeStatus::Approved) {
            return Err(AppError::bad_request("新公告只能是草稿、待审核或已发布状态"));
        }
        if req.expiration.is_some_and(|e| e <= Utc::now()) {
            return Err(AppError::bad_request("到期时间不能早于当前时间"));
        }

        let mut tx = pool.begin().await?;
        let (_, author) = authorship::resolve_active(&mut tx, admin_id).await?;
        let notice = sqlx::query_as::<_, Notice>(&format!(
            "INSERT INTO notices (release_title, release_notice, notice_type, status, is_top, expiration, \
                                  author_user_id, author_display) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {NOTICE_COLUMNS}"
        ))
        .bind(req.title.trim())
        .bind(req.content.trim())
        .bind(req.notice_type)
        .bind(status)
        .bind(req.is_top)
        .bind(req.expiration)
        .bind(author.user_id)
        .bind(&author.display)
        .fetch_one(&mut *tx)
        .await?;

        let mut attachments = Vec::with_capacity(req.attachments.len());
        for input in &req.attachments {
            attachments.push(insert_attachment(&mut tx, notice.id, admin_id, input).await?);
        }
        tx.commit().await?;

        tracing::info!("管理员 {} 创建公告 {} ({}, {})", admin_id, notice.id, notice.notice_type, notice.status);
        Ok(NoticeDetail {
            notice,
            attachments,
            is_read: false,
            unread_count: None,
        })
    }

    /// 作者或超级管理员可编辑；已过期公告只能修改到期时间
    pub async fn update(pool: &PgPool, admin_id: i64, role: Role, id: i64, req: UpdateNoticeRequest) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_notice(&mut tx, id).await?;
        if current.author_user_id != Some(admin_id) && role != Role::SuperAdmin {
            return Err(AppError::forbidden("只能编辑自己发布的公告"));
        }

        if current.status == NoticeStatus::Expired
            && (req.title.is_some() || req.content.is_some() || req.notice_type.is_some() || req.is_top.is_some())
        {
            return Err(AppError::Expired("公告已过期，只能修改到期时间".into()));
        }

        let title = match req.title {
            Some(title) => {
                content::validate_title(&title)?;
                title.trim().to_string()
            }
            None => current.release_title,
        };
        let body = match req.content {
            Some(body) => {
                content::validate_body(&body)?;
                body.trim().to_string()
            }
            None => current.release_notice,
        };
        let notice_type = match req.notice_type {
            Some(t) if t.is_legacy() && t != current.notice_type => {
                return Err(AppError::bad_request("不能改为已停用的 ADMIN 类型"));
            }
            Some(t) => t,
            None => current.notice_type,
        };
        if req.expiration.is_some_and(|e| e <= Utc::now()) {
            return Err(AppError::bad_request("到期时间不能早于当前时间"));
        }

        sqlx::query(
            "UPDATE notices SET release_title = $2, release_notice = $3, notice_type = $4, \
                 expiration = COALESCE($5, expiration), is_top = COALESCE($6, is_top), update_time = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&title)
        .bind(&body)
        .bind(notice_type)
        .bind(req.expiration)
        .bind(req.is_top)
        .execute(&mut *tx)
        .await?;

        check_expiration(&mut tx, id).await?;
        let notice = load_notice(&mut tx, id).await?;
        tx.commit().await?;
        Ok(notice)
    }

    pub async fn submit(pool: &PgPool, admin_id: i64, id: i64) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_notice(&mut tx, id).await?;
        if current.author_user_id != Some(admin_id) {
            return Err(AppError::forbidden("只能提交自己的公告"));
        }
        if current.status != NoticeStatus::Draft {
            return Err(AppError::bad_request("只有草稿可以提交审核"));
        }

        let notice = sqlx::query_as::<_, Notice>(&format!(
            "UPDATE notices SET status = 'PENDING', update_time = NOW() WHERE id = $1 RETURNING {NOTICE_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(notice)
    }

    /// 审核；通过后立即复查到期
    pub async fn review(pool: &PgPool, reviewer_id: i64, id: i64, req: ReviewRequest) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let current = lock_notice(&mut tx, id).await?;
        if current.status != NoticeStatus::Pending {
            return Err(AppError::bad_request("只有待审核的公告可以审核"));
        }
        let next = if req.approve {
            NoticeStatus::Approved
        } else {
            NoticeStatus::Rejected
        };

        sqlx::query(
            "UPDATE notices SET status = $2, reviewed_by = $3, reviewed_at = NOW(), review_comment = $4, \
                 update_time = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(next)
        .bind(reviewer_id)
        .bind(req.comment.as_deref().map(str::trim).filter(|c| !c.is_empty()))
        .execute(&mut *tx)
        .await?;

        if next == NoticeStatus::Approved {
            check_expiration(&mut tx, id).await?;
        }
        let notice = load_notice(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!("公告 {} 审核结果 {}，审核人 {}", id, notice.status, reviewer_id);
        Ok(notice)
    }

    pub async fn toggle_top(pool: &PgPool, id: i64) -> AppResult<Self> {
        sqlx::query_as::<_, Notice>(&format!(
            "UPDATE notices SET is_top = NOT is_top, update_time = NOW() WHERE id = $1 RETURNING {NOTICE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("公告不存在"))
    }

    /// 删除公告：已读记录先匿名化保留，附件随外键级联删除
    pub async fn delete(pool: &PgPool, admin_id: i64, role: Role, id: i64) -> AppResult<u64> {
        let mut tx = pool.begin().await?;
        let current = lock_notice(&mut tx, id).await?;
        if current.author_user_id != Some(admin_id) && role != Role::SuperAdmin {
            return Err(AppError::forbidden("只能删除自己发布的公告"));
        }

        let reads = sqlx::query(
            "UPDATE notice_reads SET is_anonymized = TRUE, anonymized_user_display = $2, \
                 anonymize_reason = 'notice_delete', anonymized_at = NOW(), notice_id = NULL \
             WHERE notice_id = $1",
        )
        .bind(id)
        .bind(NOTICE_DELETED_DISPLAY)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM notices WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("公告 {} 已被 {} 删除，匿名化已读记录 {} 条", id, admin_id, reads);
        Ok(reads)
    }

    pub async fn admin_list(pool: &PgPool, query: &AdminNoticeQuery) -> AppResult<Paginated<Self>> {
        let paging = PageQuery {
            page: query.page,
            size: query.size,
        };
        let mut tx = pool.begin().await?;
        sweep_expiration(&mut tx).await?;

        let keyword = query
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", k));
        let filter = "($1::TEXT IS NULL OR status = $1) AND ($2::TEXT IS NULL OR notice_type = $2) \
             AND ($3::TEXT IS NULL OR release_title LIKE $3 OR release_notice LIKE $3)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notices WHERE {filter}"))
            .bind(query.status)
            .bind(query.notice_type)
            .bind(&keyword)
            .fetch_one(&mut *tx)
            .await?;

        let items = sqlx::query_as::<_, Notice>(&format!(
            "SELECT {NOTICE_COLUMNS} FROM notices WHERE {filter} \
             ORDER BY is_top DESC, release_time DESC, id DESC LIMIT $4 OFFSET $5"
        ))
        .bind(query.status)
        .bind(query.notice_type)
        .bind(&keyword)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Paginated::new(items, total, &paging))
    }

    pub async fn admin_detail(pool: &PgPool, id: i64) -> AppResult<NoticeDetail> {
        let mut tx = pool.begin().await?;
        check_expiration(&mut tx, id).await?;
        let notice = load_notice(&mut tx, id).await?;
        let attachments = attachments_of(&mut tx, id).await?;
        tx.commit().await?;
        Ok(NoticeDetail {
            notice,
            attachments,
            is_read: false,
            unread_count: None,
        })
    }

    /// 管理端全量扫描，两个方向都处理
    pub async fn sweep(pool: &PgPool) -> AppResult<SweepReport> {
        let mut tx = pool.begin().await?;
        let expired = sweep_expiration(&mut tx).await?;
        let restored = restore_extended(&mut tx).await?;
        tx.commit().await?;

        if restored > 0 {
            tracing::info!("公告到期扫描：{} 条恢复", restored);
        }
        Ok(SweepReport { expired, restored })
    }

    pub async fn add_attachment(pool: &PgPool, admin_id: i64, id: i64, input: AttachmentInput) -> AppResult<NoticeAttachment> {
        let mut tx = pool.begin().await?;
        lock_notice(&mut tx, id).await?;
        let attachment = insert_attachment(&mut tx, id, admin_id, &input).await?;
        tx.commit().await?;
        Ok(attachment)
    }
}

async fn insert_read(conn: &mut PgConnection, user_id: i64, notice_id: i64) -> AppResult<bool> {
    let inserted = sqlx::query(
        "INSERT INTO notice_reads (user_id, notice_id) VALUES ($1, $2) \
         ON CONFLICT (user_id, notice_id) WHERE user_id IS NOT NULL AND notice_id IS NOT NULL DO NOTHING",
    )
    .bind(user_id)
    .bind(notice_id)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(inserted > 0)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn notice(status: NoticeStatus, notice_type: NoticeType, expiration: Option<DateTime<Utc>>) -> Notice {
        let now = Utc::now();
        Notice {
            id: 1,
            release_title: "停水通知".into(),
            release_notice: "明天停水".into(),
            notice_type,
            status,
            is_top: false,
            is_expired: status == NoticeStatus::Expired,
            release_time: now,
            update_time: now,
            expiration,
            author_user_id: Some(1),
            author_display: "管理员（管理员）".into(),
            reviewed_by: None,
            reviewed_at: None,
            review_comment: None,
        }
    }

    #[test]
    fn approved_notice_past_expiration_expires() {
        let now = Utc::now();
        let past = Some(now - Duration::seconds(1));
        assert_eq!(
            expiration_transition(NoticeStatus::Approved, past, now),
            Some(NoticeStatus::Expired)
        );
        assert_eq!(expiration_transition(NoticeStatus::Approved, None, now), None);
        assert_eq!(expiration_transition(NoticeStatus::Draft, past, now), None);
    }

    #[test]
    fn expired_notice_with_future_expiration_is_restored() {
        let now = Utc::now();
        let future = Some(now + Duration::hours(1));
        assert_eq!(
            expiration_transition(NoticeStatus::Expired, future, now),
            Some(NoticeStatus::Approved)
        );
        assert_eq!(
            expiration_transition(NoticeStatus::Expired, Some(now - Duration::hours(1)), now),
            None
        );
    }

    #[test]
    fn target_counts_per_type() {
        assert_eq!(target_user_count(NoticeType::System, 10, 2), 10);
        assert_eq!(target_user_count(NoticeType::General, 10, 2), 10);
        assert_eq!(target_user_count(NoticeType::Activity, 10, 2), 10);
        assert_eq!(target_user_count(NoticeType::Admin, 10, 2), 2);
    }

    #[test]
    fn read_rate_handles_empty_target() {
        assert_eq!(read_rate(0, 0), 0.0);
        assert_eq!(read_rate(1, 3), 33.33);
    }

    #[test]
    fn visibility_rules() {
        let now = Utc::now();
        assert!(can_view(&notice(NoticeStatus::Approved, NoticeType::General, None), false, now).is_ok());
        assert!(matches!(
            can_view(&notice(NoticeStatus::Approved, NoticeType::Admin, None), false, now),
            Err(AppError::Forbidden(_))
        ));
        assert!(can_view(&notice(NoticeStatus::Approved, NoticeType::Admin, None), true, now).is_ok());
        assert!(matches!(
            can_view(&notice(NoticeStatus::Draft, NoticeType::General, None), true, now),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            can_view(
                &notice(NoticeStatus::Approved, NoticeType::System, Some(now - Duration::seconds(5))),
                false,
                now
            ),
            Err(AppError::Expired(_))
        ));
    }
}
