//! 作者身份：创建时写入展示名/头像快照，用户注销时统一匿名化。

use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, PgConnection};

use crate::db::text_enum;
use crate::error::{AppError, AppResult};

/// 注销用户的展示名，历史数据依赖这个字面值
pub const DELETED_USER_DISPLAY: &str = "用户已注销";
pub const DEFAULT_AVATAR: &str = "/static/images/default-avatar.png";

text_enum! {
    pub enum Role {
        User => "USER",
        OrgUser => "ORG_USER",
        Admin => "ADMIN",
        SuperAdmin => "SUPER_ADMIN",
    }
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin | Role::SuperAdmin => "管理员",
            Role::OrgUser => "组织用户",
            Role::User => "用户",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

/// 计算展示名所需的用户字段
#[derive(Debug, Clone, FromRow)]
pub struct AuthorSource {
    pub id: i64,
    pub account: String,
    pub username: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorship {
    pub user_id: Option<i64>,
    pub display: String,
    pub avatar: String,
}

impl Authorship {
    pub fn anonymous() -> Self {
        Authorship {
            user_id: None,
            display: DELETED_USER_DISPLAY.to_string(),
            avatar: DEFAULT_AVATAR.to_string(),
        }
    }
}

pub fn role_prefixed_name(username: &str, role: Role) -> String {
    format!("{}（{}）", username, role.label())
}

/// 不存在或已注销的用户一律视为匿名
pub fn stamp(user: Option<&AuthorSource>) -> Authorship {
    match user {
        Some(u) if !u.is_deleted => Authorship {
            user_id: Some(u.id),
            display: role_prefixed_name(&u.username, u.role),
            avatar: u
                .avatar
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
        },
        _ => Authorship::anonymous(),
    }
}

pub async fn load_source(conn: &mut PgConnection, user_id: i64) -> AppResult<Option<AuthorSource>> {
    let source = sqlx::query_as::<_, AuthorSource>(
        "SELECT id, account, username, avatar, role, is_deleted FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(source)
}

/// 为写操作解析作者；已注销的用户不能再发布内容
pub async fn resolve_active(conn: &mut PgConnection, user_id: i64) -> AppResult<(AuthorSource, Authorship)> {
    match load_source(conn, user_id).await? {
        Some(source) if !source.is_deleted => {
            let authorship = stamp(Some(&source));
            Ok((source, authorship))
        }
        _ => Err(AppError::forbidden("用户不存在或已注销")),
    }
}

/// 读路径上的作者列：`au` 是 LEFT JOIN 进来的 users 别名，作者缺失或已注销时给出匿名值
pub fn live_author_columns(table: &str, id_col: &str, display_col: &str, avatar_col: Option<&str>) -> String {
    let mut columns = format!(
        "CASE WHEN au.is_deleted IS NOT FALSE THEN NULL ELSE {table}.{id_col} END AS {id_col}, \
         CASE WHEN au.is_deleted IS NOT FALSE THEN '{DELETED_USER_DISPLAY}' ELSE {table}.{display_col} END AS {display_col}"
    );
    if let Some(avatar_col) = avatar_col {
        columns.push_str(&format!(
            ", CASE WHEN au.is_deleted IS NOT FALSE THEN '{DEFAULT_AVATAR}' ELSE {table}.{avatar_col} END AS {avatar_col}"
        ));
    }
    columns
}

pub fn author_join(table: &str, id_col: &str) -> String {
    format!("LEFT JOIN users au ON au.id = {table}.{id_col}")
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AnonymiseReport {
    pub activities: u64,
    pub ratings: u64,
    pub discussions: u64,
    pub comments: u64,
    pub notices: u64,
    pub science_articles: u64,
    pub forum_posts: u64,
    pub forum_floors: u64,
    pub forum_replies: u64,
    pub forum_likes: u64,
    pub notice_reads: u64,
}

/// 在调用方事务内切断该用户所有作者引用
pub async fn anonymise_author(conn: &mut PgConnection, user_id: i64) -> AppResult<AnonymiseReport> {
    let mut report = AnonymiseReport::default();

    report.activities = sqlx::query(
        "UPDATE activities SET organizer_user_id = NULL, organizer_display = $2, updated_at = NOW() \
         WHERE organizer_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.ratings = sqlx::query(
        "UPDATE activity_ratings SET rater_user_id = NULL, rater_display = $2, rater_avatar = $3 \
         WHERE rater_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .bind(DEFAULT_AVATAR)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.discussions = sqlx::query(
        "UPDATE activity_discussions SET author_user_id = NULL, author_display = $2, author_avatar = $3 \
         WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .bind(DEFAULT_AVATAR)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.comments = sqlx::query(
        "UPDATE activity_discussion_comments SET author_user_id = NULL, author_display = $2, author_avatar = $3 \
         WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .bind(DEFAULT_AVATAR)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.notices = sqlx::query(
        "UPDATE notices SET author_user_id = NULL, author_display = $2 WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query("UPDATE notices SET reviewed_by = NULL WHERE reviewed_by = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE notice_attachments SET uploader_user_id = NULL WHERE uploader_user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    report.science_articles = sqlx::query(
        "UPDATE science_articles SET author_user_id = NULL, author_display = $2 WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    for table in ["science_article_likes", "science_article_visits", "forum_visits"] {
        sqlx::query(&format!("UPDATE {table} SET user_id = NULL WHERE user_id = $1"))
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }

    report.forum_posts = sqlx::query(
        "UPDATE forum_posts SET author_user_id = NULL, author_display = $2 WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.forum_floors = sqlx::query(
        "UPDATE forum_floors SET author_user_id = NULL, author_display = $2 WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.forum_replies = sqlx::query(
        "UPDATE forum_replies SET author_user_id = NULL, author_display = $2 WHERE author_user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    report.forum_likes = sqlx::query(
        "UPDATE forum_likes SET user_id = NULL, user_display = $2 WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(DELETED_USER_DISPLAY)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(report)
}

/// 已读记录保留统计意义：记下原账号与角色后切断 user_id
pub async fn tombstone_notice_reads(conn: &mut PgConnection, user: &AuthorSource) -> AppResult<u64> {
    let affected = sqlx::query(
        r#"
        UPDATE notice_reads
        SET is_anonymized = TRUE,
            anonymized_user_account = $2,
            anonymized_user_role = $3,
            anonymized_user_display = $4,
            anonymized_at = $5,
            anonymize_reason = 'user_delete',
            user_id = NULL
        WHERE user_id = $1
        "#,
    )
    .bind(user.id)
    .bind(&user.account)
    .bind(user.role)
    .bind(DELETED_USER_DISPLAY)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(role: Role, deleted: bool, avatar: Option<&str>) -> AuthorSource {
        AuthorSource {
            id: 7,
            account: "alice".into(),
            username: "Alice".into(),
            avatar: avatar.map(str::to_string),
            role,
            is_deleted: deleted,
        }
    }

    #[test]
    fn role_labels() {
        assert_eq!(role_prefixed_name("张三", Role::Admin), "张三（管理员）");
        assert_eq!(role_prefixed_name("张三", Role::SuperAdmin), "张三（管理员）");
        assert_eq!(role_prefixed_name("张三", Role::OrgUser), "张三（组织用户）");
        assert_eq!(role_prefixed_name("张三", Role::User), "张三（用户）");
    }

    #[test]
    fn stamp_live_user_copies_identity() {
        let s = stamp(Some(&source(Role::OrgUser, false, Some("/a.png"))));
        assert_eq!(s.user_id, Some(7));
        assert_eq!(s.display, "Alice（组织用户）");
        assert_eq!(s.avatar, "/a.png");
    }

    #[test]
    fn stamp_falls_back_to_default_avatar() {
        let s = stamp(Some(&source(Role::User, false, Some(""))));
        assert_eq!(s.avatar, DEFAULT_AVATAR);
        let s = stamp(Some(&source(Role::User, false, None)));
        assert_eq!(s.avatar, DEFAULT_AVATAR);
    }

    #[test]
    fn stamp_deleted_or_missing_user_is_anonymous() {
        assert_eq!(stamp(Some(&source(Role::Admin, true, Some("/a.png")))), Authorship::anonymous());
        assert_eq!(stamp(None), Authorship::anonymous());
        assert_eq!(Authorship::anonymous().display, "用户已注销");
    }

    #[test]
    fn live_author_columns_cover_avatar_when_requested() {
        let sql = live_author_columns("d", "author_user_id", "author_display", Some("author_avatar"));
        assert!(sql.contains("d.author_user_id END AS author_user_id"));
        assert!(sql.contains("'用户已注销'"));
        assert!(sql.contains("AS author_avatar"));
        let sql = live_author_columns("p", "author_user_id", "author_display", None);
        assert!(!sql.contains("avatar"));
    }
}
