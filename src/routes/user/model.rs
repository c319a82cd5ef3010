use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::{
    authorship::{self, AnonymiseReport, AuthorSource, Role},
    error::{AppError, AppResult},
    utils::{PageQuery, Paginated},
};

/// 注销确认文本
pub const DELETE_CONFIRMATION: &str = "DELETE_MY_ACCOUNT";

const USER_COLUMNS: &str =
    "id, account, password_hash, username, phone, email, avatar, role, is_deleted, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub account: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub username: String,
    pub phone: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub role: Role,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeletedUser {
    pub id: i64,
    pub original_user_id: i64,
    pub original_account: String,
    pub original_phone: Option<String>,
    pub delete_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub account: String,
    pub password: String,
    pub username: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub account: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
    pub confirmation: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub keyword: Option<String>,
    pub role: Option<Role>,
    #[serde(default)]
    pub include_deleted: bool,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl UserListQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            size: self.size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

/// 注册时的新用户数据，密码已经哈希
#[derive(Debug, Clone)]
pub struct NewUser {
    pub account: String,
    pub password_hash: String,
    pub username: String,
    pub phone: String,
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SoftDeleteOutcome {
    Deleted {
        record: DeletedUser,
        anonymised: AnonymiseReport,
    },
    AlreadyDeleted,
}

impl User {
    pub fn author_source(&self) -> AuthorSource {
        AuthorSource {
            id: self.id,
            account: self.account.clone(),
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            role: self.role,
            is_deleted: self.is_deleted,
        }
    }

    pub async fn create(pool: &PgPool, new: NewUser) -> AppResult<Self> {
        let account = new.account.trim();
        let phone = new.phone.trim();
        if account.is_empty() || phone.is_empty() || new.username.trim().is_empty() {
            return Err(AppError::bad_request("账号、手机号和用户名不能为空"));
        }

        let mut tx = pool.begin().await?;

        // 只和未注销的用户比较
        let account_taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE account = $1 AND NOT is_deleted)",
        )
        .bind(account)
        .fetch_one(&mut *tx)
        .await?;
        if account_taken {
            return Err(AppError::conflict("账号已被注册"));
        }

        let phone_taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE phone = $1 AND NOT is_deleted)",
        )
        .bind(phone)
        .fetch_one(&mut *tx)
        .await?;
        if phone_taken {
            return Err(AppError::conflict("手机号已被注册"));
        }

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (account, password_hash, username, phone, email, role) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        ))
        .bind(account)
        .bind(&new.password_hash)
        .bind(new.username.trim())
        .bind(phone)
        .bind(&new.email)
        .bind(new.role)
        .fetch_one(&mut *tx)
        .await?;

        if user.role.is_admin() {
            grant_admin_record(&mut tx, user.id).await?;
        }

        tx.commit().await?;
        tracing::info!("新用户注册: id={}, account={}", user.id, user.account);
        Ok(user)
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> AppResult<Option<Self>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn find_active_by_account(pool: &PgPool, account: &str) -> AppResult<Option<Self>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE account = $1 AND NOT is_deleted"
        ))
        .bind(account)
        .fetch_optional(pool)
        .await?;
        Ok(user)
    }

    pub async fn update_profile(pool: &PgPool, id: i64, req: UpdateProfileRequest) -> AppResult<Self> {
        if let Some(name) = &req.username {
            if name.trim().is_empty() {
                return Err(AppError::bad_request("用户名不能为空"));
            }
        }

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET username = COALESCE($2, username), email = COALESCE($3, email), \
             avatar = COALESCE($4, avatar), updated_at = NOW() \
             WHERE id = $1 AND NOT is_deleted RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(req.username.as_deref().map(str::trim))
        .bind(&req.email)
        .bind(&req.avatar)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;
        Ok(user)
    }

    /// 软删除：保留注销记录、释放账号与手机号，并在同一事务内匿名化全部作者数据
    pub async fn soft_delete(pool: &PgPool, id: i64) -> AppResult<SoftDeleteOutcome> {
        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;

        if user.is_deleted {
            return Ok(SoftDeleteOutcome::AlreadyDeleted);
        }

        let record = sqlx::query_as::<_, DeletedUser>(
            "INSERT INTO deleted_users (original_user_id, original_account, original_phone) \
             VALUES ($1, $2, $3) \
             RETURNING id, original_user_id, original_account, original_phone, delete_time",
        )
        .bind(user.id)
        .bind(&user.account)
        .bind(&user.phone)
        .fetch_one(&mut *tx)
        .await?;

        let suffixed_account = format!("deleted_{}_{}", user.id, user.account);
        let suffixed_phone = format!("deleted_{}_{}", user.id, user.phone);
        sqlx::query(
            "UPDATE users SET is_deleted = TRUE, account = $2, phone = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(user.id)
        .bind(&suffixed_account)
        .bind(&suffixed_phone)
        .execute(&mut *tx)
        .await?;

        // 预约按账号关联，跟随改名，避免新注册的同名账号继承历史预约
        sqlx::query("UPDATE activity_bookings SET user_account = $2 WHERE user_account = $1")
            .bind(&user.account)
            .bind(&suffixed_account)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM admins WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        let mut anonymised = authorship::anonymise_author(&mut tx, user.id).await?;
        anonymised.notice_reads = authorship::tombstone_notice_reads(&mut tx, &user.author_source()).await?;

        tx.commit().await?;
        tracing::info!(
            "用户 {} ({}) 已注销，匿名化结果: {:?}",
            user.id,
            user.account,
            anonymised
        );

        Ok(SoftDeleteOutcome::Deleted { record, anonymised })
    }

    pub async fn list(pool: &PgPool, query: &UserListQuery) -> AppResult<Paginated<Self>> {
        let paging = query.paging();
        let keyword = query.keyword.as_deref().map(|k| format!("%{}%", k.trim()));
        let filter = "($1::TEXT IS NULL OR account LIKE $1 OR username LIKE $1 OR phone LIKE $1) \
                      AND ($2::TEXT IS NULL OR role = $2) AND ($3 OR NOT is_deleted)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {filter}"))
            .bind(&keyword)
            .bind(query.role)
            .bind(query.include_deleted)
            .fetch_one(pool)
            .await?;

        let items = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {filter} ORDER BY id DESC LIMIT $4 OFFSET $5"
        ))
        .bind(&keyword)
        .bind(query.role)
        .bind(query.include_deleted)
        .bind(paging.size())
        .bind(paging.offset())
        .fetch_all(pool)
        .await?;

        Ok(Paginated::new(items, total, &paging))
    }

    /// 调整角色；管理员角色同时维护 admins 记录
    pub async fn set_role(pool: &PgPool, id: i64, role: Role) -> AppResult<Self> {
        let mut tx = pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 AND NOT is_deleted RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("用户不存在"))?;

        if role.is_admin() {
            grant_admin_record(&mut tx, id).await?;
        } else {
            sqlx::query("DELETE FROM admins WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!("用户 {} 角色调整为 {}", id, role);
        Ok(user)
    }
}

async fn grant_admin_record(conn: &mut PgConnection, user_id: i64) -> AppResult<()> {
    sqlx::query("INSERT INTO admins (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// 是否拥有管理员记录（决定能否看到旧版 ADMIN 公告）
pub async fn has_admin_record(conn: &mut PgConnection, user_id: i64) -> AppResult<bool> {
    let exists = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM admins WHERE user_id = $1)")
        .bind(user_id)
        .fetch_one(conn)
        .await?;
    Ok(exists)
}
