use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use sqlx::FromRow;

use crate::{
    AppState,
    authorship::Role,
    error::{AppError, AppResult},
    utils::verify_token,
};

/// 已认证的请求主体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("需要管理员权限"))
        }
    }
}

#[derive(FromRow)]
struct PrincipalRow {
    role: Role,
    is_deleted: bool,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(AppError::Unauthorized)?;

    let claims = verify_token(bearer.token(), &state.config).map_err(|err| {
        tracing::debug!("令牌校验失败: {:?}", err);
        AppError::Unauthorized
    })?;
    let user_id: i64 = claims.sub.parse().map_err(|_| AppError::Unauthorized)?;

    // 角色以数据库为准，已注销用户的令牌立即失效
    let row = sqlx::query_as::<_, PrincipalRow>("SELECT role, is_deleted FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?;
    let principal = match row {
        Some(row) if !row.is_deleted => Principal {
            user_id,
            role: row.role,
        },
        _ => return Err(AppError::Unauthorized),
    };

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
