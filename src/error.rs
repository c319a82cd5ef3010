use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::ApiResponse;

/// 领域操作统一的错误类型，`message` 直接展示给用户
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    CapacityExceeded(String),

    #[error("{0}")]
    Expired(String),

    #[error("未授权访问")]
    Unauthorized,

    #[error("操作超时，请稍后重试")]
    Timeout,

    #[error("数据库错误")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// handler 的统一返回类型
pub type ApiResult<T> = Result<axum::Json<ApiResponse<T>>, AppError>;

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::CapacityExceeded(_) => StatusCode::CONFLICT,
            AppError::Expired(_) => StatusCode::GONE,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Database(e) if is_unique_violation(e) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 错误类别，与响应码无关的稳定标识
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::CapacityExceeded(_) => "capacity_exceeded",
            AppError::Expired(_) => "expired",
            AppError::Unauthorized => "unauthorized",
            AppError::Timeout => "timeout",
            AppError::Database(e) if is_unique_violation(e) => "conflict",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }
}

/// PostgreSQL 唯一约束冲突 (23505)
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Database(e) if is_unique_violation(e) => "数据已存在".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!("请求处理失败: {:?}", self);
        } else {
            tracing::debug!("业务拒绝 [{}]: {}", self.kind(), message);
        }

        let body = Json(ApiResponse::<()> {
            success: false,
            message,
            data: None,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_business_errors_to_client_codes() {
        assert_eq!(AppError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::CapacityExceeded("满".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::Expired("过期".into()).status_code(), StatusCode::GONE);
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn server_side_failures_are_5xx() {
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::Internal("boom".into()).kind(), "internal");
        assert_eq!(AppError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn capacity_kind_is_distinct_from_conflict() {
        assert_eq!(AppError::CapacityExceeded("满".into()).kind(), "capacity_exceeded");
        assert_eq!(AppError::conflict("重复").kind(), "conflict");
    }

    #[tokio::test]
    async fn error_response_uses_envelope() {
        let response = AppError::not_found("活动不存在").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "活动不存在");
        assert!(value["data"].is_null());
    }
}
