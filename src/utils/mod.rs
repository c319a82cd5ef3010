use axum::Json;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::authorship::Role;
use crate::config::Config;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: "success".into(),
        data: Some(data),
    })
}

pub fn message_to_api_response<T: Serialize>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    })
}

pub const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_PAGE_SIZE: i64 = 10;

/// 分页查询参数
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

impl PageQuery {
    pub fn new(page: i64, size: i64) -> Self {
        PageQuery {
            page: Some(page),
            size: Some(size),
        }
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn size(&self) -> i64 {
        self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.size()
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub items: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, query: &PageQuery) -> Self {
        Paginated {
            total,
            page: query.page(),
            size: query.size(),
            items,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            total: self.total,
            page: self.page,
            size: self.size,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub role: Role,
    pub exp: i64, // 过期时间
    pub iat: i64, // 签发时间
}

pub fn generate_token(
    user_id: i64,
    role: Role,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = (now + Duration::seconds(config.jwt_expiration().as_secs() as i64)).timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration,
        iat: now.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok((token, expiration))
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_defaults_and_caps() {
        let q = PageQuery::default();
        assert_eq!((q.page(), q.size(), q.offset()), (1, 10, 0));

        let q = PageQuery::new(3, 500);
        assert_eq!(q.size(), MAX_PAGE_SIZE);
        assert_eq!(q.offset(), 200);

        let q = PageQuery::new(-2, 0);
        assert_eq!((q.page(), q.size()), (1, 1));
    }

    #[test]
    fn token_round_trip_keeps_role() {
        let config = Config::for_tests("postgres://unused");
        let (token, exp) = generate_token(42, Role::OrgUser, &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role, Role::OrgUser);
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = Config::for_tests("postgres://unused");
        let (token, _) = generate_token(1, Role::User, &config).unwrap();
        let mut other = config.clone();
        other.jwt_secret = "another".into();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn success_envelope_shape() {
        let Json(body) = success_to_api_response(5);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], 5);
    }
}
