use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use community_backend::{AppState, build_router, config::Config};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

/// 不连数据库的路由状态，只用于走不到查询的请求
fn offline_state() -> AppState {
    let config = Config::for_tests("postgres://offline@127.0.0.1:1/none");
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .expect("lazy pool");
    let redis = redis::Client::open(config.redis_url.clone()).expect("redis client");
    AppState {
        pool,
        config,
        redis: Arc::new(redis),
    }
}

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    for (method, uri) in [
        ("GET", "/api/notice/list"),
        ("POST", "/api/notice/read/all"),
        ("POST", "/api/activities/booking/activities/1/book"),
        ("GET", "/api/admin/fields/activity"),
    ] {
        let response = build_router(offline_state())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");

        let json = body_json(response.into_body()).await;
        assert_eq!(json["success"], false);
        assert!(json["message"].is_string());
    }
}

#[tokio::test]
async fn malformed_token_is_rejected() {
    let response = build_router(offline_state())
        .oneshot(
            Request::builder()
                .uri("/api/notice/unread/count")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_paths_fall_through_to_not_found() {
    let response = build_router(offline_state())
        .oneshot(Request::builder().uri("/api/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn routes_live_under_the_configured_base() {
    let response = build_router(offline_state())
        .oneshot(Request::builder().uri("/notice/list").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
