use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use community_backend::{
    AppState, build_router,
    config::Config,
    db,
    middleware::{RateLimiter, rate_limit},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 数据库连接池与迁移
    let pool = db::connect(&config).await.expect("Failed to connect to Postgres");
    db::migrate(&pool).await.expect("Failed to run migrations");

    // 设置 Redis 客户端
    let redis_client = redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client);

    let state = AppState {
        pool,
        config: config.clone(),
        redis: redis_arc.clone(),
    };

    // 限流器
    let rate_limiter = Arc::new(RateLimiter::new(redis_arc, config.clone()));

    let router = build_router(state.clone()).layer(axum::middleware::from_fn_with_state(rate_limiter, rate_limit));

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr).await.expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
