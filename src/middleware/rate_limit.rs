use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;

use crate::{config::Config, utils::ApiResponse};

#[derive(Clone)]
pub struct RateLimiter {
    redis: Arc<redis::Client>,
    config: Arc<Config>,
}

/// 客户端 IP：优先代理头，其次连接地址
fn client_ip(req: &Request<Body>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

impl RateLimiter {
    pub fn new(redis: Arc<redis::Client>, config: Config) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    /// 固定窗口计数：INCR + EXPIRE
    async fn hit(&self, ip: &str) -> redis::RedisResult<i64> {
        let key = format!("community:rate_limit:{}", ip);
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn
                .expire(&key, self.config.rate_limit_window().as_secs() as i64)
                .await?;
        }
        Ok(count)
    }

    pub async fn check_rate_limit(self: Arc<Self>, req: Request<Body>, next: Next) -> Response {
        let ip = client_ip(&req);

        match self.hit(&ip).await {
            Ok(count) if count > self.config.rate_limit_requests as i64 => {
                tracing::warn!("IP {} 请求过于频繁 ({} 次)", ip, count);
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ApiResponse::<()> {
                        success: false,
                        message: format!(
                            "请求过于频繁，请在{}秒后重试",
                            self.config.rate_limit_window().as_secs()
                        ),
                        data: None,
                    }),
                )
                    .into_response();
            }
            Ok(_) => {}
            // Redis 不可用时放行
            Err(err) => tracing::warn!("限流计数失败，跳过限流: {}", err),
        }

        next.run(req).await
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    limiter.check_rate_limit(req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)], peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/public/notices");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut().insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        req
    }

    #[test]
    fn real_ip_header_wins() {
        let req = request(&[("x-real-ip", "10.0.0.9"), ("x-forwarded-for", "1.1.1.1")], Some("127.0.0.1:5000"));
        assert_eq!(client_ip(&req), "10.0.0.9");
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let req = request(&[("x-forwarded-for", " , 203.0.113.7, 10.0.0.1")], None);
        assert_eq!(client_ip(&req), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        assert_eq!(client_ip(&request(&[], Some("192.168.1.2:4000"))), "192.168.1.2");
        assert_eq!(client_ip(&request(&[], None)), "unknown");
    }
}
