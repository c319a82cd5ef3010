use axum::{
    body::{Body, to_bytes},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 为每个请求分配 request id，并记录所有 5xx 响应体
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("request", id = %request_id, %method, %path);

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if !response.status().is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, 64 * 1024).await {
        Ok(b) => b,
        Err(e) => {
            error!("读取错误响应体失败 [{}]: {}", request_id, e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    error!(
        "服务端错误 [{}] {} {} - Status: {}, Body: {}",
        request_id,
        method,
        path,
        parts.status,
        String::from_utf8_lossy(&bytes)
    );

    // 重置 body 以便重新构建响应
    parts.headers.remove(axum::http::header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
