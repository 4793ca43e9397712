use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ratelimit::RateLimitDecision;

use super::AppState;

/// Rate limiting middleware keyed by client IP.
///
/// Returns 429 with a `Retry-After` header when the client's bucket is
/// empty.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check(addr.ip()) {
        RateLimitDecision::Allowed => next.run(req).await,
        RateLimitDecision::Denied { retry_after } => {
            tracing::warn!(ip = %addr.ip(), retry_after, "rate limit exceeded");

            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Rate limit exceeded" })),
            )
                .into_response();

            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}
