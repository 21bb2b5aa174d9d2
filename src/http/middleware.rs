//! Rate limiting middleware.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, trace};

use crate::ratelimit::{RateLimitResult, RateLimiter};

/// Header carrying the client token (`API_KEY`; header names are case-insensitive).
pub const TOKEN_HEADER: &str = "api_key";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const BLOCKED_MESSAGE: &str =
    "You have reached the maximum number of requests or actions allowed within a certain time frame";

/// State shared by the middleware across requests.
#[derive(Clone)]
pub struct LimiterState {
    /// The rate limiter instance
    pub limiter: Arc<RateLimiter>,
    /// Read the client address from `X-Forwarded-For`
    pub trust_forwarded_for: bool,
}

impl LimiterState {
    /// Create middleware state around a rate limiter.
    pub fn new(limiter: Arc<RateLimiter>, trust_forwarded_for: bool) -> Self {
        Self {
            limiter,
            trust_forwarded_for,
        }
    }
}

/// Resolve the client address for a request.
///
/// Uses the first `X-Forwarded-For` entry when trusted, otherwise the peer
/// address. Returns an empty string when neither is available.
pub fn client_ip(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()));
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_default()
}

/// Reject requests over quota with `429 Too Many Requests`.
pub async fn rate_limit(State(state): State<LimiterState>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req, state.trust_forwarded_for);
    let token = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let result = state.limiter.allow_request(&ip, &token).await;
    if result.allowed {
        trace!(ip = %ip, "Request passed rate limiter");
        return next.run(req).await;
    }

    info!(
        ip = %ip,
        has_token = !token.is_empty(),
        retry_in_secs = result.retry_after_secs(),
        "Request blocked by rate limiter"
    );
    too_many_requests(&result)
}

fn too_many_requests(result: &RateLimitResult) -> Response {
    let body = Json(json!({
        "message": BLOCKED_MESSAGE,
        "retry_in": result.block_time.as_secs_f64(),
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(result.retry_after_secs()),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterConfig, MemoryStore};
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(config: LimiterConfig, trust_forwarded_for: bool) -> LimiterState {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::default()), config);
        LimiterState::new(Arc::new(limiter), trust_forwarded_for)
    }

    fn test_router(state: LimiterState) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(state, rate_limit))
    }

    fn request_from(peer: &str) -> axum::http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        axum::http::Request::builder()
            .uri("/")
            .extension(ConnectInfo(addr))
    }

    #[test]
    fn test_client_ip_from_peer() {
        let req = request_from("10.0.0.5:5555").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, false), "10.0.0.5");
    }

    #[test]
    fn test_client_ip_ignores_forwarded_when_untrusted() {
        let req = request_from("10.0.0.5:5555")
            .header("X-Forwarded-For", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, false), "10.0.0.5");
    }

    #[test]
    fn test_client_ip_from_forwarded_when_trusted() {
        let req = request_from("10.0.0.5:5555")
            .header("X-Forwarded-For", " , 203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_missing() {
        let req = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "");
    }

    #[tokio::test]
    async fn test_over_quota_returns_429() {
        let config = LimiterConfig {
            rate_limit_per_ip: 2,
            default_block_time_ip: 120,
            ..LimiterConfig::default()
        };
        let app = test_router(test_state(config, false));

        for _ in 0..2 {
            let req = request_from("1.2.3.4:1000").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let req = request_from("1.2.3.4:1000").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["retry_in"], 120.0);
        assert_eq!(json["message"], BLOCKED_MESSAGE);
    }

    #[tokio::test]
    async fn test_token_header_used_for_classification() {
        let config = LimiterConfig {
            rate_limit_per_ip: 1,
            rate_limit_per_token: 3,
            ..LimiterConfig::default()
        };
        let app = test_router(test_state(config, false));

        for _ in 0..3 {
            let req = request_from("1.2.3.4:1000")
                .header("API_KEY", "tok")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let req = request_from("1.2.3.4:1000")
            .header("API_KEY", "tok")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // The address itself has not been charged.
        let req = request_from("1.2.3.4:1000").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_separate_peers_have_separate_quotas() {
        let config = LimiterConfig {
            rate_limit_per_ip: 1,
            ..LimiterConfig::default()
        };
        let app = test_router(test_state(config, false));

        let req = request_from("1.1.1.1:1000").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);

        let req = request_from("2.2.2.2:1000").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);
    }
}
