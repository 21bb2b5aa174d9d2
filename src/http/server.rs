//! HTTP server implementation.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit, LimiterState};
use crate::error::{Result, TollgateError};
use crate::ratelimit::RateLimiter;

/// Build the application router with the rate limiter in front of every route.
pub fn router(state: LimiterState) -> Router {
    Router::new()
        .route("/", get(index))
        .layer(axum::middleware::from_fn_with_state(state, rate_limit))
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Request allowed" }))
}

/// HTTP server guarded by the rate limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Middleware state
    state: LimiterState,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        addr: SocketAddr,
        rate_limiter: Arc<RateLimiter>,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            addr,
            state: LimiterState::new(rate_limiter, trust_forwarded_for),
        }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TollgateError::Io(e)
            })
    }
}
