//! HTTP and WebSocket API for the relay.

mod handlers;
mod middleware;
mod types;
mod ws;

pub use handlers::*;
pub use middleware::{logging_middleware, rate_limit_middleware, spawn_limiter_cleanup, RateLimitState};
pub use types::*;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use relay_core::Gateway;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Connection gateway, which also owns verification and presence
    pub gateway: Arc<Gateway>,
    /// Per-phone limits for code requests
    pub rate_limit: RateLimitState,
    /// Return issued codes from `/verify` (dev builds only)
    pub echo_code: bool,
}

impl AppState {
    /// Create new application state.
    pub fn new(gateway: Gateway, rate_limit: RateLimitState) -> Self {
        Self {
            gateway: Arc::new(gateway),
            rate_limit,
            echo_code: false,
        }
    }

    /// Echo issued codes in `/verify` responses. Ignored unless built with
    /// the `dev-otp` feature.
    pub fn with_echo_code(mut self, echo: bool) -> Self {
        self.echo_code = echo && cfg!(feature = "dev-otp");
        self
    }
}

/// Create the API router with the state's rate limits.
pub fn create_router(state: AppState) -> Router {
    let rate_limit = state.rate_limit.clone();
    create_router_with_rate_limit(state, rate_limit)
}

/// Create the API router with custom global rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    Router::new()
        // Verification endpoints (with rate limiting)
        .route("/verify", post(handlers::request_code))
        .route("/verify-otp", post(handlers::verify_code))
        .route_layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        // Health check and event socket (no rate limiting)
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::upgrade))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
