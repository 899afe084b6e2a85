//! Rate limiting and other middleware.

use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Global rate limiter (not keyed by IP).
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter keyed by normalized phone number.
pub type PhoneLimiter = DefaultKeyedRateLimiter<String>;

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    /// Global rate limiter for the verification endpoints
    pub global: Arc<GlobalLimiter>,
    /// Code requests per phone number
    pub per_phone: Arc<PhoneLimiter>,
}

impl RateLimitState {
    /// Create a new rate limit state with the specified limits.
    pub fn new(requests_per_minute: u32, per_phone_per_hour: u32) -> Self {
        let global = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let per_phone = Quota::per_hour(NonZeroU32::new(per_phone_per_hour).unwrap_or(NonZeroU32::MIN));
        Self::from_quotas(global, per_phone)
    }

    /// Create a rate limit state from explicit quotas.
    pub fn from_quotas(global: Quota, per_phone: Quota) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(global)),
            per_phone: Arc::new(RateLimiter::keyed(per_phone)),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        Self::new(1000, 1000)
    }

    /// Consume one code request for `phone`.
    pub fn check_phone(&self, phone: &str) -> Result<(), ApiError> {
        self.per_phone.check_key(&phone.to_string()).map_err(|_| {
            warn!("Per-phone rate limit exceeded");
            ApiError::RateLimitExceeded
        })
    }

    /// Number of phone numbers with live limiter state.
    pub fn tracked_phones(&self) -> usize {
        self.per_phone.len()
    }

    /// Evict phones whose quota has fully recharged.
    pub fn shrink(&self) {
        self.per_phone.retain_recent();
        self.per_phone.shrink_to_fit();
    }
}

/// Spawn a background task that prunes idle per-phone limiter entries.
pub fn spawn_limiter_cleanup(
    rate_limit: RateLimitState,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(?period, "Rate limiter cleanup started");
        let mut timer = interval(period);

        loop {
            timer.tick().await;

            let before = rate_limit.tracked_phones();
            rate_limit.shrink();
            let after = rate_limit.tracked_phones();
            if before > after {
                debug!(evicted = before - after, remaining = after, "Rate limiter pruned");
            }
        }
    })
}

/// Rate limiting middleware.
///
/// Checks the global rate limit and returns 429 Too Many Requests if exceeded.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if rate_limit.global.check().is_err() {
        warn!("Global rate limit exceeded");
        return Err(ApiError::RateLimitExceeded);
    }

    debug!("Rate limit check passed");
    Ok(next.run(request).await)
}

/// Logging middleware for requests.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    debug!(%method, %uri, "Request started");

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() || status == axum::http::StatusCode::SWITCHING_PROTOCOLS {
        debug!(%method, %uri, %status, ?duration, "Request completed");
    } else {
        warn!(%method, %uri, %status, ?duration, "Request failed");
    }

    response
}
