//! Sealed Relay server - phone-verified, end-to-end encrypted message relay.
//!
//! This server exposes the relay over HTTP and WebSocket:
//! - `POST /verify` and `POST /verify-otp` prove phone ownership
//! - `GET /ws` carries join, presence and encrypted message events
//! - `GET /health` reports live counters
//!
//! Message payloads are forwarded byte for byte and never decoded.

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;

pub use config::Config;
pub use error::ApiError;

use api::{AppState, RateLimitState};
use relay_core::{CodeDelivery, Gateway, SystemClock, VerificationStore};
use std::sync::Arc;

/// Wire the relay core to a delivery backend according to `config`.
pub fn build_state(config: &Config, delivery: Arc<dyn CodeDelivery>) -> AppState {
    let clock = Arc::new(SystemClock);
    let verification = Arc::new(VerificationStore::new(
        delivery,
        clock.clone(),
        config.otp.ttl,
    ));
    let gateway = Gateway::new(verification, clock, config.relay.sender_policy);
    let rate_limit = RateLimitState::new(
        config.rate_limit.global_per_minute,
        config.rate_limit.per_phone_per_hour,
    );

    AppState::new(gateway, rate_limit).with_echo_code(config.delivery.echo_code)
}
