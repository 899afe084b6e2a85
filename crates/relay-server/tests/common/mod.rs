//! Shared fixtures for integration tests.

#![allow(dead_code)]

use relay_core::{
    CodeDelivery, Gateway, ManualClock, MemoryDelivery, SenderPolicy, VerificationStore,
    DEFAULT_CODE_TTL,
};
use relay_server::api::{create_router, AppState, RateLimitState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct TestApp {
    pub state: AppState,
    pub delivery: Arc<MemoryDelivery>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new(policy: SenderPolicy, rate_limit: RateLimitState) -> Self {
        let delivery = Arc::new(MemoryDelivery::new());
        let clock = Arc::new(ManualClock::default());
        let state = state_with(delivery.clone(), clock.clone(), policy, rate_limit);
        Self {
            state,
            delivery,
            clock,
        }
    }

    pub fn permissive() -> Self {
        Self::new(SenderPolicy::Asserted, RateLimitState::permissive())
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Issue and verify a code for `phone` without going through HTTP.
    pub async fn verify(&self, phone: &str, username: &str) {
        let verification = self.state.gateway.verification();
        let issued = verification.request_code(phone).await.unwrap();
        let code = self.delivery.last_code(&issued.phone).unwrap();
        verification
            .verify_code(phone, &code, username)
            .await
            .unwrap();
    }

    /// Serve the router on an ephemeral local port.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}

pub fn state_with(
    delivery: Arc<dyn CodeDelivery>,
    clock: Arc<ManualClock>,
    policy: SenderPolicy,
    rate_limit: RateLimitState,
) -> AppState {
    let verification = Arc::new(VerificationStore::new(
        delivery,
        clock.clone(),
        DEFAULT_CODE_TTL,
    ));
    AppState::new(Gateway::new(verification, clock, policy), rate_limit)
}
