//! HTTP request handlers.

use super::types::{HealthResponse, VerifyOtpRequest, VerifyOtpResponse, VerifyRequest, VerifyResponse};
use super::AppState;
use crate::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use relay_core::{normalize_phone, redact_phone, RelayError};
use tracing::{debug, info};

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gateway = &state.gateway;
    let metrics = gateway.metrics();

    Json(HealthResponse {
        status: "ok".to_string(),
        online_users: gateway.online_count().await,
        connections: gateway.connection_count(),
        pending_verifications: gateway.verification().count().await,
        messages_relayed: metrics.messages_relayed,
        messages_dropped: metrics.messages_dropped,
        max_outbox_depth: gateway.max_outbox_depth(),
    })
}

/// Issue a one-time code for a phone number.
pub async fn request_code(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        debug!(error = %e, "Rejected verify body");
        ApiError::from(RelayError::MissingFields("Phone number is required"))
    })?;

    let phone = request
        .phone
        .filter(|p| !p.is_empty())
        .ok_or(RelayError::MissingFields("Phone number is required"))?;
    let phone = normalize_phone(&phone)?;

    state.rate_limit.check_phone(&phone)?;

    let issued = state.gateway.verification().request_code(&phone).await?;
    info!(phone = %redact_phone(&issued.phone), "Code requested");

    Ok(Json(VerifyResponse {
        success: true,
        message: "OTP sent to your phone".to_string(),
        otp: echoed_code(&state, &issued),
    }))
}

#[cfg(feature = "dev-otp")]
fn echoed_code(state: &AppState, issued: &relay_core::IssuedCode) -> Option<String> {
    use relay_core::ExposeSecret;
    state
        .echo_code
        .then(|| issued.code.expose_secret().to_string())
}

#[cfg(not(feature = "dev-otp"))]
fn echoed_code(_state: &AppState, _issued: &relay_core::IssuedCode) -> Option<String> {
    None
}

/// Check a code and bind the phone to a username.
pub async fn verify_code(
    State(state): State<AppState>,
    payload: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<Json<VerifyOtpResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        debug!(error = %e, "Rejected verify-otp body");
        ApiError::BadRequest("Invalid request data".to_string())
    })?;

    let code = request.code_text();
    let phone = request.phone.unwrap_or_default();
    let username = request.username.unwrap_or_default();

    state
        .gateway
        .verification()
        .verify_code(&phone, &code, &username)
        .await?;

    Ok(Json(VerifyOtpResponse {
        success: true,
        message: "Phone verified successfully".to_string(),
    }))
}
