//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request a verification code.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub phone: Option<String>,
}

/// Response after issuing a code.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,

    /// Issued code, only with the `dev-otp` feature and echo enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// Submit a code and bind the phone to a username.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub phone: Option<String>,
    /// Accepts `"123456"` or `123456`.
    pub code: Option<Value>,
    pub username: Option<String>,
}

impl VerifyOtpRequest {
    /// Code as text. Numbers keep their literal digits.
    pub fn code_text(&self) -> String {
        match &self.code {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Response after a successful code check.
#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub success: bool,
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub online_users: usize,
    pub connections: usize,
    pub pending_verifications: usize,
    pub messages_relayed: u64,
    pub messages_dropped: u64,
    pub max_outbox_depth: usize,
}
