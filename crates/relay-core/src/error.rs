//! Relay error taxonomy.
//!
//! Every variant is caller-facing and non-fatal. Transports report them as a
//! structured `error` event (WebSocket) or a `{success: false}` body (HTTP).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Invalid phone number")]
    InvalidPhone,

    #[error("Phone number not found. Please request a new code.")]
    PhoneNotFound,

    #[error("OTP expired. Please request a new code.")]
    Expired,

    #[error("Invalid OTP")]
    CodeMismatch,

    #[error("{0}")]
    MissingFields(&'static str),

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Phone number not verified")]
    PhoneNotVerified,

    #[error("Username does not match verified phone")]
    UsernameMismatch,

    #[error("Connection has already joined")]
    AlreadyJoined,

    #[error("You are not logged in")]
    NotLoggedIn,

    #[error("Sender does not match this connection")]
    SenderMismatch,

    #[error("User {0} is not online")]
    RecipientOffline(String),

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Code delivery failed: {0}")]
    DeliveryFailed(String),
}

impl RelayError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::InvalidPhone => "INVALID_PHONE",
            RelayError::PhoneNotFound => "PHONE_NOT_FOUND",
            RelayError::Expired => "EXPIRED",
            RelayError::CodeMismatch => "CODE_MISMATCH",
            RelayError::MissingFields(_) => "MISSING_FIELDS",
            RelayError::UsernameTaken => "USERNAME_TAKEN",
            RelayError::PhoneNotVerified => "PHONE_NOT_VERIFIED",
            RelayError::UsernameMismatch => "USERNAME_MISMATCH",
            RelayError::AlreadyJoined => "ALREADY_JOINED",
            RelayError::NotLoggedIn => "NOT_LOGGED_IN",
            RelayError::SenderMismatch => "SENDER_MISMATCH",
            RelayError::RecipientOffline(_) => "RECIPIENT_OFFLINE",
            RelayError::UserNotFound(_) => "USER_NOT_FOUND",
            RelayError::MalformedEvent(_) => "MALFORMED_EVENT",
            RelayError::UnknownEvent(_) => "UNKNOWN_EVENT",
            RelayError::DeliveryFailed(_) => "DELIVERY_FAILED",
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
