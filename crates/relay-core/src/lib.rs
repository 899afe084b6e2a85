//! Core state and routing for the sealed message relay.
//!
//! The relay verifies phone ownership with a one-time code, tracks which
//! verified usernames are online, and forwards end-to-end encrypted payloads
//! between them without ever decoding the ciphertext. Transport lives in
//! `relay-server`; everything here is transport agnostic.

mod clock;
mod delivery;
mod error;
mod fanout;
mod gateway;
mod metrics;
mod phone;
mod presence;
mod protocol;
mod router;
mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{CodeDelivery, MemoryDelivery};
pub use error::{RelayError, RelayResult};
pub use fanout::{EventFanout, EventReceiver, DEEP_OUTBOX};
pub use gateway::{ConnectionState, Gateway};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use phone::{normalize_phone, redact_phone, MIN_PHONE_DIGITS};
pub use presence::{ConnectionId, ParticipantSession, PresenceRegistry};
pub use protocol::{
    ClientEvent, JoinRequest, PublicKeyRequest, RelayedMessage, SendMessage, ServerEvent,
};
pub use router::{Delivery, RelayRouter, SenderPolicy};
pub use verification::{
    IssuedCode, VerificationRecord, VerificationStore, VerifiedPhone, CODE_LENGTH,
    DEFAULT_CODE_TTL,
};

// Re-exported so callers can build and inspect codes without naming the crate.
pub use secrecy::{ExposeSecret, SecretString};
