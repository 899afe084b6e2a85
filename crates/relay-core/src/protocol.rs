//! Event envelope exchanged with clients.
//!
//! Frames are `{"event": "<name>", "data": {...}}` in both directions.
//! Payload fields are kept as [`RawValue`] so the relay forwards the exact
//! bytes it received and never decodes them.

use crate::error::{RelayError, RelayResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

/// Inbound event from a client connection.
#[derive(Debug)]
pub enum ClientEvent {
    Join(JoinRequest),
    GetOnlineUsers,
    GetPublicKey(PublicKeyRequest),
    SendMessage(SendMessage),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| RelayError::MalformedEvent(e.to_string()))?;

        match envelope.event.as_str() {
            "join" => Ok(ClientEvent::Join(decode_data(envelope.data)?)),
            "get_online_users" => Ok(ClientEvent::GetOnlineUsers),
            "get_public_key" => Ok(ClientEvent::GetPublicKey(decode_data(envelope.data)?)),
            "send_message" => Ok(ClientEvent::SendMessage(decode_data(envelope.data)?)),
            other => Err(RelayError::UnknownEvent(other.to_string())),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::GetOnlineUsers => "get_online_users",
            ClientEvent::GetPublicKey(_) => "get_public_key",
            ClientEvent::SendMessage(_) => "send_message",
        }
    }
}

fn decode_data<T: DeserializeOwned + Default>(data: Option<Box<RawValue>>) -> RelayResult<T> {
    match data {
        Some(raw) => {
            serde_json::from_str(raw.get()).map_err(|e| RelayError::MalformedEvent(e.to_string()))
        }
        None => Ok(T::default()),
    }
}

/// `true` unless the value is absent, `null`, or an empty string.
pub fn is_present(value: &Option<Box<RawValue>>) -> bool {
    match value {
        Some(raw) => !matches!(raw.get(), "null" | "\"\""),
        None => false,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    pub username: Option<String>,
    pub phone: Option<String>,
    #[serde(alias = "publicKey")]
    pub public_key: Option<Box<RawValue>>,
}

impl JoinRequest {
    /// Required fields, or `None` if any is missing.
    pub fn fields(&self) -> Option<(&str, &str, &RawValue)> {
        let username = non_empty(&self.username)?;
        let phone = non_empty(&self.phone)?;
        if !is_present(&self.public_key) {
            return None;
        }
        let key = self.public_key.as_deref()?;
        Some((username, phone, key))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PublicKeyRequest {
    pub username: Option<String>,
}

/// `send_message` body. Everything except routing metadata is opaque.
#[derive(Default, Deserialize)]
pub struct SendMessage {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub encrypted_message: Option<Box<RawValue>>,
    pub encrypted_aes_key: Option<Box<RawValue>>,
    pub message_hmac: Option<Box<RawValue>>,
    pub ephemeral_public_key: Option<Box<RawValue>>,
}

impl SendMessage {
    pub fn sender(&self) -> Option<&str> {
        non_empty(&self.sender)
    }

    pub fn recipient(&self) -> Option<&str> {
        non_empty(&self.recipient)
    }
}

// Payload fields stay out of Debug output so they cannot reach a log line.
impl fmt::Debug for SendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendMessage")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .finish_non_exhaustive()
    }
}

/// Payload delivered to the recipient of a `send_message`.
#[derive(Clone, Serialize)]
pub struct RelayedMessage {
    pub sender: String,
    pub encrypted_message: Box<RawValue>,
    pub encrypted_aes_key: Option<Box<RawValue>>,
    pub message_hmac: Option<Box<RawValue>>,
    pub ephemeral_public_key: Option<Box<RawValue>>,
    /// Server delivery time, RFC 3339.
    pub timestamp: String,
}

impl fmt::Debug for RelayedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayedMessage")
            .field("sender", &self.sender)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Outbound event to a client connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined {
        username: String,
        online_users: Vec<String>,
    },
    UserJoined {
        username: String,
        online_users: Vec<String>,
    },
    UserLeft {
        username: String,
    },
    OnlineUsers {
        users: Vec<String>,
    },
    PublicKeyResponse {
        username: String,
        public_key: Box<RawValue>,
    },
    ReceiveMessage(RelayedMessage),
    Error {
        message: String,
        code: String,
    },
}

impl ServerEvent {
    pub fn error(err: &RelayError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::OnlineUsers { .. } => "online_users",
            ServerEvent::PublicKeyResponse { .. } => "public_key_response",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::Error { .. } => "error",
        }
    }
}
