//! Out-of-band one-time-code delivery.

use crate::error::RelayError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Mutex;

/// Side channel that carries a freshly issued code to the phone owner.
///
/// Invoked after the verification store has released its lock, so
/// implementations may perform network I/O.
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, phone: &str, code: &SecretString) -> Result<(), RelayError>;
}

/// Keeps the last code sent to each phone in memory.
///
/// Used by tests and local simulations in place of a real SMS gateway.
#[derive(Debug, Default)]
pub struct MemoryDelivery {
    sent: Mutex<HashMap<String, String>>,
}

impl MemoryDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last code delivered to `phone` (normalized form).
    pub fn last_code(&self, phone: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(phone)
            .cloned()
    }
}

#[async_trait]
impl CodeDelivery for MemoryDelivery {
    async fn deliver(&self, phone: &str, code: &SecretString) -> Result<(), RelayError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(phone.to_string(), code.expose_secret().clone());
        Ok(())
    }
}
