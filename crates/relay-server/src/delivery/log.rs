//! Development backend that writes codes to the log.

use async_trait::async_trait;
use relay_core::{redact_phone, CodeDelivery, RelayError};
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

/// Logs every issued code at `warn`. Only compiled with `dev-otp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl CodeDelivery for LogDelivery {
    async fn deliver(&self, phone: &str, code: &SecretString) -> Result<(), RelayError> {
        warn!(
            phone = %redact_phone(phone),
            code = %code.expose_secret(),
            "DEV ONLY: verification code"
        );
        Ok(())
    }
}
