//! Code delivery backends.

mod webhook;

#[cfg(feature = "dev-otp")]
mod log;

#[cfg(feature = "dev-otp")]
pub use log::LogDelivery;
pub use webhook::WebhookDelivery;

use crate::config::{DeliveryConfig, DeliveryMode};
use anyhow::{Context, Result};
use relay_core::CodeDelivery;
use std::sync::Arc;

/// Build the backend selected by configuration.
pub fn from_config(config: &DeliveryConfig) -> Result<Arc<dyn CodeDelivery>> {
    match config.mode {
        DeliveryMode::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .context("DELIVERY__WEBHOOK_URL is required in webhook mode")?;
            let delivery = WebhookDelivery::new(url, config.webhook_token.clone())
                .context("Failed to create webhook client")?;
            Ok(Arc::new(delivery))
        }
        #[cfg(feature = "dev-otp")]
        DeliveryMode::Log => Ok(Arc::new(LogDelivery)),
        #[cfg(not(feature = "dev-otp"))]
        DeliveryMode::Log => anyhow::bail!("delivery mode `log` requires the `dev-otp` feature"),
    }
}
