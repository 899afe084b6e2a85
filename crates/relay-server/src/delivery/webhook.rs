//! SMS gateway delivery over HTTP.

use async_trait::async_trait;
use relay_core::{redact_phone, CodeDelivery, RelayError};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    body: String,
}

/// POSTs `{to, body}` to an SMS gateway.
#[derive(Clone)]
pub struct WebhookDelivery {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookDelivery {
    pub fn new(url: impl Into<String>, token: Option<SecretString>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl CodeDelivery for WebhookDelivery {
    #[instrument(skip(self, phone, code), fields(phone = %redact_phone(phone)))]
    async fn deliver(&self, phone: &str, code: &SecretString) -> Result<(), RelayError> {
        let request = SmsRequest {
            to: phone,
            body: format!("Your verification code is {}", code.expose_secret()),
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "SMS gateway unreachable");
            RelayError::DeliveryFailed("SMS gateway unreachable".into())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "SMS gateway rejected request");
            return Err(RelayError::DeliveryFailed(format!(
                "SMS gateway returned {}",
                status.as_u16()
            )));
        }

        debug!("Code handed to SMS gateway");
        Ok(())
    }
}
