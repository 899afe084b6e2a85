//! Point-to-point forwarding of opaque encrypted payloads.

use crate::clock::Clock;
use crate::error::{RelayError, RelayResult};
use crate::fanout::EventFanout;
use crate::metrics::RelayMetrics;
use crate::presence::PresenceRegistry;
use crate::protocol::{is_present, RelayedMessage, SendMessage, ServerEvent};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// How the `sender` field of a `send_message` is trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderPolicy {
    /// Accept the sender named in the event body, as long as that user is
    /// online. Any connection can claim any online username.
    #[default]
    Asserted,
    /// The sender must be the username the calling connection joined as.
    Bound,
}

/// What happened to a routed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the recipient's connection.
    Delivered,
    /// Recipient disconnected between lookup and hand-off; payload lost.
    Dropped,
}

pub struct RelayRouter {
    presence: Arc<PresenceRegistry>,
    fanout: Arc<EventFanout>,
    clock: Arc<dyn Clock>,
    metrics: Arc<RelayMetrics>,
    policy: SenderPolicy,
}

impl RelayRouter {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        fanout: Arc<EventFanout>,
        clock: Arc<dyn Clock>,
        metrics: Arc<RelayMetrics>,
        policy: SenderPolicy,
    ) -> Self {
        Self {
            presence,
            fanout,
            clock,
            metrics,
            policy,
        }
    }

    pub fn policy(&self) -> SenderPolicy {
        self.policy
    }

    /// Forward `message` to its recipient.
    ///
    /// `caller` is the username the originating connection joined as, if
    /// any. Only sender and recipient names are ever logged.
    pub async fn route(&self, caller: Option<&str>, message: SendMessage) -> RelayResult<Delivery> {
        let (sender, recipient) = match (message.sender(), message.recipient()) {
            (Some(s), Some(r)) if is_present(&message.encrypted_message) => {
                (s.to_string(), r.to_string())
            }
            _ => return Err(RelayError::MissingFields("Missing required fields")),
        };

        if self.presence.lookup(&sender).await.is_none() {
            return Err(RelayError::NotLoggedIn);
        }

        if self.policy == SenderPolicy::Bound {
            match caller {
                None => return Err(RelayError::NotLoggedIn),
                Some(bound) if bound != sender => return Err(RelayError::SenderMismatch),
                Some(_) => {}
            }
        }

        let target = self
            .presence
            .lookup(&recipient)
            .await
            .ok_or_else(|| RelayError::RecipientOffline(recipient.clone()))?;

        let SendMessage {
            encrypted_message,
            encrypted_aes_key,
            message_hmac,
            ephemeral_public_key,
            ..
        } = message;
        let Some(encrypted_message) = encrypted_message else {
            return Err(RelayError::MissingFields("Missing required fields"));
        };

        let relayed = RelayedMessage {
            sender: sender.clone(),
            encrypted_message,
            encrypted_aes_key,
            message_hmac,
            ephemeral_public_key,
            timestamp: self.clock.now().to_rfc3339(),
        };

        if self
            .fanout
            .unicast(target.connection_id, ServerEvent::ReceiveMessage(relayed))
        {
            RelayMetrics::incr(&self.metrics.messages_relayed);
            info!(%sender, %recipient, "Encrypted payload forwarded");
            Ok(Delivery::Delivered)
        } else {
            RelayMetrics::incr(&self.metrics.messages_dropped);
            debug!(%sender, %recipient, "Recipient went away before delivery");
            Ok(Delivery::Dropped)
        }
    }
}
