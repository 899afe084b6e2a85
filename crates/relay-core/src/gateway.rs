//! Connection lifecycle and event dispatch.
//!
//! Each transport connection moves through `Connected → Joined → Closed`.
//! All transitions for one connection happen under that connection's own
//! mutex, so a disconnect racing a join or send on the same connection is
//! serialized: whichever takes the lock first completes, and anything that
//! arrives after close is ignored.

use crate::clock::Clock;
use crate::error::{RelayError, RelayResult};
use crate::fanout::{EventFanout, EventReceiver};
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::phone::{normalize_phone, redact_phone};
use crate::presence::{ConnectionId, ParticipantSession, PresenceRegistry};
use crate::protocol::{ClientEvent, JoinRequest, PublicKeyRequest, ServerEvent};
use crate::router::{RelayRouter, SenderPolicy};
use crate::verification::VerificationStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lifecycle state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, no identity bound.
    Connected,
    /// Identity bound after a successful join.
    Joined { username: String },
    /// Terminal.
    Closed,
}

struct Connection {
    state: Mutex<ConnectionState>,
}

pub struct Gateway {
    verification: Arc<VerificationStore>,
    presence: Arc<PresenceRegistry>,
    fanout: Arc<EventFanout>,
    router: RelayRouter,
    clock: Arc<dyn Clock>,
    metrics: Arc<RelayMetrics>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
}

impl Gateway {
    pub fn new(
        verification: Arc<VerificationStore>,
        clock: Arc<dyn Clock>,
        policy: SenderPolicy,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let fanout = Arc::new(EventFanout::new());
        let metrics = Arc::new(RelayMetrics::default());
        let router = RelayRouter::new(
            presence.clone(),
            fanout.clone(),
            clock.clone(),
            metrics.clone(),
            policy,
        );

        Self {
            verification,
            presence,
            fanout,
            router,
            clock,
            metrics,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn verification(&self) -> &VerificationStore {
        &self.verification
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of joined participants.
    pub async fn online_count(&self) -> usize {
        self.presence.len().await
    }

    /// Number of open transport connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Largest number of events waiting in any one outbox.
    pub fn max_outbox_depth(&self) -> usize {
        self.fanout.deepest()
    }

    /// Accept a new transport connection.
    ///
    /// The returned receiver yields every event addressed to the connection
    /// and ends after [`Gateway::disconnect`].
    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let rx = self.fanout.attach(id);
        self.connections.insert(
            id,
            Arc::new(Connection {
                state: Mutex::new(ConnectionState::Connected),
            }),
        );
        RelayMetrics::incr(&self.metrics.connections_total);
        debug!(connection = %id, "Client connected");
        (id, rx)
    }

    /// Current state of a connection. Unknown or disconnected ids report
    /// `Closed`.
    pub async fn state(&self, id: ConnectionId) -> ConnectionState {
        match self.connection(id) {
            Some(conn) => conn.state.lock().await.clone(),
            None => ConnectionState::Closed,
        }
    }

    /// Dispatch one inbound event.
    pub async fn handle(&self, id: ConnectionId, event: ClientEvent) {
        let Some(conn) = self.connection(id) else {
            debug!(connection = %id, event = event.name(), "Event for closed connection ignored");
            return;
        };
        let mut state = conn.state.lock().await;
        if let ConnectionState::Closed = *state {
            return;
        }

        let result = match event {
            ClientEvent::Join(request) => self.join(id, &mut state, request).await,
            ClientEvent::GetOnlineUsers => {
                self.presence
                    .with_online(|users| {
                        self.fanout.unicast(
                            id,
                            ServerEvent::OnlineUsers {
                                users: users.to_vec(),
                            },
                        )
                    })
                    .await;
                Ok(())
            }
            ClientEvent::GetPublicKey(request) => self.public_key(id, request).await,
            ClientEvent::SendMessage(message) => {
                let caller = match &*state {
                    ConnectionState::Joined { username } => Some(username.as_str()),
                    _ => None,
                };
                self.router.route(caller, message).await.map(|_| ())
            }
        };

        if let Err(e) = result {
            self.send_error(id, &e);
        }
    }

    /// Report a transport-level decode failure to the connection.
    pub fn reject(&self, id: ConnectionId, error: &RelayError) {
        debug!(connection = %id, code = error.code(), "Rejected inbound frame");
        self.send_error(id, error);
    }

    /// Tear down a connection. Safe to call any number of times; only the
    /// first call has an effect.
    pub async fn disconnect(&self, id: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return;
        };
        let mut state = conn.state.lock().await;
        *state = ConnectionState::Closed;

        self.fanout.detach(id);

        let fanout = &self.fanout;
        let left = self
            .presence
            .unregister(id, |username| {
                fanout.broadcast_leave(username);
            })
            .await;

        match left {
            Some(username) => info!(%username, connection = %id, "User left"),
            None => debug!(connection = %id, "Client disconnected"),
        }
    }

    async fn join(
        &self,
        id: ConnectionId,
        state: &mut ConnectionState,
        request: JoinRequest,
    ) -> RelayResult<()> {
        if let ConnectionState::Joined { .. } = state {
            return Err(RelayError::AlreadyJoined);
        }

        let (username, phone, public_key) = request.fields().ok_or(RelayError::MissingFields(
            "Username, phone, and public key required",
        ))?;

        self.verification.check_bound(phone, username).await?;

        let phone = normalize_phone(phone)?;
        let session = ParticipantSession::new(
            username,
            id,
            public_key.to_owned(),
            phone.clone(),
            self.clock.now(),
        );

        let fanout = &self.fanout;
        let online = self
            .presence
            .register(session, |session, online| {
                fanout.notify_joined(id, &session.username, online);
                fanout.broadcast_join(id, &session.username, online);
            })
            .await?;

        *state = ConnectionState::Joined {
            username: username.to_string(),
        };
        RelayMetrics::incr(&self.metrics.joins_total);

        info!(
            %username,
            phone = %redact_phone(&phone),
            online = online.len(),
            "User joined"
        );
        Ok(())
    }

    async fn public_key(&self, id: ConnectionId, request: PublicKeyRequest) -> RelayResult<()> {
        let username = request
            .username
            .filter(|u| !u.is_empty())
            .ok_or(RelayError::MissingFields("Username required"))?;
        let session = self
            .presence
            .lookup(&username)
            .await
            .ok_or_else(|| RelayError::UserNotFound(username.clone()))?;

        self.fanout.unicast(
            id,
            ServerEvent::PublicKeyResponse {
                username,
                public_key: session.public_key,
            },
        );
        Ok(())
    }

    fn send_error(&self, id: ConnectionId, error: &RelayError) {
        RelayMetrics::incr(&self.metrics.errors_total);
        self.fanout.unicast(id, ServerEvent::error(error));
    }

    fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|c| c.value().clone())
    }
}
