//! Presence registry: which username is bound to which live connection.

use crate::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

/// Opaque handle for a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A joined participant.
#[derive(Debug, Clone)]
pub struct ParticipantSession {
    pub username: String,
    pub connection_id: ConnectionId,
    /// Client-supplied public key, carried verbatim.
    pub public_key: Box<RawValue>,
    pub phone: String,
    pub joined_at: DateTime<Utc>,
    seq: u64,
}

impl ParticipantSession {
    pub fn new(
        username: impl Into<String>,
        connection_id: ConnectionId,
        public_key: Box<RawValue>,
        phone: impl Into<String>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            connection_id,
            public_key,
            phone: phone.into(),
            joined_at,
            seq: 0,
        }
    }
}

#[derive(Default)]
struct Sessions {
    by_username: HashMap<String, ParticipantSession>,
    by_connection: HashMap<ConnectionId, String>,
    next_seq: u64,
}

impl Sessions {
    fn online(&self) -> Vec<String> {
        let mut sessions: Vec<&ParticipantSession> = self.by_username.values().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions.into_iter().map(|s| s.username.clone()).collect()
    }
}

/// Username → session map with a connection → username index.
///
/// Mutations take an `on_commit` callback that runs while the write lock is
/// still held. Presence notifications enqueued from it are therefore ordered
/// exactly like the mutations themselves.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<Sessions>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session`, returning the online usernames after the insert.
    pub async fn register<F>(
        &self,
        mut session: ParticipantSession,
        on_commit: F,
    ) -> RelayResult<Vec<String>>
    where
        F: FnOnce(&ParticipantSession, &[String]),
    {
        let mut inner = self.inner.write().await;

        if inner.by_username.contains_key(&session.username) {
            return Err(RelayError::UsernameTaken);
        }
        if inner.by_connection.contains_key(&session.connection_id) {
            return Err(RelayError::AlreadyJoined);
        }

        session.seq = inner.next_seq;
        inner.next_seq += 1;

        let username = session.username.clone();
        inner
            .by_connection
            .insert(session.connection_id, username.clone());
        inner.by_username.insert(username.clone(), session);

        let online = inner.online();
        if let Some(session) = inner.by_username.get(&username) {
            on_commit(session, &online);
        }

        debug!(%username, online = online.len(), "Session registered");
        Ok(online)
    }

    /// Remove the session owned by `connection_id`, if any.
    ///
    /// Idempotent: a second call for the same connection is a no-op.
    pub async fn unregister<F>(&self, connection_id: ConnectionId, on_commit: F) -> Option<String>
    where
        F: FnOnce(&str),
    {
        let mut inner = self.inner.write().await;

        let username = inner.by_connection.remove(&connection_id)?;
        inner.by_username.remove(&username);
        on_commit(&username);

        debug!(%username, %connection_id, "Session unregistered");
        Some(username)
    }

    pub async fn lookup(&self, username: &str) -> Option<ParticipantSession> {
        self.inner.read().await.by_username.get(username).cloned()
    }

    /// Username bound to `connection_id`, if it has joined.
    pub async fn username_for(&self, connection_id: ConnectionId) -> Option<String> {
        self.inner
            .read()
            .await
            .by_connection
            .get(&connection_id)
            .cloned()
    }

    /// Online usernames in join order.
    pub async fn list_online(&self) -> Vec<String> {
        self.inner.read().await.online()
    }

    /// Run `on_read` against the online usernames while the read lock is
    /// held, so nothing it enqueues can be overtaken by a later mutation's
    /// `on_commit`.
    pub async fn with_online<F, T>(&self, on_read: F) -> T
    where
        F: FnOnce(&[String]) -> T,
    {
        let inner = self.inner.read().await;
        on_read(&inner.online())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_username.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(text: &str) -> Box<RawValue> {
        RawValue::from_string(format!("\"{}\"", text)).unwrap()
    }

    fn session(username: &str, conn: u64) -> ParticipantSession {
        ParticipantSession::new(
            username,
            ConnectionId::new(conn),
            key("pem"),
            "+15551234567",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = PresenceRegistry::new();

        let online = registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();
        assert_eq!(online, vec!["alice".to_string()]);

        let found = registry.lookup("alice").await.unwrap();
        assert_eq!(found.connection_id, ConnectionId::new(1));
        assert_eq!(found.public_key.get(), "\"pem\"");
        assert_eq!(
            registry.username_for(ConnectionId::new(1)).await.as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_register_duplicate_username() {
        let registry = PresenceRegistry::new();
        registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();

        let err = registry
            .register(session("alice", 2), |_, _| panic!("must not commit"))
            .await
            .unwrap_err();

        assert_eq!(err, RelayError::UsernameTaken);
        assert_eq!(registry.len().await, 1);
        assert!(registry.username_for(ConnectionId::new(2)).await.is_none());
    }

    #[tokio::test]
    async fn test_one_username_per_connection() {
        let registry = PresenceRegistry::new();
        registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();

        let err = registry
            .register(session("alice2", 1), |_, _| {})
            .await
            .unwrap_err();

        assert_eq!(err, RelayError::AlreadyJoined);
        assert!(registry.lookup("alice2").await.is_none());
    }

    #[tokio::test]
    async fn test_list_online_in_join_order() {
        let registry = PresenceRegistry::new();
        for (i, name) in ["carol", "alice", "bob"].iter().enumerate() {
            registry
                .register(session(name, i as u64), |_, _| {})
                .await
                .unwrap();
        }

        assert_eq!(registry.list_online().await, vec!["carol", "alice", "bob"]);

        registry.unregister(ConnectionId::new(1), |_| {}).await;
        assert_eq!(registry.list_online().await, vec!["carol", "bob"]);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = PresenceRegistry::new();
        registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();
        registry
            .register(session("bob", 2), |_, _| {})
            .await
            .unwrap();

        let removed = registry.unregister(ConnectionId::new(1), |_| {}).await;
        assert_eq!(removed.as_deref(), Some("alice"));

        let removed = registry
            .unregister(ConnectionId::new(1), |_| panic!("must not commit"))
            .await;
        assert!(removed.is_none());

        assert!(registry.lookup("bob").await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_username_reusable_after_unregister() {
        let registry = PresenceRegistry::new();
        registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();
        registry.unregister(ConnectionId::new(1), |_| {}).await;

        registry
            .register(session("alice", 2), |_, _| {})
            .await
            .unwrap();
        assert_eq!(
            registry.lookup("alice").await.unwrap().connection_id,
            ConnectionId::new(2)
        );
    }

    #[tokio::test]
    async fn test_commit_callback_sees_post_insert_snapshot() {
        let registry = PresenceRegistry::new();
        registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();

        let mut seen = Vec::new();
        registry
            .register(session("bob", 2), |s, online| {
                seen.push(s.username.clone());
                seen.extend(online.iter().cloned());
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["bob", "alice", "bob"]);
    }

    #[tokio::test]
    async fn test_read_callback_holds_lock() {
        let registry = PresenceRegistry::new();
        registry
            .register(session("alice", 1), |_, _| {})
            .await
            .unwrap();

        let users = registry
            .with_online(|online| {
                assert!(registry.inner.try_write().is_err());
                online.to_vec()
            })
            .await;

        assert_eq!(users, vec!["alice"]);
        assert!(registry.inner.try_write().is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_register_same_username() {
        let registry = Arc::new(PresenceRegistry::new());

        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(session("carol", i), |_, _| {}).await
            }));
        }

        let mut ok = 0;
        let mut taken = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RelayError::UsernameTaken) => taken += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(taken, 31);
        assert_eq!(registry.len().await, 1);
    }
}
