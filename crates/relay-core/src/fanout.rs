//! Per-connection outboxes and presence broadcast.

use crate::presence::ConnectionId;
use crate::protocol::ServerEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, warn};

/// Backlog at which a slow reader gets logged. Logged again each time the
/// backlog doubles.
pub const DEEP_OUTBOX: usize = 1024;

struct Outbox {
    tx: mpsc::UnboundedSender<ServerEvent>,
    depth: Arc<AtomicUsize>,
}

/// Receiving half of a connection's outbox.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    depth: Arc<AtomicUsize>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        let event = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(event)
    }

    pub fn try_recv(&mut self) -> Result<ServerEvent, TryRecvError> {
        let event = self.rx.try_recv()?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Ok(event)
    }

    /// Events queued but not yet received.
    pub fn queued(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Outbound event queues keyed by connection.
///
/// Enqueueing never blocks, so broadcasts can run while the presence
/// registry lock is held. Each outbox is FIFO, which makes the order a
/// connection observes equal to the order events were enqueued. Queues are
/// unbounded; their depth is tracked and reported instead.
#[derive(Default)]
pub struct EventFanout {
    outboxes: DashMap<ConnectionId, Outbox>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the outbox for a new connection.
    pub fn attach(&self, connection_id: ConnectionId) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        self.outboxes.insert(
            connection_id,
            Outbox {
                tx,
                depth: depth.clone(),
            },
        );
        EventReceiver { rx, depth }
    }

    /// Drop the outbox. The receiver sees end-of-stream once drained.
    pub fn detach(&self, connection_id: ConnectionId) -> bool {
        self.outboxes.remove(&connection_id).is_some()
    }

    /// Queue `event` for one connection. Returns `false` if the connection
    /// is gone.
    pub fn unicast(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.outboxes.get(&connection_id) {
            Some(outbox) => push(connection_id, &outbox, event),
            None => false,
        }
    }

    /// Largest backlog across all outboxes.
    pub fn deepest(&self) -> usize {
        self.outboxes
            .iter()
            .map(|entry| entry.value().depth.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }

    /// Confirm a join to the joining connection.
    pub fn notify_joined(&self, connection_id: ConnectionId, username: &str, online: &[String]) {
        self.unicast(
            connection_id,
            ServerEvent::Joined {
                username: username.to_string(),
                online_users: online.to_vec(),
            },
        );
    }

    /// Announce a join to every connection except the joiner.
    pub fn broadcast_join(&self, joiner: ConnectionId, username: &str, online: &[String]) -> usize {
        self.broadcast(
            Some(joiner),
            ServerEvent::UserJoined {
                username: username.to_string(),
                online_users: online.to_vec(),
            },
        )
    }

    /// Announce a departure to every remaining connection.
    pub fn broadcast_leave(&self, username: &str) -> usize {
        self.broadcast(
            None,
            ServerEvent::UserLeft {
                username: username.to_string(),
            },
        )
    }

    fn broadcast(&self, except: Option<ConnectionId>, event: ServerEvent) -> usize {
        let mut sent = 0;
        for entry in self.outboxes.iter() {
            if Some(*entry.key()) == except {
                continue;
            }
            if push(*entry.key(), entry.value(), event.clone()) {
                sent += 1;
            }
        }
        debug!(event = event.name(), recipients = sent, "Broadcast queued");
        sent
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}

fn push(connection_id: ConnectionId, outbox: &Outbox, event: ServerEvent) -> bool {
    let depth = outbox.depth.fetch_add(1, Ordering::Relaxed) + 1;
    if outbox.tx.send(event).is_err() {
        outbox.depth.fetch_sub(1, Ordering::Relaxed);
        return false;
    }
    if depth >= DEEP_OUTBOX && depth.is_power_of_two() {
        warn!(%connection_id, depth, "Outbox backlog growing");
    }
    true
}
