//! Broadcast hub — live connection registry and change fan-out.
//!
//! DESIGN
//! ======
//! Each connection owns a bounded outbound queue. The hub never writes to a
//! socket: it only enqueues with `try_send`, and the per-connection
//! websocket task drains the queue. A connection whose queue is full is
//! closed; dropping its sender ends the websocket task, which closes the
//! socket. One slow client therefore never delays another or a mutation.
//!
//! The hub owns each connection's [`ConnectionState`]. A connection is
//! registered as `Connecting` and receives nothing until it opens. Opening
//! happens under the registry read lock, so the snapshot a client receives
//! and the first change it is eligible for are contiguous. Each connection
//! remembers the last version it was sent; changes at or below that version
//! are skipped, so nothing is delivered twice.
//!
//! A closed connection stays tracked until its task deregisters, so a task
//! stuck on a dead socket is visible in [`Hub::tracked`].
//!
//! Lock order is registry, then hub. The fan-out task only takes the hub lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wire::ServerMessage;

use crate::services::registry::{Registry, RegistryChange};

pub type ConnectionId = Uuid;

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Lifecycle of one live connection. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid connection transition {from:?} -> {to:?}")]
    InvalidTransition { from: ConnectionState, to: ConnectionState },
    #[error("outbound queue rejected the snapshot")]
    SnapshotRejected,
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

impl ConnectionState {
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open) | (Self::Connecting, Self::Closed) | (Self::Open, Self::Closed)
        )
    }

    /// # Errors
    ///
    /// Returns [`HubError::InvalidTransition`] for any move out of `Closed`
    /// or back to an earlier state.
    pub fn transition(self, next: Self) -> Result<Self, HubError> {
        if self.can_transition(next) { Ok(next) } else { Err(HubError::InvalidTransition { from: self, to: next }) }
    }
}

// =============================================================================
// HUB
// =============================================================================

struct Connection {
    state: ConnectionState,
    /// `None` once closed; dropping the sender ends the websocket task.
    tx: Option<mpsc::Sender<ServerMessage>>,
    /// Highest version already queued to this connection.
    last_version: AtomicU64,
}

impl Connection {
    /// Move to `Closed` and release the queue. Returns `false` if already closed.
    fn close(&mut self) -> bool {
        match self.state.transition(ConnectionState::Closed) {
            Ok(next) => {
                self.state = next;
                self.tx = None;
                true
            }
            Err(_) => false,
        }
    }
}

/// Outcome counters of a single fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
}

/// Shared handle to the set of live connections. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    connections: Arc<RwLock<HashMap<ConnectionId, Connection>>>,
    queue_capacity: usize,
}

impl Hub {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self { connections: Arc::new(RwLock::new(HashMap::new())), queue_capacity: queue_capacity.max(1) }
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Track a new connection in `Connecting`. It receives nothing until [`Hub::open`].
    pub async fn register(&self, tx: mpsc::Sender<ServerMessage>) -> ConnectionId {
        let conn_id = Uuid::new_v4();
        let conn = Connection { state: ConnectionState::Connecting, tx: Some(tx), last_version: AtomicU64::new(0) };
        self.connections.write().await.insert(conn_id, conn);
        debug!(%conn_id, "hub: connection registered");
        conn_id
    }

    /// Queue a SNAPSHOT for a `Connecting` connection, then mark it `Open`.
    /// Returns the snapshot version.
    ///
    /// # Errors
    ///
    /// - [`HubError::UnknownConnection`] if `conn_id` is not tracked
    /// - [`HubError::InvalidTransition`] unless the connection is `Connecting`
    /// - [`HubError::SnapshotRejected`] if the queue is closed or full; the
    ///   connection is forgotten
    pub async fn open(&self, registry: &Registry, conn_id: ConnectionId) -> Result<u64, HubError> {
        let view = registry.read().await;
        let version = view.version();
        let mut connections = self.connections.write().await;
        let conn = connections.get_mut(&conn_id).ok_or(HubError::UnknownConnection(conn_id))?;
        let next = conn.state.transition(ConnectionState::Open)?;

        let snapshot = ServerMessage::Snapshot { version, spaces: view.spaces() };
        if conn.tx.as_ref().is_none_or(|tx| tx.try_send(snapshot).is_err()) {
            connections.remove(&conn_id);
            return Err(HubError::SnapshotRejected);
        }
        conn.last_version.store(version, Ordering::Release);
        conn.state = next;
        drop(connections);
        drop(view);

        info!(%conn_id, version, "hub: connection open");
        Ok(version)
    }

    /// Register and open in one step.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::SnapshotRejected`] if the queue is closed or already full.
    pub async fn on_connect(
        &self,
        registry: &Registry,
        tx: mpsc::Sender<ServerMessage>,
    ) -> Result<ConnectionId, HubError> {
        let conn_id = self.register(tx).await;
        self.open(registry, conn_id).await?;
        Ok(conn_id)
    }

    /// Forget a connection. Returns `false` if it was already gone.
    pub async fn on_disconnect(&self, conn_id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&conn_id).is_some();
        if removed {
            info!(%conn_id, "hub: connection closed");
        }
        removed
    }

    /// Lifecycle state of a connection. Untracked connections are `Closed`.
    pub async fn state(&self, conn_id: ConnectionId) -> ConnectionState {
        self.connections.read().await.get(&conn_id).map_or(ConnectionState::Closed, |c| c.state)
    }

    /// Connections currently `Open`.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.values().filter(|c| c.state == ConnectionState::Open).count()
    }

    /// Every connection whose task has not yet deregistered, in any state.
    pub async fn tracked(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queue a DELTA for `change` on every open connection that has not seen it.
    ///
    /// Connections whose queue is full or closed move to `Closed`.
    pub async fn on_registry_change(&self, change: &RegistryChange) -> FanoutReport {
        let mut report = FanoutReport::default();
        let mut stale = Vec::new();

        {
            let connections = self.connections.read().await;
            for (conn_id, conn) in connections.iter() {
                let Some(tx) = conn.tx.as_ref().filter(|_| conn.state == ConnectionState::Open) else {
                    continue;
                };
                if change.version <= conn.last_version.load(Ordering::Acquire) {
                    report.skipped += 1;
                    continue;
                }

                let delta = ServerMessage::Delta { version: change.version, spaces: change.spaces.clone() };
                match tx.try_send(delta) {
                    Ok(()) => {
                        conn.last_version.store(change.version, Ordering::Release);
                        report.delivered += 1;
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(%conn_id, version = change.version, "hub: outbound queue full; dropping slow connection");
                        stale.push(*conn_id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(%conn_id, "hub: outbound queue closed");
                        stale.push(*conn_id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut connections = self.connections.write().await;
            for conn_id in &stale {
                if connections.get_mut(conn_id).is_some_and(Connection::close) {
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Close every connection, ending their websocket tasks. Returns the count closed.
    pub async fn close_all(&self) -> usize {
        let mut connections = self.connections.write().await;
        connections.values_mut().map(Connection::close).filter(|closed| *closed).count()
    }
}

/// Spawn the single consumer of the registry change stream.
pub fn spawn_fanout_task(hub: Hub, mut changes: mpsc::UnboundedReceiver<RegistryChange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            let report = hub.on_registry_change(&change).await;
            debug!(
                version = change.version,
                delivered = report.delivered,
                skipped = report.skipped,
                dropped = report.dropped,
                "hub: change fanned out"
            );
        }
        info!("hub: change stream ended");
    })
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
