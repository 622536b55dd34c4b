//! Registry of live connections.
//!
//! # Responsibilities
//! - Spawn each accepted connection on its own task
//! - Track live connections so they can be stopped individually or all at once
//! - Fan push messages out to every upgraded client
//! - Let shutdown wait until every connection task has exited
//!
//! # Design Decisions
//! - The registry is a `DashMap`; it is the only structure shared across connections
//! - A guard owned by the connection task removes the entry on exit, whatever
//!   the close reason
//! - Stopping is a message to the connection task, never a direct socket close

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::Instrument;

use crate::net::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::websocket::codec::PushMessage;

struct Inner {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    /// Number of connection tasks still running.
    active: watch::Sender<usize>,
}

/// Owns the set of running connections. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                active,
            }),
        }
    }

    /// Register `connection` and run it on a new task.
    pub fn start<S>(&self, connection: Connection<S>) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handle = connection.handle();
        let id = handle.id();
        self.inner.connections.insert(id, handle.clone());
        self.inner.active.send_modify(|n| *n += 1);
        let guard = ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id,
        };

        let span = tracing::debug_span!("connection", connection_id = %id, peer = %handle.peer());
        tokio::spawn(
            async move {
                let _guard = guard;
                connection.run().await
            }
            .instrument(span),
        );
        handle
    }

    /// Stop one connection. Returns false if it was not registered.
    pub fn stop(&self, id: ConnectionId) -> bool {
        match self.inner.connections.remove(&id) {
            Some((_, handle)) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every registered connection. Returns how many were asked to stop.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        self.inner.connections.retain(|_, handle| {
            handle.stop();
            stopped += 1;
            false
        });
        if stopped > 0 {
            tracing::info!(connections = stopped, "Stopping all connections");
        }
        stopped
    }

    /// Queue `message` on every upgraded connection. Returns the number of recipients.
    pub fn broadcast(&self, message: &PushMessage) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|entry| entry.is_upgraded())
            .filter(|entry| entry.push(message.clone()))
            .count()
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.inner.connections.get(&id).map(|entry| entry.clone())
    }

    /// Registered connections.
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Connection tasks still running, including stopped ones that are draining.
    pub fn active_count(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolves once no connection task is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = rx.wait_for(|active| *active == 0).await;
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks a connection task's lifetime.
/// Deregisters the connection when dropped.
struct ConnectionGuard {
    inner: Arc<Inner>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.connections.remove(&self.id);
        self.inner.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection deregistered");
    }
}
