//! Per-connection state machine and the transport-owned connection registry.
use dashmap::DashMap;
use signal_core::EaMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionLifecycle {
    #[default]
    New,
    Ready,
    Closed,
}

/// Lifecycle plus a diagnostic breadcrumb for why a `Closed` connection
/// closed (liveness timeout, slow consumer, read/write error, ...). Not
/// part of the wire protocol; observability only.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub lifecycle: ConnectionLifecycle,
    pub last_disconnect_reason: Option<String>,
}

/// Registry-side view of one connection: its outbound queue and current
/// lifecycle state. Only `Ready` connections receive broadcasts.
pub struct ConnectionHandle {
    pub id: u64,
    outbound: mpsc::Sender<EaMessage>,
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionHandle {
    pub fn new(id: u64, outbound: mpsc::Sender<EaMessage>, state: Arc<RwLock<ConnectionState>>) -> Self {
        Self { id, outbound, state }
    }

    pub fn lifecycle(&self) -> ConnectionLifecycle {
        self.state.read().unwrap().lifecycle
    }

    pub fn last_disconnect_reason(&self) -> Option<String> {
        self.state.read().unwrap().last_disconnect_reason.clone()
    }

    /// Non-blocking enqueue; a full queue is the slow-consumer signal and is
    /// surfaced to the caller as `false` rather than blocking the publisher.
    pub fn try_send(&self, message: EaMessage) -> bool {
        self.outbound.try_send(message).is_ok()
    }
}

/// The only process-wide shared state the transport owns. One entry per
/// live TCP connection; removed when the connection closes.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<u64, ConnectionHandle>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id, handle);
    }

    pub fn remove(&self, id: u64) {
        self.connections.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Enqueues `message` on every `Ready` connection's outbound queue.
    /// Returns the number of connections it was actually enqueued on.
    pub fn broadcast_ready(&self, message: &EaMessage) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if entry.lifecycle() == ConnectionLifecycle::Ready && entry.try_send(message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signal_core::EaMessageType;

    fn heartbeat() -> EaMessage {
        EaMessage {
            message_type: EaMessageType::Heartbeat,
            data: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    fn state(lifecycle: ConnectionLifecycle) -> Arc<RwLock<ConnectionState>> {
        Arc::new(RwLock::new(ConnectionState { lifecycle, last_disconnect_reason: None }))
    }

    #[tokio::test]
    async fn broadcast_only_reaches_ready_connections() {
        let registry = ConnectionRegistry::new();

        let (tx_new, _rx_new) = mpsc::channel(4);
        registry.insert(ConnectionHandle::new(1, tx_new, state(ConnectionLifecycle::New)));

        let (tx_ready, mut rx_ready) = mpsc::channel(4);
        registry.insert(ConnectionHandle::new(2, tx_ready, state(ConnectionLifecycle::Ready)));

        let delivered = registry.broadcast_ready(&heartbeat());
        assert_eq!(delivered, 1);
        assert!(rx_ready.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_outbound_queue_is_not_counted_as_delivered() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(heartbeat()).unwrap(); // fill the single slot
        registry.insert(ConnectionHandle::new(1, tx, state(ConnectionLifecycle::Ready)));

        let delivered = registry.broadcast_ready(&heartbeat());
        assert_eq!(delivered, 0);
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.insert(ConnectionHandle::new(1, tx, state(ConnectionLifecycle::Ready)));
        assert_eq!(registry.len(), 1);
        registry.remove(1);
        assert!(registry.is_empty());
    }
}
