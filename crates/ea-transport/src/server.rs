//! Acceptor task and per-connection read/write handlers.
use crate::connection::{ConnectionHandle, ConnectionLifecycle, ConnectionRegistry, ConnectionState};
use crate::frame;
use chrono::Utc;
use signal_core::{CoreError, CoreResult, EaMessage, EaMessageType, Signal, SignalPayload};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Invoked synchronously, in arrival order, under the connection's own task
/// for every inbound message. A panic or `Err` here never closes the
/// connection; it is only logged.
pub trait MessageSubscriber: Send + Sync {
    fn on_message(&self, message: &EaMessage) -> CoreResult<()>;
}

#[derive(Debug, Clone)]
pub struct EaTransportConfig {
    pub bind_addr: String,
    pub max_frame_bytes: usize,
    pub ea_info_window: Duration,
    pub heartbeat_interval: Duration,
    pub slow_consumer_timeout: Duration,
    pub outbound_queue_capacity: usize,
}

impl Default for EaTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9443".to_string(),
            max_frame_bytes: 1 << 16,
            ea_info_window: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            slow_consumer_timeout: Duration::from_secs(5),
            outbound_queue_capacity: 256,
        }
    }
}

pub struct EaServer {
    config: EaTransportConfig,
    registry: Arc<ConnectionRegistry>,
    subscribers: Vec<Arc<dyn MessageSubscriber>>,
}

impl EaServer {
    pub fn new(config: EaTransportConfig, subscribers: Vec<Arc<dyn MessageSubscriber>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            subscribers,
        })
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Builds the `SIGNAL` frame for `signal` and enqueues it on every ready
    /// connection. Returns the number of connections it reached.
    pub fn publish_signal(&self, signal: &Signal, magic_number: i64) -> usize {
        let payload = SignalPayload {
            signal_id: signal.id.clone(),
            instrument: signal.symbol.clone(),
            action: match signal.side {
                signal_core::Side::Buy => signal_core::EaAction::Buy,
                signal_core::Side::Sell => signal_core::EaAction::Sell,
            },
            volume: signal.position_size_frac,
            stop_loss: Some(signal.stop),
            take_profit: Some(signal.target),
            magic_number,
            comment: format!("strength={:?} rr={:.2}", signal.strength, signal.rr_ratio),
            confidence: signal.confidence,
        };
        let message = EaMessage {
            message_type: EaMessageType::Signal,
            data: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        };
        self.registry.broadcast_ready(&message)
    }

    /// Runs the acceptor loop until `shutdown` reports `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> CoreResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| CoreError::Fatal(format!("failed to bind {}: {e}", self.config.bind_addr)))?;
        tracing::info!(addr = %self.config.bind_addr, "EA transport listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let server = self.clone();
                            tokio::spawn(async move { server.handle_connection(stream, addr).await; });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("EA transport shutting down");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let id = self.registry.allocate_id();
        tracing::info!(connection_id = id, %addr, "EA connected");

        let (mut read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<EaMessage>(self.config.outbound_queue_capacity);
        let state = Arc::new(RwLock::new(ConnectionState::default()));
        self.registry.insert(ConnectionHandle::new(id, tx, state.clone()));

        let slow_timeout = self.config.slow_consumer_timeout;
        let heartbeat_interval = self.config.heartbeat_interval;
        let write_state = state.clone();
        let write_task = tokio::spawn(async move {
            let mut idle = tokio::time::interval(heartbeat_interval);
            idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let message = tokio::select! {
                    received = rx.recv() => match received {
                        Some(m) => m,
                        None => break,
                    },
                    _ = idle.tick() => EaMessage {
                        message_type: EaMessageType::Heartbeat,
                        data: serde_json::Value::Null,
                        timestamp: Utc::now(),
                    },
                };
                idle.reset();

                let frame = match frame::encode(&message) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(connection_id = id, error = %e, "failed to encode outbound message");
                        continue;
                    }
                };
                match tokio::time::timeout(slow_timeout, write_half.write_all(&frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(connection_id = id, error = %e, "outbound write error, closing");
                        write_state.write().unwrap().last_disconnect_reason = Some(format!("write error: {e}"));
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(connection_id = id, "slow consumer, closing");
                        write_state.write().unwrap().last_disconnect_reason = Some("slow consumer".to_string());
                        break;
                    }
                }
            }
        });

        let subscribers = self.subscribers.clone();
        let max_frame_bytes = self.config.max_frame_bytes;
        let ea_info_window = self.config.ea_info_window;
        let heartbeat_interval = self.config.heartbeat_interval;
        let read_state = state.clone();

        let read_task = tokio::spawn(async move {
            let ready_by = tokio::time::Instant::now() + ea_info_window;
            loop {
                let is_new = read_state.read().unwrap().lifecycle == ConnectionLifecycle::New;
                let budget = if is_new {
                    ready_by.saturating_duration_since(tokio::time::Instant::now())
                } else {
                    heartbeat_interval * 2
                };
                if is_new && budget.is_zero() {
                    tracing::warn!(connection_id = id, "EA_INFO not received within window, closing");
                    read_state.write().unwrap().last_disconnect_reason = Some("no EA_INFO in window".to_string());
                    break;
                }

                let outcome = tokio::time::timeout(budget, frame::read_frame(&mut read_half, max_frame_bytes)).await;
                let message = match outcome {
                    Ok(Ok(Some(m))) => m,
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        tracing::warn!(connection_id = id, error = %e, "read error, closing");
                        read_state.write().unwrap().last_disconnect_reason = Some(format!("read error: {e}"));
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(connection_id = id, "liveness timeout, closing");
                        read_state.write().unwrap().last_disconnect_reason = Some("liveness timeout".to_string());
                        break;
                    }
                };

                if is_new {
                    if message.message_type == EaMessageType::EaInfo {
                        read_state.write().unwrap().lifecycle = ConnectionLifecycle::Ready;
                        tracing::info!(connection_id = id, "EA connection ready");
                    } else {
                        tracing::warn!(connection_id = id, "first message was not EA_INFO, closing");
                        read_state.write().unwrap().last_disconnect_reason =
                            Some("first message was not EA_INFO".to_string());
                        break;
                    }
                }

                for subscriber in &subscribers {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_message(&message)));
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(connection_id = id, error = %e, "subscriber error"),
                        Err(_) => tracing::error!(connection_id = id, "subscriber panicked"),
                    }
                }
            }
        });

        tokio::select! {
            _ = write_task => {},
            _ = read_task => {},
        }
        state.write().unwrap().lifecycle = ConnectionLifecycle::Closed;
        let reason = state.read().unwrap().last_disconnect_reason.clone();
        self.registry.remove(id);
        tracing::info!(connection_id = id, reason = ?reason, "EA connection closed");
    }
}
