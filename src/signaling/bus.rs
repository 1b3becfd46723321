//! Message bus connection
//!
//! The agent sees the bus as a [`BusHandle`] for sending and a stream of
//! [`BusEvent`]s. The WebSocket connector owns the socket on its own task and
//! reconnects with a linear backoff; [`MessageBus::in_memory`] gives tests the
//! server end directly.

use super::message::Outbound;
use crate::config::BusConfig;
use crate::errors::StreamError;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Connected,
    Disconnected,
    /// One inbound text frame
    Message(String),
}

/// Sending side of the bus, cheap to clone.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
}

impl BusHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Serialize and queue one message. Fails while disconnected.
    pub fn send(&self, message: &Outbound) -> Result<(), StreamError> {
        if !self.is_connected() {
            return Err(StreamError::Bus(format!(
                "not connected, dropping {}",
                message.event_name()
            )));
        }
        let text = message.to_text()?;
        self.tx
            .send(text)
            .map_err(|_| StreamError::Bus("bus connection task has stopped".to_string()))
    }
}

/// Reconnect behaviour of the WebSocket connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt.max(1))
    }
}

impl From<&BusConfig> for ReconnectPolicy {
    fn from(config: &BusConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

/// Agent end of a bus connection.
pub struct MessageBus {
    handle: BusHandle,
    events: mpsc::UnboundedReceiver<BusEvent>,
    task: Option<JoinHandle<()>>,
}

impl MessageBus {
    /// A connected pair: the agent end and the server end.
    pub fn in_memory() -> (MessageBus, BusPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let bus = MessageBus {
            handle: BusHandle {
                tx: out_tx,
                connected: connected.clone(),
            },
            events: event_rx,
            task: None,
        };
        let peer = BusPeer {
            sent: out_rx,
            events: event_tx,
            connected,
        };
        (bus, peer)
    }

    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    /// Next bus event. `None` once the connection task has given up.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.events.recv().await
    }

    pub fn close(&mut self) {
        self.handle.connected.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect to a WebSocket server, reconnecting on loss.
///
/// Returns immediately; the first [`BusEvent::Connected`] arrives once the
/// handshake completes. After `policy.max_attempts` consecutive failures the
/// event stream ends.
pub fn connect_websocket(url: impl Into<String>, policy: ReconnectPolicy) -> MessageBus {
    let url = url.into();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(websocket_task(
        url,
        policy,
        out_rx,
        event_tx,
        connected.clone(),
    ));

    MessageBus {
        handle: BusHandle {
            tx: out_tx,
            connected,
        },
        events: event_rx,
        task: Some(task),
    }
}

async fn websocket_task(
    url: String,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<BusEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut failures = 0u32;

    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                log::info!("Connected to message bus at {}", url);
                failures = 0;

                // Anything queued while offline is stale.
                while outbound.try_recv().is_ok() {}

                connected.store(true, Ordering::Release);
                if events.send(BusEvent::Connected).is_err() {
                    return;
                }

                let (mut sink, mut stream) = socket.split();
                let keep_going = loop {
                    tokio::select! {
                        out = outbound.recv() => match out {
                            Some(text) => {
                                if let Err(e) = sink.send(Message::Text(text)).await {
                                    log::warn!("Bus send failed: {}", e);
                                    break true;
                                }
                            }
                            None => break false,
                        },
                        incoming = stream.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if events.send(BusEvent::Message(text.to_string())).is_err() {
                                    break false;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                log::info!("Message bus closed the connection: {:?}", frame);
                                break true;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                log::warn!("Bus receive failed: {}", e);
                                break true;
                            }
                            None => break true,
                        },
                    }
                };

                connected.store(false, Ordering::Release);
                if !keep_going || events.send(BusEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::warn!("Message bus connect to {} failed: {}", url, e);
            }
        }

        failures += 1;
        if failures > policy.max_attempts {
            log::error!(
                "Giving up on message bus after {} reconnect attempts",
                policy.max_attempts
            );
            return;
        }
        let delay = policy.delay_for(failures);
        log::info!(
            "Reconnecting to message bus in {:?} (attempt {}/{})",
            delay,
            failures,
            policy.max_attempts
        );
        tokio::time::sleep(delay).await;
    }
}

/// Server end of an in-memory bus.
pub struct BusPeer {
    sent: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<BusEvent>,
    connected: Arc<AtomicBool>,
}

impl BusPeer {
    pub fn connect(&self) {
        self.connected.store(true, Ordering::Release);
        let _ = self.events.send(BusEvent::Connected);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.events.send(BusEvent::Disconnected);
    }

    /// Deliver a raw text frame to the agent.
    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.events.send(BusEvent::Message(text.into()));
    }

    /// Deliver `{"event": event, "data": data}`.
    pub fn deliver_event(&self, event: &str, data: serde_json::Value) {
        self.deliver(serde_json::json!({ "event": event, "data": data }).to_string());
    }

    /// Everything the agent has sent so far, parsed.
    pub fn drain_sent(&mut self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                out.push(value);
            }
        }
        out
    }

    /// Sent messages with the given event name, parsed.
    pub fn drain_events(&mut self, event: &str) -> Vec<serde_json::Value> {
        self.drain_sent()
            .into_iter()
            .filter(|value| value["event"] == event)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::message::{Capabilities, RegisterDevice};

    fn register() -> Outbound {
        Outbound::RegisterDevice(RegisterDevice {
            device_id: "drone-001".to_string(),
            device_name: "Drone".to_string(),
            capabilities: Capabilities {
                width: 640,
                height: 480,
                fps: 30,
            },
        })
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (mut bus, mut peer) = MessageBus::in_memory();
        let handle = bus.handle();
        assert!(matches!(handle.send(&register()), Err(StreamError::Bus(_))));

        peer.connect();
        assert_eq!(bus.recv().await, Some(BusEvent::Connected));
        handle.send(&register()).unwrap();

        let sent = peer.drain_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], "register_device");
    }

    #[tokio::test]
    async fn test_peer_delivers_messages() {
        let (mut bus, peer) = MessageBus::in_memory();
        peer.deliver_event("start_webrtc", serde_json::json!({"device_id": "a"}));
        match bus.recv().await {
            Some(BusEvent::Message(text)) => assert!(text.contains("start_webrtc")),
            other => panic!("unexpected {:?}", other),
        }

        peer.disconnect();
        assert_eq!(bus.recv().await, Some(BusEvent::Disconnected));
        assert!(!bus.handle().is_connected());
    }

    #[test]
    fn test_linear_backoff() {
        let policy = ReconnectPolicy::from(&BusConfig::default());
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_connector_gives_up() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        };
        // Nothing listens on port 9 of the loopback interface.
        let mut bus = connect_websocket("ws://127.0.0.1:9/ws", policy);
        assert_eq!(bus.recv().await, None);
        assert!(!bus.handle().is_connected());
    }
}
