//! Transport layer abstraction
//!
//! This module provides a pluggable bridge transport supporting:
//! - An in-process relay hub (for testing and demos)
//! - WebSocket connections to a bridge server
//!
//! # Design
//!
//! The transport only moves topic-addressed text frames between the
//! interactor and the bridge. It has no knowledge of the JSON-RPC layer and
//! never sees plaintext: encryption is handled by the interactor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod websocket;
pub use websocket::WebSocketTransport;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Frame type on the bridge wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Publish a payload to a topic
    Pub,
    /// Subscribe to a topic
    Sub,
}

/// A frame exchanged with the bridge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    /// Topic the frame is addressed to
    pub topic: String,
    /// Frame type
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Opaque payload (a sealed JSON-RPC message for `pub` frames)
    pub payload: String,
    /// Hint to the bridge that no push notification should be triggered
    #[serde(default)]
    pub silent: bool,
}

impl RelayFrame {
    /// A `pub` frame
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>, silent: bool) -> Self {
        RelayFrame {
            topic: topic.into(),
            kind: FrameKind::Pub,
            payload: payload.into(),
            silent,
        }
    }

    /// A `sub` frame
    pub fn subscribe(topic: impl Into<String>) -> Self {
        RelayFrame {
            topic: topic.into(),
            kind: FrameKind::Sub,
            payload: String::new(),
            silent: true,
        }
    }
}

/// Events delivered by an open transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame published on one of our topics
    Message(RelayFrame),
    /// The connection is gone, with an optional cause
    Closed(Option<String>),
}

/// Receiving side of an open transport
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Abstract transport trait
///
/// All transports must implement this trait. Methods take `&self` so one
/// transport can be shared between the inbound loop and concurrent senders.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the bridge and return the inbound event stream
    async fn open(&self, relay_url: &str) -> TransportResult<EventStream>;

    /// Subscribe to a topic
    async fn subscribe(&self, topic: &str) -> TransportResult<()>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: String, silent: bool) -> TransportResult<()>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&self) -> TransportResult<()>;
}

/// In-memory relay for testing
///
/// A hub holding topic subscriptions; every endpoint created from it behaves
/// like a separate bridge connection. Frames published to a topic with no
/// subscriber are held until someone subscribes, as a bridge server does.
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct HubState {
        next_endpoint: usize,
        subscribers: HashMap<String, Vec<(usize, mpsc::UnboundedSender<TransportEvent>)>>,
        held: HashMap<String, Vec<RelayFrame>>,
        history: Vec<RelayFrame>,
        reachable: bool,
        open_delay: Option<Duration>,
    }

    /// Shared in-process relay
    #[derive(Clone)]
    pub struct MemoryRelay {
        hub: Arc<Mutex<HubState>>,
    }

    impl Default for MemoryRelay {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryRelay {
        /// Create an empty relay
        pub fn new() -> Self {
            MemoryRelay {
                hub: Arc::new(Mutex::new(HubState {
                    reachable: true,
                    ..HubState::default()
                })),
            }
        }

        /// Create a new, not yet opened, connection to this relay
        pub fn endpoint(&self) -> MemoryTransport {
            let mut hub = self.hub.lock();
            hub.next_endpoint += 1;
            MemoryTransport {
                hub: self.hub.clone(),
                id: hub.next_endpoint,
                tx: Mutex::new(None),
            }
        }

        /// Make subsequent `open` calls fail
        pub fn set_reachable(&self, reachable: bool) {
            self.hub.lock().reachable = reachable;
        }

        /// Delay subsequent `open` calls
        pub fn set_open_delay(&self, delay: Option<Duration>) {
            self.hub.lock().open_delay = delay;
        }

        /// Every `pub` frame seen by the relay, in order
        pub fn published(&self) -> Vec<RelayFrame> {
            self.hub.lock().history.clone()
        }

        /// `pub` frames addressed to `topic`, in order
        pub fn published_to(&self, topic: &str) -> Vec<RelayFrame> {
            self.hub
                .lock()
                .history
                .iter()
                .filter(|f| f.topic == topic)
                .cloned()
                .collect()
        }

        /// Deliver a raw frame as if some peer had published it
        pub fn inject(&self, frame: RelayFrame) {
            route(&mut self.hub.lock(), 0, frame);
        }

        /// Drop every open connection, reporting `reason` to each endpoint
        pub fn shutdown(&self, reason: &str) {
            let mut hub = self.hub.lock();
            let mut endpoints = HashMap::new();
            for (_, subs) in hub.subscribers.drain() {
                endpoints.extend(subs);
            }
            for tx in endpoints.into_values() {
                let _ = tx.send(TransportEvent::Closed(Some(reason.to_string())));
            }
        }
    }

    fn route(hub: &mut HubState, sender: usize, frame: RelayFrame) {
        hub.history.push(frame.clone());
        let delivered = match hub.subscribers.get(&frame.topic) {
            Some(subs) => {
                let mut any = false;
                for (id, tx) in subs.iter().filter(|(id, _)| *id != sender) {
                    if tx.send(TransportEvent::Message(frame.clone())).is_ok() {
                        any = true;
                    } else {
                        tracing::trace!(endpoint = id, "dropping frame for closed endpoint");
                    }
                }
                any
            }
            None => false,
        };
        if !delivered {
            hub.held.entry(frame.topic.clone()).or_default().push(frame);
        }
    }

    /// In-memory transport endpoint
    pub struct MemoryTransport {
        hub: Arc<Mutex<HubState>>,
        id: usize,
        tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    }

    impl MemoryTransport {
        fn sender(&self) -> TransportResult<mpsc::UnboundedSender<TransportEvent>> {
            self.tx.lock().clone().ok_or(TransportError::Disconnected)
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open(&self, _relay_url: &str) -> TransportResult<EventStream> {
            let (reachable, delay) = {
                let hub = self.hub.lock();
                (hub.reachable, hub.open_delay)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if !reachable {
                return Err(TransportError::ConnectionFailed("relay unreachable".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            *self.tx.lock() = Some(tx);
            Ok(rx)
        }

        async fn subscribe(&self, topic: &str) -> TransportResult<()> {
            let tx = self.sender()?;
            let mut hub = self.hub.lock();
            if let Some(held) = hub.held.remove(topic) {
                for frame in held {
                    let _ = tx.send(TransportEvent::Message(frame));
                }
            }
            hub.subscribers
                .entry(topic.to_string())
                .or_default()
                .push((self.id, tx));
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: String, silent: bool) -> TransportResult<()> {
            self.sender()?;
            route(
                &mut self.hub.lock(),
                self.id,
                RelayFrame::publish(topic, payload, silent),
            );
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
        }

        async fn close(&self) -> TransportResult<()> {
            self.tx.lock().take();
            let mut hub = self.hub.lock();
            for subs in hub.subscribers.values_mut() {
                subs.retain(|(id, _)| *id != self.id);
            }
            Ok(())
        }
    }
}
