//! WebSocket transport for real-time communication via a bridge server
//!
//! Speaks the bridge's JSON frame protocol: every text message is a
//! [`RelayFrame`]. Subscriptions are `sub` frames, payloads travel in `pub`
//! frames. A background task reads the socket and forwards frames to the
//! event stream returned by [`Transport::open`].

use super::{EventStream, RelayFrame, Transport, TransportError, TransportEvent, TransportResult};
use crate::transport::FrameKind;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport connected to a bridge server
#[derive(Default)]
pub struct WebSocketTransport {
    sink: Mutex<Option<WsSink>>,
    connected: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Create an unconnected transport
    pub fn new() -> Self {
        Self::default()
    }

    async fn send_frame(&self, frame: &RelayFrame) -> TransportResult<()> {
        let json =
            serde_json::to_string(frame).map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::Disconnected)?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Map the bridge address from a pairing URI onto a WebSocket URL.
///
/// Pairing URIs carry `https://` bridge addresses; the socket itself lives
/// at the matching `wss://` address.
pub fn websocket_url(relay_url: &str) -> TransportResult<String> {
    let mut url = url::Url::parse(relay_url)
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid relay url: {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported relay scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::ConnectionFailed("cannot rewrite relay scheme".to_string()))?;
    Ok(url.to_string())
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, relay_url: &str) -> TransportResult<EventStream> {
        let ws_url = websocket_url(relay_url)?;
        let (ws, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(url = %ws_url, "bridge socket open");

        let (write, mut read) = ws.split();
        *self.sink.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = self.connected.clone();
        let handle = tokio::spawn(async move {
            let cause = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<RelayFrame>(&text) {
                        Ok(frame) if frame.kind == FrameKind::Pub => {
                            if tx.send(TransportEvent::Message(frame)).is_err() {
                                break None;
                            }
                        }
                        Ok(_) => continue,
                        Err(e) => warn!("ignoring malformed bridge frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    }
                    None => break None,
                    Some(Err(e)) => break Some(e.to_string()),
                    // tungstenite answers pings on the next write
                    Some(Ok(_)) => continue,
                }
            };
            connected.store(false, Ordering::SeqCst);
            let _ = tx.send(TransportEvent::Closed(cause));
        });
        *self.reader.lock() = Some(handle);

        Ok(rx)
    }

    async fn subscribe(&self, topic: &str) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.send_frame(&RelayFrame::subscribe(topic)).await
    }

    async fn publish(&self, topic: &str, payload: String, silent: bool) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.send_frame(&RelayFrame::publish(topic, payload, silent)).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        match self.sink.lock().await.take() {
            Some(mut sink) => sink
                .close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string())),
            None => Ok(()),
        }
    }
}
