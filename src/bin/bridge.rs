//! WalletConnect Bridge Server
//!
//! A WebSocket relay that routes sealed frames between wallets and dApps.
//! The server provides:
//! - Topic based publish / subscribe
//! - Holding of frames published before anyone subscribed
//! - Zero-knowledge relaying (payloads are opaque ciphertext)
//!
//! Usage:
//!   wc-bridge [--port 8765] [--host 0.0.0.0] [--max-held 64]
//!             [--max-topics 1024] [--held-ttl-secs 300]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use wc_interactor::transport::{FrameKind, RelayFrame};

/// WalletConnect bridge server
#[derive(Parser)]
#[command(name = "wc-bridge")]
#[command(about = "WebSocket pub/sub bridge for wallet sessions")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8765")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Frames held per topic while it has no subscriber (0 disables holding)
    #[arg(long, default_value = "64")]
    max_held: usize,

    /// Topics with held frames at any one time
    #[arg(long, default_value = "1024")]
    max_topics: usize,

    /// Seconds a topic's held frames survive without a new publish
    #[arg(long, default_value = "300")]
    held_ttl_secs: u64,
}

/// Bounds on frames held for topics nobody has subscribed to yet
#[derive(Clone, Copy, Debug)]
struct HoldLimits {
    frames_per_topic: usize,
    topics: usize,
    ttl: Duration,
}

/// Frames waiting for a topic's first subscriber
#[derive(Default)]
struct HeldFrames {
    frames: VecDeque<String>,
    last_publish: Option<Instant>,
}

impl HeldFrames {
    fn expired(&self, now: Instant, ttl: Duration) -> bool {
        self.last_publish
            .map_or(true, |at| now.saturating_duration_since(at) >= ttl)
    }
}

type ClientTx = mpsc::UnboundedSender<String>;

/// Server state
struct BridgeState {
    /// topic -> client id -> outbound channel
    subscriptions: RwLock<HashMap<String, HashMap<usize, ClientTx>>>,
    /// Encoded frames waiting for a first subscriber
    held: RwLock<HashMap<String, HeldFrames>>,
    limits: HoldLimits,
    next_client: AtomicUsize,
}

impl BridgeState {
    fn new(limits: HoldLimits) -> Self {
        BridgeState {
            subscriptions: RwLock::new(HashMap::new()),
            held: RwLock::new(HashMap::new()),
            limits,
            next_client: AtomicUsize::new(1),
        }
    }

    /// Subscribe a client and hand it anything held for the topic
    async fn subscribe(&self, topic: &str, client_id: usize, tx: &ClientTx) {
        self.subscriptions
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(client_id, tx.clone());

        let held = self.held.write().await.remove(topic);
        match held {
            Some(held) if held.expired(Instant::now(), self.limits.ttl) => {
                debug!(%topic, count = held.frames.len(), "discarding expired held frames");
            }
            Some(held) => {
                debug!(%topic, count = held.frames.len(), "delivering held frames");
                for frame in held.frames {
                    let _ = tx.send(frame);
                }
            }
            None => {}
        }
    }

    /// Route a `pub` frame to every other subscriber, or hold it
    async fn publish(&self, frame: &RelayFrame, sender: usize) {
        let encoded = match serde_json::to_string(frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Unable to encode frame: {}", e);
                return;
            }
        };

        let mut delivered = 0;
        if let Some(subscribers) = self.subscriptions.read().await.get(&frame.topic) {
            for (id, tx) in subscribers {
                if *id != sender && tx.send(encoded.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        if delivered == 0 {
            self.hold(&frame.topic, encoded).await;
        }
        debug!(topic = %frame.topic, delivered, "frame published");
    }

    /// Keep a frame for the topic's first subscriber, within [`HoldLimits`]
    async fn hold(&self, topic: &str, encoded: String) {
        let limits = self.limits;
        if limits.frames_per_topic == 0 || limits.topics == 0 {
            return;
        }

        let now = Instant::now();
        let mut held = self.held.write().await;
        held.retain(|_, entry| !entry.expired(now, limits.ttl));

        if !held.contains_key(topic) && held.len() >= limits.topics {
            let oldest = held
                .iter()
                .min_by_key(|(_, entry)| entry.last_publish)
                .map(|(topic, _)| topic.clone());
            if let Some(oldest) = oldest {
                warn!(topic = %oldest, "held topic limit reached, dropping oldest topic");
                held.remove(&oldest);
            }
        }

        let entry = held.entry(topic.to_string()).or_default();
        if entry.frames.len() >= limits.frames_per_topic {
            entry.frames.pop_front();
            warn!(%topic, "held frame limit reached, dropping oldest");
        }
        entry.frames.push_back(encoded);
        entry.last_publish = Some(now);
    }

    /// Remove every subscription of a client
    async fn remove_client(&self, client_id: usize) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|_, clients| {
            clients.remove(&client_id);
            !clients.is_empty()
        });
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<BridgeState>) {
    info!("New connection from: {}", addr);

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client_id = state.next_client.fetch_add(1, Ordering::Relaxed);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RelayFrame>(&text) {
                            Ok(frame) => match frame.kind {
                                FrameKind::Sub => state.subscribe(&frame.topic, client_id, &tx).await,
                                FrameKind::Pub => state.publish(&frame, client_id).await,
                            },
                            Err(e) => warn!("Invalid frame from {}: {}", addr, e),
                        }
                    }

                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} disconnected", addr);
                        break;
                    }

                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }

                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }

                    _ => {}
                }
            }

            Some(frame) = rx.recv() => {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    warn!("Unable to forward to {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    state.remove_client(client_id).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wc_bridge=info")),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("WalletConnect bridge listening on ws://{}", addr);

    let state = Arc::new(BridgeState::new(HoldLimits {
        frames_per_topic: args.max_held,
        topics: args.max_topics,
        ttl: Duration::from_secs(args.held_ttl_secs),
    }));

    while let Ok((stream, addr)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(handle_connection(stream, addr, state));
    }
    Ok(())
}
