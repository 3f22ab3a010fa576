//! Shared fixtures: a simulated dApp on the in-memory relay

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use wc_interactor::crypto::Envelope;
use wc_interactor::rpc::{IdGenerator, Payload, Request, Response};
use wc_interactor::transport::memory::{MemoryRelay, MemoryTransport};
use wc_interactor::transport::{EventStream, Transport, TransportEvent};
use wc_interactor::{
    Interactor, InteractorConfig, InteractorEvent, PeerMeta, SessionDescriptor, SessionState,
};

pub const WALLET_PEER_ID: &str = "wallet-peer";
pub const DAPP_PEER_ID: &str = "dapp-peer";
pub const ACCOUNT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
/// Hardhat's first development key, owner of [`ACCOUNT`]
pub const ACCOUNT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const FIRST_WALLET_ID: u64 = 100;

const WAIT: Duration = Duration::from_secs(2);

/// The dApp end of a pairing
pub struct DappPeer {
    pub descriptor: SessionDescriptor,
    pub peer_id: String,
    transport: MemoryTransport,
    inbox: EventStream,
    next_id: u64,
}

impl DappPeer {
    /// Open a connection to `relay` and listen on the dApp's peer id
    pub async fn join(relay: &MemoryRelay, descriptor: SessionDescriptor) -> Self {
        let transport = relay.endpoint();
        let inbox = transport.open("mem://relay").await.unwrap();
        transport.subscribe(DAPP_PEER_ID).await.unwrap();
        DappPeer {
            descriptor,
            peer_id: DAPP_PEER_ID.to_string(),
            transport,
            inbox,
            next_id: 1,
        }
    }

    /// Seal `payload` with the session key and publish it to `topic`
    pub async fn publish(&self, topic: &str, payload: Payload) {
        let sealed = Envelope::seal(topic, &self.descriptor.key, &payload.encode().unwrap()).unwrap();
        self.transport
            .publish(topic, sealed.payload.to_json(), false)
            .await
            .unwrap();
    }

    /// Publish raw text as if it were a sealed payload
    pub async fn publish_raw(&self, topic: &str, text: String) {
        self.transport.publish(topic, text, false).await.unwrap();
    }

    /// Send `wc_sessionRequest` on the pairing topic, returning its id
    pub async fn request_session(&mut self) -> u64 {
        let id = self.take_id();
        let params = json!([{
            "peerId": self.peer_id,
            "peerMeta": {
                "name": "Example dApp",
                "description": "integration tests",
                "url": "https://dapp.example",
                "icons": ["https://dapp.example/icon.png"],
            },
            "chainId": 1,
        }]);
        let topic = self.descriptor.topic.clone();
        self.publish(&topic, Request::new(id, "wc_sessionRequest", params).into())
            .await;
        id
    }

    /// Call `method` on the wallet, returning the request id
    pub async fn call(&mut self, method: &str, params: Value) -> u64 {
        let id = self.take_id();
        self.publish(WALLET_PEER_ID, Request::new(id, method, params).into())
            .await;
        id
    }

    /// Answer a request the wallet sent
    pub async fn respond(&self, response: Response) {
        self.publish(WALLET_PEER_ID, response.into()).await;
    }

    /// Next decrypted message from the wallet
    pub async fn recv(&mut self) -> Payload {
        let event = tokio::time::timeout(WAIT, self.inbox.recv())
            .await
            .expect("timed out waiting for the wallet")
            .expect("relay closed");
        match event {
            TransportEvent::Message(frame) => {
                let envelope = Envelope {
                    topic: frame.topic,
                    payload: wc_interactor::EncryptedPayload::from_json(&frame.payload).unwrap(),
                };
                Payload::decode(&envelope.open(&self.descriptor.key).unwrap()).unwrap()
            }
            TransportEvent::Closed(reason) => panic!("relay closed: {reason:?}"),
        }
    }

    pub async fn recv_response(&mut self) -> Response {
        match self.recv().await {
            Payload::Response(response) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    pub async fn recv_request(&mut self) -> Request {
        match self.recv().await {
            Payload::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    /// Nothing more arrives within a short grace period
    pub async fn assert_silent(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.inbox.recv()).await;
        assert!(next.is_err(), "unexpected message: {next:?}");
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// A wallet and a dApp sharing one relay
pub struct Harness {
    pub relay: MemoryRelay,
    pub wallet: Interactor,
    pub events: mpsc::UnboundedReceiver<InteractorEvent>,
    pub dapp: DappPeer,
}

impl Harness {
    /// Wallet connected, handshake not yet sent
    pub async fn connected() -> Self {
        Self::connected_with(InteractorConfig::default()).await
    }

    pub async fn connected_with(config: InteractorConfig) -> Self {
        let relay = MemoryRelay::new();
        let descriptor = SessionDescriptor::generate("https://bridge.example");
        let (wallet, events) = Interactor::with_parts(
            descriptor.clone(),
            config,
            Arc::new(relay.endpoint()),
            WALLET_PEER_ID,
            IdGenerator::starting_at(FIRST_WALLET_ID),
        );
        wallet.connect().await.unwrap();
        let dapp = DappPeer::join(&relay, descriptor).await;
        Harness {
            relay,
            wallet,
            events,
            dapp,
        }
    }

    /// Wallet and dApp with an approved session
    pub async fn paired() -> Self {
        Self::paired_with(InteractorConfig::default()).await
    }

    pub async fn paired_with(config: InteractorConfig) -> Self {
        let mut harness = Self::connected_with(config).await;
        harness.dapp.request_session().await;
        assert!(matches!(
            harness.next_event().await,
            InteractorEvent::SessionRequest { .. }
        ));
        harness
            .wallet
            .approve_session(vec![ACCOUNT.to_string()], 1)
            .await
            .unwrap();
        harness.dapp.recv_response().await;
        assert_eq!(harness.wallet.state(), SessionState::Connected);
        harness
    }

    pub async fn next_event(&mut self) -> InteractorEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Frames the wallet has published to the dApp so far
    pub fn sent_to_dapp(&self) -> usize {
        self.relay.published_to(DAPP_PEER_ID).len()
    }

    /// Wait until the wallet has `n` outbound calls in flight
    pub async fn wait_pending(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.wallet.pending_requests() != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("pending requests never reached the expected count");
    }
}

pub fn dapp_meta() -> PeerMeta {
    PeerMeta {
        name: "Example dApp".to_string(),
        description: "integration tests".to_string(),
        url: "https://dapp.example".to_string(),
        icons: vec!["https://dapp.example/icon.png".to_string()],
    }
}
