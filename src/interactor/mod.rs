//! The wallet side session engine
//!
//! An [`Interactor`] owns one pairing: it opens the bridge transport, answers
//! the dApp's handshake, correlates JSON-RPC traffic in both directions and
//! reports everything the user has to decide on through an event channel.
//!
//! # Locking
//!
//! All mutable session state sits behind one `parking_lot` mutex that is
//! never held across an `.await`. A second, async mutex serializes id
//! assignment and publication, so ids reach the wire in increasing order and
//! a paused session's queue is flushed before anything sent after resuming.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --approve_session--> Connected <--> Paused
//!       ^                        |                              |
//!       +---- reject / kill / transport closed / peer update ---+
//! ```
//!
//! Once torn down a session stays disconnected; every send fails with
//! [`InteractorError::SessionClosed`] and `connect` is refused.

mod events;

pub use events::{InteractorEvent, SessionRequestParams, SessionState, SessionUpdateParams};

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::InteractorConfig;
use crate::crypto::{EncryptedPayload, Envelope};
use crate::error::{InteractorError, Result};
use crate::handlers::{self, HandlerError, OrderSignature};
use crate::rpc::{error_codes, IdGenerator, Payload, Request, Resolution, Response, Router};
use crate::session::{PeerMeta, SessionDescriptor, SessionRecord};
use crate::transport::{EventStream, FrameKind, RelayFrame, Transport, TransportError, TransportEvent};

/// Handshake method sent by the dApp
pub const SESSION_REQUEST: &str = "wc_sessionRequest";
/// Session update / disconnect method, sent by either peer
pub const SESSION_UPDATE: &str = "wc_sessionUpdate";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Handshake {
    Awaiting,
    Pending(u64),
    Approved,
}

#[derive(Clone, Debug)]
struct OutboundFrame {
    topic: String,
    payload: String,
    silent: bool,
}

struct Inner {
    state: SessionState,
    torn_down: bool,
    handshake: Handshake,
    peer_id: Option<String>,
    peer_meta: Option<PeerMeta>,
    accounts: Vec<String>,
    chain_id: u64,
    router: Router,
    queue: VecDeque<OutboundFrame>,
    decrypt_failures: u32,
    reader: Option<JoinHandle<()>>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            state: SessionState::Disconnected,
            torn_down: false,
            handshake: Handshake::Awaiting,
            peer_id: None,
            peer_meta: None,
            accounts: Vec::new(),
            chain_id: 0,
            router: Router::new(),
            queue: VecDeque::new(),
            decrypt_failures: 0,
            reader: None,
        }
    }

    /// Connected or paused
    fn require_session(&self) -> Result<()> {
        match self.state {
            SessionState::Connected | SessionState::Paused => Ok(()),
            _ if self.torn_down => Err(InteractorError::SessionClosed),
            other => Err(InteractorError::InvalidState(format!(
                "no active session (state {other:?})"
            ))),
        }
    }

    fn peer_topic(&self) -> Result<String> {
        self.peer_id
            .clone()
            .ok_or_else(|| InteractorError::InvalidState("peer id is not known yet".to_string()))
    }

    /// Hold the frame while paused, otherwise hand it back for publishing
    fn stage(&mut self, frame: OutboundFrame) -> Option<OutboundFrame> {
        if self.state == SessionState::Paused {
            debug!(topic = %frame.topic, queued = self.queue.len() + 1, "session paused, queueing frame");
            self.queue.push_back(frame);
            None
        } else {
            Some(frame)
        }
    }
}

struct Shared {
    descriptor: SessionDescriptor,
    client_id: String,
    config: InteractorConfig,
    transport: Arc<dyn Transport>,
    ids: IdGenerator,
    inner: Mutex<Inner>,
    outbound: tokio::sync::Mutex<()>,
    events: mpsc::UnboundedSender<InteractorEvent>,
}

/// Handle to one wallet session. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct Interactor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Interactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interactor")
            .field("topic", &self.shared.descriptor.topic)
            .field("client_id", &self.shared.client_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Interactor {
    /// Create an interactor for a freshly scanned pairing, with a random
    /// peer id. Events are delivered on the returned receiver.
    pub fn new(
        descriptor: SessionDescriptor,
        config: InteractorConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<InteractorEvent>) {
        let client_id = uuid::Uuid::new_v4().to_string();
        Self::with_parts(descriptor, config, transport, client_id, IdGenerator::from_clock())
    }

    /// Create an interactor with an explicit peer id and id source
    pub fn with_parts(
        descriptor: SessionDescriptor,
        config: InteractorConfig,
        transport: Arc<dyn Transport>,
        client_id: impl Into<String>,
        ids: IdGenerator,
    ) -> (Self, mpsc::UnboundedReceiver<InteractorEvent>) {
        Self::build(descriptor, config, transport, client_id.into(), ids, Inner::new())
    }

    /// Rebuild an approved session from a stored record. `connect` then
    /// resubscribes and goes straight to [`SessionState::Connected`].
    pub fn recover(
        record: SessionRecord,
        config: InteractorConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<InteractorEvent>) {
        let mut inner = Inner::new();
        inner.handshake = Handshake::Approved;
        inner.peer_id = Some(record.peer_id);
        inner.peer_meta = Some(record.peer_meta);
        inner.accounts = record.accounts;
        inner.chain_id = record.chain_id;
        Self::build(
            record.descriptor,
            config,
            transport,
            record.client_id,
            IdGenerator::from_clock(),
            inner,
        )
    }

    fn build(
        descriptor: SessionDescriptor,
        config: InteractorConfig,
        transport: Arc<dyn Transport>,
        client_id: String,
        ids: IdGenerator,
        inner: Inner,
    ) -> (Self, mpsc::UnboundedReceiver<InteractorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let interactor = Interactor {
            shared: Arc::new(Shared {
                descriptor,
                client_id,
                config,
                transport,
                ids,
                inner: Mutex::new(inner),
                outbound: tokio::sync::Mutex::new(()),
                events,
            }),
        };
        (interactor, rx)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// The pairing this interactor serves
    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.shared.descriptor
    }

    /// Our peer id, the topic requests are addressed to
    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    /// The dApp's peer id, once the handshake arrived
    pub fn peer_id(&self) -> Option<String> {
        self.shared.inner.lock().peer_id.clone()
    }

    /// The dApp's metadata, once the handshake arrived
    pub fn peer_meta(&self) -> Option<PeerMeta> {
        self.shared.inner.lock().peer_meta.clone()
    }

    /// Accounts approved for the session
    pub fn accounts(&self) -> Vec<String> {
        self.shared.inner.lock().accounts.clone()
    }

    /// Chain id approved for the session
    pub fn chain_id(&self) -> u64 {
        self.shared.inner.lock().chain_id
    }

    /// Outbound calls still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.inner.lock().router.pending_len()
    }

    /// Snapshot of an approved session, for [`SessionStore`](crate::SessionStore)
    pub fn session_record(&self) -> Option<SessionRecord> {
        let inner = self.shared.inner.lock();
        if inner.torn_down || inner.handshake != Handshake::Approved {
            return None;
        }
        Some(SessionRecord {
            descriptor: self.shared.descriptor.clone(),
            client_id: self.shared.client_id.clone(),
            peer_id: inner.peer_id.clone()?,
            peer_meta: inner.peer_meta.clone().unwrap_or_default(),
            accounts: inner.accounts.clone(),
            chain_id: inner.chain_id,
        })
    }

    /// Open the bridge connection and subscribe to the session topic and our
    /// peer id.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.torn_down {
                return Err(InteractorError::InvalidState(
                    "session has been torn down".to_string(),
                ));
            }
            if inner.state != SessionState::Disconnected {
                return Err(InteractorError::InvalidState(format!(
                    "connect called in state {:?}",
                    inner.state
                )));
            }
            inner.state = SessionState::Connecting;
        }

        let relay_url = &self.shared.descriptor.relay_url;
        info!(topic = %self.shared.descriptor.topic, relay = %relay_url, "connecting");

        let stream = match self.open_transport(relay_url).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "unable to connect");
                let mut inner = self.shared.inner.lock();
                if !inner.torn_down {
                    inner.state = SessionState::Disconnected;
                }
                return Err(err);
            }
        };

        let killed = {
            let mut inner = self.shared.inner.lock();
            if inner.torn_down {
                true
            } else {
                if inner.handshake == Handshake::Approved {
                    inner.state = SessionState::Connected;
                    info!(topic = %self.shared.descriptor.topic, "recovered session");
                }
                let reader = tokio::spawn(run_inbound(Arc::downgrade(&self.shared), stream));
                inner.reader = Some(reader);
                false
            }
        };
        if killed {
            // torn down while the transport was opening
            let _ = self.shared.transport.close().await;
            return Err(InteractorError::SessionClosed);
        }
        Ok(())
    }

    async fn open_transport(&self, relay_url: &str) -> Result<EventStream> {
        let transport = &self.shared.transport;
        let stream = tokio::time::timeout(self.shared.config.connect_timeout(), transport.open(relay_url))
            .await
            .map_err(|_| TransportError::Timeout)??;

        for topic in [&self.shared.descriptor.topic, &self.shared.client_id] {
            if let Err(err) = transport.subscribe(topic).await {
                let _ = transport.close().await;
                return Err(err.into());
            }
            debug!(%topic, "subscribed");
        }
        Ok(stream)
    }

    /// Approve the pending handshake with the accounts and chain to expose
    pub async fn approve_session(&self, accounts: Vec<String>, chain_id: u64) -> Result<()> {
        if accounts.is_empty() {
            return Err(InteractorError::Validation(
                "at least one account is required".to_string(),
            ));
        }

        let _outbound = self.shared.outbound.lock().await;
        let (id, frame) = {
            let mut inner = self.shared.inner.lock();
            let id = self.pending_handshake(&inner)?;
            let topic = inner.peer_topic()?;
            let result = json!({
                "approved": true,
                "chainId": chain_id,
                "accounts": accounts,
                "peerId": self.shared.client_id,
                "peerMeta": self.shared.config.client_meta,
            });
            let payload = self.seal(&topic, &Response::success(id, result).into())?;

            inner.handshake = Handshake::Approved;
            inner.state = SessionState::Connected;
            inner.accounts = accounts;
            inner.chain_id = chain_id;
            (id, self.response_frame(topic, payload))
        };

        if let Err(err) = self.publish(&frame).await {
            let mut inner = self.shared.inner.lock();
            if !inner.torn_down {
                inner.handshake = Handshake::Pending(id);
                inner.state = SessionState::Connecting;
                inner.accounts.clear();
            }
            return Err(err);
        }
        info!(peer = %frame.topic, chain_id, "session approved");
        Ok(())
    }

    /// Refuse the pending handshake and end the session
    pub async fn reject_session(&self, message: &str) -> Result<()> {
        {
            let _outbound = self.shared.outbound.lock().await;
            let frame = {
                let inner = self.shared.inner.lock();
                let id = self.pending_handshake(&inner)?;
                let topic = inner.peer_topic()?;
                let response = Response::error(id, error_codes::SERVER_ERROR, message);
                let payload = self.seal(&topic, &response.into())?;
                self.response_frame(topic, payload)
            };
            self.publish(&frame).await?;
        }
        info!("session rejected");
        self.teardown(Some("session rejected".to_string())).await;
        Ok(())
    }

    fn pending_handshake(&self, inner: &Inner) -> Result<u64> {
        if inner.torn_down {
            return Err(InteractorError::SessionClosed);
        }
        match (inner.state, inner.handshake) {
            (SessionState::Connecting, Handshake::Pending(id)) => Ok(id),
            _ => Err(InteractorError::InvalidState(
                "no session request is awaiting an answer".to_string(),
            )),
        }
    }

    /// End the session. The peer is told on a best effort basis; locally this
    /// always succeeds.
    pub async fn kill_session(&self) -> Result<()> {
        let peer = {
            let inner = self.shared.inner.lock();
            if inner.torn_down {
                return Ok(());
            }
            match inner.state {
                SessionState::Connected | SessionState::Paused => inner.peer_id.clone(),
                _ => None,
            }
        };

        if let Some(topic) = peer {
            let _outbound = self.shared.outbound.lock().await;
            let id = self.shared.ids.next_id();
            let update = Request::new(
                id,
                SESSION_UPDATE,
                json!([{"approved": false, "chainId": null, "accounts": null}]),
            );
            let sent = match self.seal(&topic, &update.into()) {
                Ok(payload) => self
                    .shared
                    .transport
                    .publish(&topic, payload, false)
                    .await
                    .map_err(InteractorError::from),
                Err(err) => Err(err),
            };
            if let Err(err) = sent {
                warn!(%err, "unable to notify peer of disconnect");
            }
        }

        self.teardown(None).await;
        Ok(())
    }

    /// Hold outbound traffic; the transport stays open
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            SessionState::Connected => {
                inner.state = SessionState::Paused;
                info!("session paused");
                Ok(())
            }
            _ if inner.torn_down => Err(InteractorError::SessionClosed),
            other => Err(InteractorError::InvalidState(format!(
                "pause called in state {other:?}"
            ))),
        }
    }

    /// Leave the paused state and flush held frames in the order they were
    /// queued
    pub async fn resume(&self) -> Result<()> {
        let _outbound = self.shared.outbound.lock().await;
        let frames: Vec<OutboundFrame> = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                SessionState::Paused => {}
                _ if inner.torn_down => return Err(InteractorError::SessionClosed),
                other => {
                    return Err(InteractorError::InvalidState(format!(
                        "resume called in state {other:?}"
                    )))
                }
            }
            inner.state = SessionState::Connected;
            inner.queue.drain(..).collect()
        };

        let total = frames.len();
        let mut remaining = frames.into_iter();
        while let Some(frame) = remaining.next() {
            if let Err(err) = self.publish(&frame).await {
                let mut inner = self.shared.inner.lock();
                if !inner.torn_down {
                    inner.state = SessionState::Paused;
                    inner.queue = std::iter::once(frame).chain(remaining).collect();
                }
                return Err(err);
            }
        }
        info!(flushed = total, "session resumed");
        Ok(())
    }

    /// Tell the peer about a new account list or chain
    pub async fn update_session(&self, accounts: Vec<String>, chain_id: u64) -> Result<()> {
        if accounts.is_empty() {
            return Err(InteractorError::Validation(
                "at least one account is required".to_string(),
            ));
        }

        let _outbound = self.shared.outbound.lock().await;
        let id = self.shared.ids.next_id();
        let frame = {
            let mut inner = self.shared.inner.lock();
            inner.require_session()?;
            let topic = inner.peer_topic()?;
            let update = Request::new(
                id,
                SESSION_UPDATE,
                json!([{"approved": true, "chainId": chain_id, "accounts": accounts}]),
            );
            let payload = self.seal(&topic, &update.into())?;
            inner.stage(OutboundFrame {
                topic,
                payload,
                silent: false,
            })
        };
        if let Some(frame) = frame {
            self.publish(&frame).await?;
        }

        let mut inner = self.shared.inner.lock();
        inner.accounts = accounts;
        inner.chain_id = chain_id;
        Ok(())
    }

    /// Call `method` on the dApp and wait for its response
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let rx = {
            let _outbound = self.shared.outbound.lock().await;
            let id = self.shared.ids.next_id();
            let request = Payload::from(Request::new(id, method, params));

            let (rx, frame) = {
                let mut inner = self.shared.inner.lock();
                inner.require_session()?;
                let topic = inner.peer_topic()?;
                let payload = self.seal(&topic, &request)?;
                let rx = inner.router.register(id, method)?;
                let frame = inner.stage(OutboundFrame {
                    topic,
                    payload,
                    silent: false,
                });
                (rx, frame)
            };

            if let Some(frame) = frame {
                if let Err(err) = self.publish(&frame).await {
                    self.shared.inner.lock().router.fail(id, err.clone());
                    return Err(err);
                }
            }
            debug!(id, method, "request sent");
            rx
        };

        rx.await.unwrap_or(Err(InteractorError::SessionClosed))
    }

    /// Answer an inbound request with `result`
    pub async fn approve_request(&self, id: u64, result: Value) -> Result<()> {
        self.respond(Response::success(id, result)).await
    }

    /// Answer an inbound request with a `-32000` error
    pub async fn reject_request(&self, id: u64, message: &str) -> Result<()> {
        self.respond(Response::error(id, error_codes::SERVER_ERROR, message))
            .await
    }

    /// Answer a `bnb_sign` request with the signed order, encoded as a JSON
    /// string
    pub async fn approve_bnb_order(&self, id: u64, signed: &OrderSignature) -> Result<()> {
        let encoded = serde_json::to_string(signed)?;
        self.approve_request(id, Value::String(encoded)).await
    }

    /// Publish the single terminal answer to inbound request `response.id`
    async fn respond(&self, response: Response) -> Result<()> {
        let id = response.id;
        let _outbound = self.shared.outbound.lock().await;
        let frame = {
            let mut inner = self.shared.inner.lock();
            inner.require_session()?;
            let topic = inner.peer_topic()?;
            let payload = self.seal(&topic, &response.into())?;
            inner.router.answer_inbound(id)?;
            inner.stage(self.response_frame(topic, payload))
        };

        if let Some(frame) = frame {
            if let Err(err) = self.publish(&frame).await {
                // not delivered, the caller may try again
                self.shared.inner.lock().router.reopen_inbound(id);
                return Err(err);
            }
        }
        debug!(id, "request answered");
        Ok(())
    }

    fn seal(&self, topic: &str, payload: &Payload) -> Result<String> {
        let envelope = Envelope::seal(topic, &self.shared.descriptor.key, &payload.encode()?)?;
        Ok(envelope.payload.to_json())
    }

    fn open(&self, frame: &RelayFrame) -> Result<Vec<u8>> {
        let envelope = Envelope {
            topic: frame.topic.clone(),
            payload: EncryptedPayload::from_json(&frame.payload)?,
        };
        Ok(envelope.open(&self.shared.descriptor.key)?)
    }

    fn response_frame(&self, topic: String, payload: String) -> OutboundFrame {
        OutboundFrame {
            topic,
            payload,
            silent: self.shared.config.silent_responses,
        }
    }

    async fn publish(&self, frame: &OutboundFrame) -> Result<()> {
        self.shared
            .transport
            .publish(&frame.topic, frame.payload.clone(), frame.silent)
            .await?;
        Ok(())
    }

    fn emit(&self, event: InteractorEvent) {
        if self.shared.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn is_torn_down(&self) -> bool {
        self.shared.inner.lock().torn_down
    }

    /// Move to the terminal state: fail pending calls, drop queued frames,
    /// close the transport and report `Disconnected`. Runs once.
    async fn teardown(&self, cause: Option<String>) {
        let (reader, failed) = {
            let mut inner = self.shared.inner.lock();
            if inner.torn_down {
                return;
            }
            inner.torn_down = true;
            inner.state = SessionState::Disconnected;
            inner.queue.clear();
            (inner.reader.take(), inner.router.close_all())
        };

        info!(
            topic = %self.shared.descriptor.topic,
            failed,
            cause = cause.as_deref().unwrap_or("local"),
            "session closed"
        );
        if let Err(err) = self.shared.transport.close().await {
            debug!(%err, "transport close failed");
        }
        self.emit(InteractorEvent::Disconnected { cause });
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    async fn handle_frame(&self, frame: RelayFrame) {
        if frame.kind != FrameKind::Pub {
            return;
        }
        if frame.topic != self.shared.descriptor.topic && frame.topic != self.shared.client_id {
            debug!(topic = %frame.topic, "ignoring frame for a foreign topic");
            return;
        }

        let plaintext = match self.open(&frame) {
            Ok(plaintext) => {
                self.shared.inner.lock().decrypt_failures = 0;
                plaintext
            }
            Err(err @ InteractorError::Decryption(_)) => {
                self.on_decrypt_failure(err).await;
                return;
            }
            Err(err) => {
                warn!(%err, "dropping malformed envelope");
                self.emit(InteractorEvent::Error(err));
                return;
            }
        };

        let payload = match Payload::decode(&plaintext) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "dropping undecodable message");
                self.emit(InteractorEvent::Error(err));
                return;
            }
        };

        match payload {
            Payload::Response(response) => {
                let id = response.id;
                let resolution = self.shared.inner.lock().router.resolve(response);
                match resolution {
                    Resolution::Fulfilled { method, elapsed } => {
                        debug!(id, %method, ?elapsed, "response matched")
                    }
                    Resolution::Unmatched => debug!(id, "ignoring response to unknown request"),
                }
            }
            Payload::Request(request) => self.handle_request(request).await,
        }
    }

    async fn on_decrypt_failure(&self, err: InteractorError) {
        let failures = {
            let mut inner = self.shared.inner.lock();
            inner.decrypt_failures += 1;
            inner.decrypt_failures
        };
        warn!(failures, "dropping envelope that failed to decrypt");
        self.emit(InteractorEvent::Error(err));

        let limit = self.shared.config.max_decrypt_failures;
        if limit > 0 && failures >= limit {
            error!(failures, "too many undecryptable messages, closing session");
            self.teardown(Some(format!("{failures} consecutive undecryptable messages")))
                .await;
        }
    }

    async fn handle_request(&self, request: Request) {
        match request.method.as_str() {
            SESSION_REQUEST => self.on_session_request(request),
            SESSION_UPDATE => self.on_session_update(request).await,
            _ => self.on_call(request).await,
        }
    }

    fn on_session_request(&self, request: Request) {
        let params: SessionRequestParams =
            match handlers::first_param(SESSION_REQUEST, &request.params) {
                Ok(params) => params,
                Err(err) => {
                    warn!(%err, "malformed session request");
                    self.emit(InteractorEvent::Error(err.into()));
                    return;
                }
            };

        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Connecting || inner.handshake != Handshake::Awaiting {
                debug!(id = request.id, "ignoring repeated session request");
                return;
            }
            inner.handshake = Handshake::Pending(request.id);
            inner.peer_id = Some(params.peer_id.clone());
            inner.peer_meta = Some(params.peer_meta.clone());
        }

        info!(id = request.id, peer = %params.peer_meta.name, "session request");
        self.emit(InteractorEvent::SessionRequest {
            id: request.id,
            params,
        });
    }

    async fn on_session_update(&self, request: Request) {
        let params: SessionUpdateParams =
            match handlers::first_param(SESSION_UPDATE, &request.params) {
                Ok(params) => params,
                Err(err) => {
                    warn!(%err, "malformed session update");
                    self.emit(InteractorEvent::Error(err.into()));
                    return;
                }
            };

        if !params.approved {
            info!("peer ended the session");
            self.teardown(Some("peer disconnected".to_string())).await;
            return;
        }

        let updated = {
            let mut inner = self.shared.inner.lock();
            if inner.require_session().is_err() {
                None
            } else {
                if let Some(accounts) = params.accounts {
                    inner.accounts = accounts;
                }
                if let Some(chain_id) = params.chain_id {
                    inner.chain_id = chain_id;
                }
                Some((inner.accounts.clone(), inner.chain_id))
            }
        };
        match updated {
            Some((accounts, chain_id)) => {
                self.emit(InteractorEvent::SessionUpdated { accounts, chain_id })
            }
            None => debug!("ignoring session update outside an active session"),
        }
    }

    async fn on_call(&self, request: Request) {
        let id = request.id;
        let unapproved = {
            let mut inner = self.shared.inner.lock();
            if inner.require_session().is_err() {
                match inner.peer_id.clone() {
                    Some(topic) if inner.state == SessionState::Connecting && !inner.torn_down => {
                        Some(topic)
                    }
                    _ => {
                        debug!(id, method = %request.method, "ignoring request outside an active session");
                        return;
                    }
                }
            } else if !inner.router.open_inbound(id) {
                debug!(id, "ignoring repeated request id");
                return;
            } else {
                None
            }
        };
        if let Some(topic) = unapproved {
            warn!(id, method = %request.method, "rejecting request before session approval");
            self.reject_unapproved(id, topic).await;
            return;
        }

        match handlers::parse(&request.method, &request.params) {
            Ok(parsed) => {
                debug!(id, method = %request.method, "request received");
                self.emit(InteractorEvent::Request {
                    id,
                    request: parsed,
                });
            }
            Err(HandlerError::Unsupported(method)) => {
                warn!(id, %method, "unsupported method");
                self.auto_reject(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not supported: {method}"),
                )
                .await;
                self.emit(InteractorEvent::UnsupportedMethod { id, method });
            }
            Err(HandlerError::Validation(message)) => {
                warn!(id, %message, "invalid request params");
                self.auto_reject(id, error_codes::INVALID_PARAMS, message.clone())
                    .await;
                self.emit(InteractorEvent::Error(InteractorError::Validation(message)));
            }
        }
    }

    /// Answer a request that arrived while the handshake is still pending.
    /// Not tracked by the router: the session may never be approved.
    async fn reject_unapproved(&self, id: u64, topic: String) {
        let response = Response::error(id, error_codes::SERVER_ERROR, "Session not approved");
        let _outbound = self.shared.outbound.lock().await;
        let sent = match self.seal(&topic, &response.into()) {
            Ok(payload) => self.publish(&self.response_frame(topic, payload)).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            warn!(id, %err, "unable to reject request");
        }
    }

    async fn auto_reject(&self, id: u64, code: i64, message: String) {
        if let Err(err) = self.respond(Response::error(id, code, message)).await {
            warn!(id, %err, "unable to reject request");
        }
    }
}

/// Inbound loop: one per connected interactor, processes frames in order
async fn run_inbound(shared: Weak<Shared>, mut stream: EventStream) {
    while let Some(event) = stream.recv().await {
        let Some(strong) = shared.upgrade() else {
            return;
        };
        let interactor = Interactor { shared: strong };
        match event {
            TransportEvent::Message(frame) => interactor.handle_frame(frame).await,
            TransportEvent::Closed(reason) => {
                let cause = reason.unwrap_or_else(|| "transport closed".to_string());
                interactor.teardown(Some(cause)).await;
                return;
            }
        }
        if interactor.is_torn_down() {
            return;
        }
    }

    if let Some(strong) = shared.upgrade() {
        Interactor { shared: strong }
            .teardown(Some("transport closed".to_string()))
            .await;
    }
}
