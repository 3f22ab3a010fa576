//! # wc-interactor
//!
//! Wallet side of a WalletConnect (v1) style session.
//!
//! ## Features
//!
//! - **Pairing URIs**: `wc:<topic>@<version>?bridge=<url>&key=<hex>`
//! - **End-to-end encryption** of every bridge payload with a shared key
//! - **JSON-RPC correlation** in both directions, with at-most-once answers
//! - **Chain handlers** for Ethereum, Binance Chain and OKExChain requests
//! - **Pause / resume** for hosts that lose execution time
//! - **Pluggable transport** (WebSocket bridge, in-memory relay)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wc_interactor::{Interactor, InteractorConfig, InteractorEvent, SessionDescriptor};
//! use wc_interactor::transport::WebSocketTransport;
//!
//! # async fn run() -> wc_interactor::Result<()> {
//! let descriptor = SessionDescriptor::parse(
//!     "wc:8a5e5bdc-a0e4-4702-ba63-8f1a5655744f@1?bridge=https%3A%2F%2Fbridge.walletconnect.org&key=41791102999c339c844880b23950704cc43aa840f3739e365323cda4dfa89e7a",
//! )?;
//! let (interactor, mut events) = Interactor::new(
//!     descriptor,
//!     InteractorConfig::default(),
//!     Arc::new(WebSocketTransport::new()),
//! );
//! interactor.connect().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         InteractorEvent::SessionRequest { .. } => {
//!             interactor
//!                 .approve_session(vec!["0x9431cf5da0ce60664661341db650763b08286b18".into()], 1)
//!                 .await?;
//!         }
//!         InteractorEvent::Request { id, .. } => {
//!             interactor.reject_request(id, "User canceled").await?;
//!         }
//!         InteractorEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │   wc-wallet CLI  |  host wallet UI  | ...   │
//! └─────────────────────┬───────────────────────┘
//!                       │ events / approve / reject
//! ┌─────────────────────▼───────────────────────┐
//! │              PROTOCOL LAYER                 │
//! │  Interactor | RPC router | Chain handlers   │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │ ChaCha20-Poly1305 | Keccak/SHA-256 | k256   │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │      WebSocket bridge | In-memory relay     │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod interactor;
pub mod rpc;
pub mod session;
pub mod signer;
pub mod transport;

// Re-export main types at crate root
pub use config::InteractorConfig;
pub use crypto::{Cipher, CryptoError, CryptoResult, EncryptedPayload, Envelope, SymmetricKey};
pub use error::{InteractorError, Result};
pub use handlers::{HandlerError, WcRequest};
pub use interactor::{Interactor, InteractorEvent, SessionRequestParams, SessionState};
pub use session::{PeerMeta, SessionDescriptor, SessionRecord, SessionStore};
pub use signer::{Curve, LocalKeySigner, Signer, SignerError};
