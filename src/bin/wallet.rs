//! wc-wallet CLI tool
//!
//! A terminal wallet: pairs with a dApp through a bridge, shows each request
//! and answers it after confirmation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::warn;
use wc_interactor::handlers::{bnb, eth, WcRequest};
use wc_interactor::transport::WebSocketTransport;
use wc_interactor::{
    Interactor, InteractorConfig, InteractorEvent, LocalKeySigner, SessionDescriptor,
    SessionStore,
};

/// wc-wallet: answer dApp signing requests from the terminal
#[derive(Parser)]
#[command(name = "wc-wallet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the session store (default: ~/.wc-interactor/session.json)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new pairing URI
    Uri {
        /// Bridge server address
        #[arg(short, long, default_value = "https://bridge.walletconnect.org")]
        bridge: String,
    },

    /// Decode a pairing URI
    Inspect {
        /// The `wc:` URI
        uri: String,
    },

    /// Print the address of a private key
    Address {
        /// Private key (hex encoded)
        #[arg(short, long)]
        key: String,
    },

    /// Sign a message the way `personal_sign` does
    SignMessage {
        /// Private key (hex encoded)
        #[arg(short, long)]
        key: String,

        /// Message text, or 0x-prefixed hex
        message: String,
    },

    /// Pair with a dApp and answer its requests
    Connect {
        /// The `wc:` URI shown by the dApp
        uri: String,

        /// Private key (hex encoded); a throwaway key is used if omitted
        #[arg(short, long)]
        key: Option<String>,

        /// Chain id to approve
        #[arg(long, default_value = "1")]
        chain_id: u64,

        /// Approve everything without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Rejoin the stored session
    Resume {
        /// Private key (hex encoded)
        #[arg(short, long)]
        key: Option<String>,

        /// Approve everything without asking
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// End the stored session and forget it
    Forget,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let store = SessionStore::open(cli.store.unwrap_or_else(SessionStore::default_path));
    let config = match &cli.config {
        Some(path) => InteractorConfig::load(path)
            .with_context(|| format!("unable to load config {}", path.display()))?,
        None => InteractorConfig::default(),
    };

    match cli.command {
        Commands::Uri { bridge } => cmd_uri(&bridge),
        Commands::Inspect { uri } => cmd_inspect(&uri),
        Commands::Address { key } => cmd_address(&key),
        Commands::SignMessage { key, message } => cmd_sign_message(&key, &message),
        Commands::Connect {
            uri,
            key,
            chain_id,
            yes,
        } => cmd_connect(&store, config, &uri, key.as_deref(), chain_id, yes).await,
        Commands::Resume { key, yes } => cmd_resume(&store, config, key.as_deref(), yes).await,
        Commands::Forget => cmd_forget(&store, config).await,
    }
}

fn load_signer(key: Option<&str>) -> anyhow::Result<LocalKeySigner> {
    match key {
        Some(key) => LocalKeySigner::from_hex(key).context("invalid private key"),
        None => {
            let signer = LocalKeySigner::random();
            eprintln!("No key given, using throwaway account {}", signer.eth_address());
            Ok(signer)
        }
    }
}

fn cmd_uri(bridge: &str) -> anyhow::Result<()> {
    let descriptor = SessionDescriptor::generate(bridge);
    println!("{}", descriptor.to_uri());
    Ok(())
}

fn cmd_inspect(uri: &str) -> anyhow::Result<()> {
    let descriptor = SessionDescriptor::parse(uri)?;
    println!("topic:   {}", descriptor.topic);
    println!("version: {}", descriptor.version);
    println!("bridge:  {}", descriptor.relay_url);
    println!("key:     {}", descriptor.key.to_hex());
    Ok(())
}

fn cmd_address(key: &str) -> anyhow::Result<()> {
    let signer = LocalKeySigner::from_hex(key).context("invalid private key")?;
    println!("{}", signer.eth_address());
    Ok(())
}

fn cmd_sign_message(key: &str, message: &str) -> anyhow::Result<()> {
    let signer = LocalKeySigner::from_hex(key).context("invalid private key")?;
    let data = match message.strip_prefix("0x").map(hex::decode) {
        Some(Ok(bytes)) => bytes,
        _ => message.as_bytes().to_vec(),
    };
    let payload = eth::EthSignPayload::PersonalSign {
        address: signer.eth_address(),
        data,
    };
    println!("{}", eth::sign_message(&signer, &payload)?);
    Ok(())
}

async fn cmd_connect(
    store: &SessionStore,
    config: InteractorConfig,
    uri: &str,
    key: Option<&str>,
    chain_id: u64,
    yes: bool,
) -> anyhow::Result<()> {
    let descriptor = SessionDescriptor::parse(uri)?;
    let signer = load_signer(key)?;
    let (interactor, events) =
        Interactor::new(descriptor, config, Arc::new(WebSocketTransport::new()));

    interactor
        .connect()
        .await
        .context("unable to reach the bridge")?;
    println!("Connected to bridge, waiting for the dApp...");

    let mut wallet = TerminalWallet::new(interactor, signer, store.clone(), chain_id, yes);
    wallet.run(events).await
}

async fn cmd_resume(
    store: &SessionStore,
    config: InteractorConfig,
    key: Option<&str>,
    yes: bool,
) -> anyhow::Result<()> {
    let Some(record) = store.load()? else {
        bail!("no stored session at {}", store.path().display());
    };
    let signer = load_signer(key)?;
    if !record.accounts.iter().any(|a| a.eq_ignore_ascii_case(&signer.eth_address())) {
        warn!("key does not match the approved account {:?}", record.accounts);
    }

    let chain_id = record.chain_id;
    let (interactor, events) =
        Interactor::recover(record, config, Arc::new(WebSocketTransport::new()));
    interactor
        .connect()
        .await
        .context("unable to reach the bridge")?;
    if let Some(peer) = interactor.peer_meta() {
        println!("Rejoined session with {} ({})", peer.name, peer.url);
    }

    let mut wallet = TerminalWallet::new(interactor, signer, store.clone(), chain_id, yes);
    wallet.run(events).await
}

async fn cmd_forget(store: &SessionStore, config: InteractorConfig) -> anyhow::Result<()> {
    if let Some(record) = store.load()? {
        let (interactor, _events) =
            Interactor::recover(record, config, Arc::new(WebSocketTransport::new()));
        match interactor.connect().await {
            Ok(()) => interactor.kill_session().await?,
            Err(e) => warn!("unable to notify the dApp: {}", e),
        }
    }
    store.clear()?;
    println!("Session forgotten");
    Ok(())
}

/// Event loop answering requests after asking on the terminal
struct TerminalWallet {
    interactor: Interactor,
    signer: LocalKeySigner,
    store: SessionStore,
    chain_id: u64,
    auto_approve: bool,
    input: Lines<BufReader<Stdin>>,
}

impl TerminalWallet {
    fn new(
        interactor: Interactor,
        signer: LocalKeySigner,
        store: SessionStore,
        chain_id: u64,
        auto_approve: bool,
    ) -> Self {
        TerminalWallet {
            interactor,
            signer,
            store,
            chain_id,
            auto_approve,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn run(&mut self, mut events: mpsc::UnboundedReceiver<InteractorEvent>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    if !self.handle(event).await? {
                        return Ok(());
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    println!("Leaving the session open; run `wc-wallet resume` to rejoin.");
                    return Ok(());
                }
            }
        }
    }

    /// Returns `false` once the session is over
    async fn handle(&mut self, event: InteractorEvent) -> anyhow::Result<bool> {
        match event {
            InteractorEvent::SessionRequest { params, .. } => {
                let meta = &params.peer_meta;
                println!();
                println!("=== Session request ===");
                println!("{} ({})", meta.name, meta.url);
                if !meta.description.is_empty() {
                    println!("{}", meta.description);
                }
                if self.confirm("Approve session?").await? {
                    let chain_id = params.chain_id.unwrap_or(self.chain_id);
                    self.interactor
                        .approve_session(vec![self.signer.eth_address()], chain_id)
                        .await?;
                    if let Some(record) = self.interactor.session_record() {
                        self.store.save(&record)?;
                    }
                    println!("Session approved for {} on chain {}", self.signer.eth_address(), chain_id);
                } else {
                    self.interactor.reject_session("User rejected the session").await?;
                }
            }

            InteractorEvent::Request { id, request } => self.answer(id, request).await?,

            InteractorEvent::UnsupportedMethod { method, .. } => {
                println!("Rejected unsupported method {method}");
            }

            InteractorEvent::SessionUpdated { accounts, chain_id } => {
                println!("Session updated: {accounts:?} on chain {chain_id}");
                if let Some(record) = self.interactor.session_record() {
                    self.store.save(&record)?;
                }
            }

            InteractorEvent::Error(e) => warn!("{}", e),

            InteractorEvent::Disconnected { cause } => {
                // a dropped bridge connection leaves the session resumable
                let ended = matches!(cause.as_deref(), Some("peer disconnected" | "session rejected"));
                println!("Session ended{}", cause.map(|c| format!(": {c}")).unwrap_or_default());
                if ended {
                    self.store.clear()?;
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn answer(&mut self, id: u64, request: WcRequest) -> anyhow::Result<()> {
        println!();
        println!("=== {} (#{id}) ===", request.method());
        match request {
            WcRequest::EthSign(payload) => {
                println!("account: {}", payload.address());
                println!("{}", payload.message());
                if self.confirm("Sign?").await? {
                    let signature = eth::sign_message(&self.signer, &payload)?;
                    self.interactor.approve_request(id, json!(signature)).await?;
                    println!("Signed: {signature}");
                } else {
                    self.interactor.reject_request(id, "User canceled").await?;
                }
            }

            WcRequest::BnbSign(order) => {
                println!("{}", order.encoded_string()?);
                if self.confirm("Sign order?").await? {
                    let signed = bnb::sign_order(&self.signer, &order)?;
                    self.interactor.approve_bnb_order(id, &signed).await?;
                } else {
                    self.interactor.reject_request(id, "User canceled").await?;
                }
            }

            WcRequest::BnbTxConfirmation(confirmation) => {
                match confirmation.error_msg {
                    Some(msg) if !confirmation.ok => println!("Order failed: {msg}"),
                    _ => println!("Order broadcast: {}", if confirmation.ok { "ok" } else { "failed" }),
                }
                self.interactor.approve_request(id, Value::Bool(true)).await?;
            }

            WcRequest::EthTransaction { transaction, .. } => {
                println!("{}", serde_json::to_string_pretty(&transaction)?);
                self.interactor
                    .reject_request(id, "This wallet cannot send transactions")
                    .await?;
            }

            WcRequest::OktTransaction { transaction, .. } => {
                println!("{}", serde_json::to_string_pretty(&transaction)?);
                self.interactor
                    .reject_request(id, "This wallet cannot send transactions")
                    .await?;
            }
        }
        Ok(())
    }

    async fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        if self.auto_approve {
            println!("{question} yes (auto)");
            return Ok(true);
        }
        println!("{question} [y/N]");
        let answer = self.input.next_line().await?.unwrap_or_default();
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}
