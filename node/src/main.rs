// Copyright (c) 2026 Bon Contributors. MIT License.
// See LICENSE for details.

//! # Bon Wallet Node
//!
//! Entry point for the `bon-node` binary. Parses CLI arguments, initializes
//! logging, opens the wallet in the data directory and runs one command.
//!
//! Data directory layout:
//!
//! ```text
//! bon-data/
//! ├── config.json     WalletConfig (serde_json)
//! ├── identity.key    hex secret of the wallet identity, mode 0600
//! └── db/             sled: vouchers, outbox, known, events
//! ```
//!
//! Every command except `init` reconciles at startup before doing anything
//! else, so a crash in the middle of a transfer is settled before the next
//! one can start.

mod cli;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::Parser;
use tokio::signal;
use zeroize::Zeroizing;

use bon_protocol::config::{SNAPSHOT_LENGTH, SNAPSHOT_MAGIC};
use bon_protocol::crypto::schnorr::{generate_key, public_key, PublicKey};
use bon_protocol::crypto::SecretKey;
use bon_protocol::events::{EventTransport, LocalEventLog};
use bon_protocol::storage::{SledStore, VoucherStore};
use bon_protocol::transfer::{Ack, Offer, Snapshot};
use bon_protocol::voucher::{unix_now, utc_date, VoucherMetadata, VoucherStatus};
use bon_protocol::{BonError, Wallet, WalletConfig};

use cli::{BonNodeCli, Commands};

const CONFIG_FILE: &str = "config.json";
const IDENTITY_FILE: &str = "identity.key";
const DB_DIR: &str = "db";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BonNodeCli::parse();
    logging::init_logging(&cli.log_level, cli.log_format.into());

    match cli.command {
        Commands::Init(args) => init_wallet(&cli.data_dir, args),
        command => {
            let wallet = open_wallet(&cli.data_dir).await?;
            execute(&wallet, command).await
        }
    }
}

// ---------------------------------------------------------------------------
// Data Directory
// ---------------------------------------------------------------------------

fn load_config(data_dir: &Path) -> Result<WalletConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let raw = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "failed to read {} (run `bon-node init` first)",
            path.display()
        )
    })?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config in {}", path.display()))
}

fn write_config(data_dir: &Path, config: &WalletConfig) -> Result<PathBuf> {
    let path = data_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write config to {}", path.display()))?;
    Ok(path)
}

/// Parse a hex identity key. Every intermediate copy of the secret is wiped.
fn parse_identity_key(raw: &str) -> Result<SecretKey> {
    let decoded = Zeroizing::new(hex::decode(raw.trim()).context("identity key is not hex")?);
    let mut bytes: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("identity key must be 32 bytes, got {}", decoded.len()))?;
    Ok(SecretKey::take(&mut bytes))
}

fn load_identity(data_dir: &Path) -> Result<PublicKey> {
    let path = data_dir.join(IDENTITY_FILE);
    let raw = Zeroizing::new(
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read identity key {}", path.display()))?,
    );
    let secret =
        parse_identity_key(&raw).with_context(|| format!("bad identity key {}", path.display()))?;
    public_key(&secret).context("identity key is not a valid secp256k1 scalar")
}

fn write_identity(data_dir: &Path) -> Result<(PathBuf, PublicKey)> {
    let (secret, identity) = generate_key();
    let path = data_dir.join(IDENTITY_FILE);
    let encoded = Zeroizing::new(hex::encode(secret.expose()));
    std::fs::write(&path, encoded.as_bytes())
        .with_context(|| format!("failed to write identity key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok((path, identity))
}

/// Create the data directory, identity key and config.
fn init_wallet(data_dir: &Path, args: cli::InitArgs) -> Result<()> {
    tracing::info!(data_dir = %data_dir.display(), market = %args.market, "initializing wallet");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    if data_dir.join(IDENTITY_FILE).exists() && !args.force {
        bail!(
            "{} already holds a wallet; pass --force to replace its identity",
            data_dir.display()
        );
    }

    let market_seed = match args.market_seed {
        Some(seed) => {
            let bytes = hex::decode(&seed).context("market seed must be hex")?;
            if bytes.is_empty() {
                bail!("market seed must not be empty");
            }
            seed
        }
        None => hex::encode(SecretKey::random().expose()),
    };

    let config = WalletConfig {
        market_name: args.market.clone(),
        market_seed,
        ..WalletConfig::default()
    };
    let config_path = write_config(data_dir, &config)?;
    let (key_path, identity) = write_identity(data_dir)?;

    tracing::info!(identity = %identity.short(), "wallet identity generated");

    println!("Wallet initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Market         : {}", args.market);
    println!("  Config         : {}", config_path.display());
    println!("  Identity key   : {}", key_path.display());
    println!("  Identity       : {}", identity.to_hex());
    Ok(())
}

/// Open store, event log and wallet, then reconcile.
async fn open_wallet(data_dir: &Path) -> Result<Wallet> {
    let config = load_config(data_dir)?;
    let identity = load_identity(data_dir)?;

    let db_path = data_dir.join(DB_DIR);
    let store = SledStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let log = LocalEventLog::from_db(store.db()).context("failed to open event log")?;

    let store: Arc<dyn VoucherStore> = Arc::new(store);
    let transport: Arc<dyn EventTransport> = Arc::new(log);
    let wallet = Wallet::open(config, identity, store, transport).context("failed to load wallet")?;

    let report = wallet.start().await.context("startup reconciliation failed")?;
    for id in &report.spent {
        tracing::info!(voucher = %id.short(), "transfer found in log; voucher marked spent");
    }
    for id in &report.ghosts {
        if report.restored.contains(id) {
            tracing::warn!(voucher = %id.short(), "unconfirmed transfer expired; voucher restored");
        } else {
            tracing::warn!(
                voucher = %id.short(),
                "unconfirmed transfer expired; run `bon-node cancel` once the receiver is known not to hold it"
            );
        }
    }
    Ok(wallet)
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

fn parse_id(hex_id: &str) -> Result<PublicKey> {
    PublicKey::from_hex(hex_id.trim()).with_context(|| format!("invalid voucher id `{hex_id}`"))
}

fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload.trim())
        .context("payload is not valid base64")
}

/// A scanned sender payload.
#[derive(Debug)]
enum Incoming {
    Offer(Offer),
    Snapshot(Snapshot),
}

fn parse_incoming(bytes: &[u8]) -> Result<Incoming> {
    if bytes.len() == SNAPSHOT_LENGTH && bytes.starts_with(&SNAPSHOT_MAGIC) {
        Ok(Incoming::Snapshot(
            Snapshot::decode(bytes).context("snapshot rejected")?,
        ))
    } else {
        Ok(Incoming::Offer(Offer::decode(bytes).context("offer rejected")?))
    }
}

/// An operation whose state change is committed but whose event is still
/// queued is a success for the user; the event goes out on the next sync.
fn committed<T>(result: Result<T, BonError>, what: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(BonError::Unpublished { event, source }) => {
            tracing::warn!(%event, error = %source, "event queued in outbox");
            println!("{what} recorded; event {event} will be published on the next sync.");
            Ok(None)
        }
        Err(e) => Err(e).context(format!("{what} failed")),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn execute(wallet: &Wallet, command: Commands) -> Result<()> {
    match command {
        Commands::Init(_) => bail!("init runs without an open wallet"),
        Commands::Issue(args) => {
            let metadata = VoucherMetadata {
                market: String::new(),
                issuer_name: args.name,
                category: args.category,
                rarity: args.rarity,
            };
            let validity = args.validity_days.map(|days| days * 86_400);
            let voucher = wallet
                .issue(args.value, validity, metadata)
                .context("issuance failed")?;
            println!("{}", voucher.id.to_hex());
        }
        Commands::Announce(arg) => {
            let id = parse_id(&arg.id)?;
            wallet.announce(&id).await.context("announce failed")?;
            println!("Announced {}.", id.short());
        }
        Commands::Sync => {
            let changed = wallet.sync_known().await.context("sync failed")?;
            let published = wallet.flush_outbox().await?;
            println!("{changed} known vouchers updated, {published} queued events published.");
        }
        Commands::Offer(args) => {
            let id = parse_id(&args.id)?;
            let offer = if args.again {
                wallet.current_offer(&id)
            } else {
                wallet.create_offer(&id)
            }
            .context("offer failed")?;
            println!("{}", BASE64.encode(offer.encode()));
        }
        Commands::Snapshot(arg) => {
            let id = parse_id(&arg.id)?;
            let snapshot = wallet.create_snapshot(&id).context("snapshot failed")?;
            println!("{}", BASE64.encode(snapshot.encode()));
        }
        Commands::Receive(arg) => {
            let bytes = decode_payload(&arg.payload)?;
            let ack = match parse_incoming(&bytes)? {
                Incoming::Offer(offer) => wallet.receive_offer(&offer),
                Incoming::Snapshot(snapshot) => wallet.receive_snapshot(&snapshot),
            }
            .context("receive failed")?;
            tracing::info!(voucher = %ack.voucher_id.short(), "voucher received");
            println!("{}", BASE64.encode(ack.encode()));
        }
        Commands::Complete(arg) => {
            let bytes = decode_payload(&arg.payload)?;
            let ack = Ack::decode(&bytes).context("ack rejected")?;
            if let Some(spent) = committed(wallet.complete_transfer(&ack).await, "transfer")? {
                println!("Transferred {} ({}).", spent.id.short(), spent.value);
            }
        }
        Commands::Cancel(arg) => {
            let id = parse_id(&arg.id)?;
            let voucher = wallet.cancel(&id).context("cancel failed")?;
            println!("{} is {}.", voucher.id.short(), voucher.status);
        }
        Commands::Burn(arg) => {
            let id = parse_id(&arg.id)?;
            if let Some(burned) = committed(wallet.burn(&id).await, "retirement")? {
                println!("Retired {} ({}).", burned.id.short(), burned.value);
            }
        }
        Commands::Reconcile => {
            let report = wallet.reconcile().await.context("reconcile failed")?;
            println!(
                "spent: {}, ghosts: {}, restored: {}, still locked: {}",
                report.spent.len(),
                report.ghosts.len(),
                report.restored.len(),
                report.still_locked.len()
            );
        }
        Commands::List(args) => list_vouchers(wallet, args.all),
        Commands::Run(args) => run_wallet(wallet, Duration::from_secs(args.interval_secs)).await?,
    }
    Ok(())
}

fn list_vouchers(wallet: &Wallet, all: bool) {
    let mut vouchers = wallet.ledger().list();
    vouchers.sort_by_key(|v| v.acquired_at);
    for v in vouchers.iter().filter(|v| all || !v.status.is_terminal()) {
        println!(
            "{}  {:>8}  {:<20}  hops={:<3} {}{}",
            v.id.to_hex(),
            v.value,
            v.status.to_string(),
            v.transfer_count,
            if v.is_issued_here() { "issuer " } else { "" },
            v.metadata.issuer_name,
        );
    }
    println!("balance: {}", wallet.balance());
}

// ---------------------------------------------------------------------------
// Online Mode
// ---------------------------------------------------------------------------

/// One maintenance pass. Failures are logged; the next tick retries.
async fn maintain(wallet: &Wallet, witness_day: &mut Option<chrono::NaiveDate>) {
    if let Err(e) = wallet.sync_known().await {
        tracing::warn!(error = %e, "sync failed");
    }
    if let Err(e) = wallet.reconcile().await {
        tracing::warn!(error = %e, "reconcile failed");
    }
    if let Err(e) = wallet.expire_due() {
        tracing::warn!(error = %e, "expiry sweep failed");
    }

    // Witness day keys rotate at UTC midnight; republish once per day.
    let today = utc_date(unix_now());
    if *witness_day == Some(today) {
        return;
    }
    let issued: Vec<_> = wallet
        .ledger()
        .list()
        .into_iter()
        .filter(|v| v.is_issued_here() && v.status == VoucherStatus::Active)
        .collect();
    let mut complete = true;
    for voucher in &issued {
        if let Err(e) = wallet.publish_witness(&voucher.id, today).await {
            tracing::warn!(voucher = %voucher.id.short(), error = %e, "witness not published");
            complete = false;
        }
    }
    if complete {
        tracing::info!(count = issued.len(), %today, "witnesses published");
        *witness_day = Some(today);
    }
}

async fn run_wallet(wallet: &Wallet, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        bail!("--interval-secs must be at least 1");
    }
    tracing::info!(
        identity = %wallet.identity().short(),
        market = %wallet.config().market_name,
        interval_secs = interval.as_secs(),
        "wallet online"
    );

    let mut ticker = tokio::time::interval(interval);
    let mut witness_day = None;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => maintain(wallet, &mut witness_day).await,
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    let pending = wallet.flush_outbox().await.unwrap_or(0);
    tracing::info!(published = pending, "bon-node stopped");
    Ok(())
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed the wait for that signal never completes.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
