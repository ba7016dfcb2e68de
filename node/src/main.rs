// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # QUARTZ Node
//!
//! Entry point for the `quartz-node` binary. Parses CLI arguments,
//! initializes logging, bootstraps storage and genesis state, wires the
//! networking stack, and serves the JSON-RPC API plus Prometheus metrics
//! until a shutdown signal arrives.
//!
//! Subcommands:
//!
//! - `run`     — start the node (add `--validator` to produce blocks)
//! - `init`    — create the data directory and generate a validator keypair
//! - `version` — print build version information

mod api;
mod cli;
mod genesis;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::oneshot;

use quartz_protocol::config;
use quartz_protocol::crypto::PrivateKey;
use quartz_protocol::network::{BlockProducer, BroadcastService, Mempool, Node, TcpTransport};
use quartz_protocol::storage::{Chain, SledStorage, State, Storage, StorageError};

use cli::{Commands, QuartzNodeCli};
use genesis::GenesisFile;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = QuartzNodeCli::parse();
    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node and blocks until shutdown.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        &format!(
            "quartz_node={level},quartz_protocol={level}",
            level = args.log_level
        ),
        LogFormat::from_str_lossy(&args.log_format),
    );

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    tracing::info!(
        p2p = %args.p2p_addr,
        rpc = %args.rpc_addr,
        metrics = %args.metrics_addr,
        data_dir = %data_dir.display(),
        "starting quartz-node"
    );

    // --- Storage ---
    let db_path = data_dir.join("db");
    let store: Arc<dyn Storage> = Arc::new(
        SledStorage::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );

    // --- Genesis ---
    let genesis_file = match &args.genesis {
        Some(path) => GenesisFile::load(path)?,
        None => {
            tracing::warn!("no genesis file given, using the empty default");
            GenesisFile::default()
        }
    };

    // The alloc map is written exactly once, before the chain installs the
    // genesis block. Restarts find block 0 on disk and skip it.
    let fresh = matches!(
        store.get_block_hash_by_height(0),
        Err(StorageError::NotFound)
    );
    if fresh {
        let state = State::new(Arc::clone(&store));
        genesis_file
            .apply_alloc(&state)
            .context("failed to apply genesis alloc")?;
        tracing::info!(accounts = genesis_file.alloc.len(), "genesis alloc applied");
    }

    let chain = Arc::new(
        Chain::new(Arc::clone(&store), genesis_file.block()).context("failed to open chain")?,
    );
    tracing::info!(height = chain.height(), "chain ready");

    // --- Mempool ---
    let mempool = Arc::new(Mempool::new(config::DEFAULT_MEMPOOL_CAPACITY));

    // --- Transport ---
    let transport = Arc::new(TcpTransport::new(args.p2p_addr.clone()));
    let rpc_rx = transport.consume();
    let peer_rx = transport.peer_events();
    transport
        .clone()
        .listen_and_accept()
        .await
        .with_context(|| format!("failed to listen on {}", args.p2p_addr))?;

    // --- Broadcast worker ---
    let (broadcaster, block_tx, tx_tx) = BroadcastService::new(Arc::clone(&transport));
    tokio::spawn(broadcaster.run());

    // --- Dispatcher ---
    let node = Node::new(
        format!("NODE-{}", args.p2p_addr),
        Arc::clone(&chain),
        Arc::clone(&mempool),
        Arc::clone(&transport),
        tx_tx.clone(),
    );
    let (quit_tx, quit_rx) = oneshot::channel();
    let dispatcher = tokio::spawn(node.run(rpc_rx, peer_rx, quit_rx));

    // --- Validator loop ---
    if let Some(key) = load_validator_key(&args, &data_dir)? {
        tracing::info!(validator = %key.public_key(), "validator key loaded");
        let producer = BlockProducer::new(
            key,
            Arc::clone(&chain),
            Arc::clone(&mempool),
            Duration::from_millis(args.block_time_ms),
            block_tx.clone(),
        );
        tokio::spawn(producer.run());
    }

    // --- Bootstrap peers ---
    for peer in &args.peers {
        if let Err(e) = transport.clone().dial(peer).await {
            tracing::warn!(peer = %peer, err = %e, "failed to dial bootstrap peer");
        }
    }

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    {
        let metrics = Arc::clone(&node_metrics);
        let chain = Arc::clone(&chain);
        let mempool = Arc::clone(&mempool);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let mut last_height = chain.height();
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                let height = chain.height();
                metrics.block_height.set(height as i64);
                metrics
                    .blocks_processed_total
                    .inc_by(height.saturating_sub(last_height) as u64);
                last_height = height;
                metrics
                    .transactions_in_mempool
                    .set(mempool.pending_count() as i64);
                metrics.connected_peers.set(transport.peer_count() as i64);
            }
        });
    }

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&args.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", args.metrics_addr))?;
    tracing::info!(addr = %args.metrics_addr, "metrics server listening");

    // --- JSON-RPC API ---
    let api_state = api::ApiState {
        chain: Arc::clone(&chain),
        mempool: Arc::clone(&mempool),
        tx_broadcast: tx_tx,
        metrics: Arc::clone(&node_metrics),
    };
    let api_router = api::create_router(api_state);
    let api_listener = tokio::net::TcpListener::bind(&args.rpc_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", args.rpc_addr))?;
    tracing::info!(addr = %args.rpc_addr, "rpc server listening");

    // --- Serve until shutdown ---
    tokio::select! {
        result = axum::serve(api_listener, api_router) => {
            if let Err(e) = result {
                tracing::error!(err = %e, "rpc server error");
            }
        }
        result = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = result {
                tracing::error!(err = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = quit_tx.send(());
    transport.close();
    let _ = dispatcher.await;
    store.close().context("failed to flush database")?;
    tracing::info!("quartz-node stopped");
    Ok(())
}

/// Resolves the validator key from the CLI flag or the key file. Returns
/// `None` when the node should run as a passive follower.
fn load_validator_key(args: &cli::RunArgs, data_dir: &std::path::Path) -> Result<Option<PrivateKey>> {
    if let Some(hex_key) = &args.validator_key {
        let key = PrivateKey::from_hex(hex_key.trim()).context("invalid --validator-key")?;
        return Ok(Some(key));
    }
    if args.validator {
        let key_path = data_dir.join("validator.key");
        let raw = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read validator key {}", key_path.display()))?;
        let key = PrivateKey::from_hex(raw.trim())
            .with_context(|| format!("invalid validator key in {}", key_path.display()))?;
        return Ok(Some(key));
    }
    Ok(None)
}

/// Creates the data directory and a fresh validator keypair.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("quartz_node=info", LogFormat::Pretty);

    let data_dir = cli::resolve_data_dir(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let key_path = data_dir.join("validator.key");
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            key_path.display()
        );
    }

    let key = PrivateKey::generate();
    std::fs::write(&key_path, key.to_hex())
        .with_context(|| format!("failed to write {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let public = key.public_key();
    println!("Node initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Validator key  : {}", key_path.display());
    println!("  Public key     : {}", public);
    println!("  Address        : {}", public.address());
    println!();
    println!("Fund the address in your genesis alloc to give it a balance.");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("quartz-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", config::PROTOCOL_VERSION);
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
