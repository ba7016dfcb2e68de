//! # CLI Interface
//!
//! Command-line argument structure for `quartz-node` using `clap` derive.
//! Three subcommands: `run`, `init`, and `version`. Every configurable
//! value has an environment-variable fallback for container deployments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// QUARTZ validator node.
///
/// A full node for a QUARTZ network: gossips transactions and blocks over
/// TCP, serves the JSON-RPC API, and, when given the validator key,
/// seals pending transactions into new blocks on a fixed cadence.
#[derive(Parser, Debug)]
#[command(name = "quartz-node", about = "QUARTZ blockchain node", version)]
pub struct QuartzNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory and generate a validator keypair.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Node data directory (database, keys). Created on first run.
    #[arg(long, short = 'd', env = "QUARTZ_DATA_DIR", default_value = "~/.quartz")]
    pub data_dir: PathBuf,

    /// Bind address for P2P communication with other nodes.
    #[arg(long, env = "QUARTZ_P2P_ADDR", default_value = "0.0.0.0:7340")]
    pub p2p_addr: String,

    /// Bind address for the JSON-RPC HTTP API.
    #[arg(long, env = "QUARTZ_RPC_ADDR", default_value = "0.0.0.0:7341")]
    pub rpc_addr: String,

    /// Bind address for the Prometheus metrics endpoint.
    #[arg(long, env = "QUARTZ_METRICS_ADDR", default_value = "0.0.0.0:7342")]
    pub metrics_addr: String,

    /// Path to the genesis file. Defaults to an empty-alloc genesis, which
    /// is only useful for single-node experiments.
    #[arg(long, env = "QUARTZ_GENESIS")]
    pub genesis: Option<PathBuf>,

    /// Peer addresses to dial at startup. Repeatable.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Run as the validator, loading the key from `<data-dir>/validator.key`.
    #[arg(long)]
    pub validator: bool,

    /// Hex-encoded validator private key. Overrides the key file.
    /// Never pass this flag in production; use the key file instead.
    #[arg(long, env = "QUARTZ_VALIDATOR_KEY")]
    pub validator_key: Option<String>,

    /// Block production cadence in milliseconds (validator only).
    #[arg(long, default_value_t = 5_000)]
    pub block_time_ms: u64,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, env = "QUARTZ_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: pretty or json.
    #[arg(long, env = "QUARTZ_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "QUARTZ_DATA_DIR", default_value = "~/.quartz")]
    pub data_dir: PathBuf,

    /// Overwrite an existing validator key. Destroys the old identity.
    #[arg(long)]
    pub force: bool,
}

/// Expands a leading `~` to the user's home directory; other paths pass
/// through unchanged.
pub fn resolve_data_dir(path: &std::path::Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if path_str.starts_with("~/") || path_str == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path_str.strip_prefix("~/").unwrap_or(""));
        }
    }
    path.to_path_buf()
}
