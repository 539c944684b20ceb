//! # CLI Interface
//!
//! Defines the command-line argument structure for `tanglecart-node` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// tanglecart shop node.
///
/// Sells catalog items for IOTA transfers. Serves the purchase API, checks
/// claimed payments against a ledger node, and runs the purchased grants on
/// the game server console.
#[derive(Parser, Debug)]
#[command(
    name = "tanglecart-node",
    about = "tanglecart shop node",
    version,
    propagate_version = true
)]
pub struct ShopNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the shop node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the shop node.
    Run(RunArgs),
    /// Initialize a data directory with a default config and catalog.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Where payment verification looks for transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LedgerKind {
    /// A real ledger node at `ledger.node_url`.
    Node,
    /// An in-process ledger with no transfers. Local development only.
    Mock,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the shop configuration file (JSON).
    ///
    /// When omitted, the node reads `config.json` from the data directory.
    #[arg(long, short = 'c', env = "TANGLECART_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the config, catalog, and database.
    #[arg(long, short = 'd', env = "TANGLECART_DATA_DIR", default_value = "tanglecart")]
    pub data_dir: PathBuf,

    /// Ledger backend used for payment verification.
    #[arg(long, env = "TANGLECART_LEDGER", value_enum, default_value_t = LedgerKind::Node)]
    pub ledger: LedgerKind,

    /// Log output format.
    #[arg(long, env = "TANGLECART_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "TANGLECART_DATA_DIR", default_value = "tanglecart")]
    pub data_dir: PathBuf,
}
