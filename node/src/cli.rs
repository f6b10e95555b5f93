//! # CLI Interface
//!
//! Command-line arguments for `vault-node`, via `clap` derive. Every `run`
//! flag has an environment-variable fallback so the node can be configured
//! entirely from a container environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vault_ledger::config::{DEFAULT_DOMAIN, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};

use crate::logging::LogFormat;

/// Custodial vault ledger node.
///
/// Serves the vault's deposit/withdraw ledger over HTTP, streams ledger
/// events over WebSocket, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "vault-node",
    about = "Custodial vault ledger node",
    version,
    propagate_version = true
)]
pub struct VaultNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Audit a data directory offline and print the report as JSON.
    Audit(AuditArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the ledger database. Created on first run.
    #[arg(long, short = 'd', env = "VAULT_DATA_DIR", default_value = "./vault-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP and WebSocket API.
    #[arg(long, env = "VAULT_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "VAULT_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Deployment domain. Record addresses are derived under it, so two
    /// domains sharing a data directory never see each other's records.
    #[arg(long, env = "VAULT_DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub domain: String,

    /// JSON file of native account allocations, applied on first start only.
    #[arg(long, env = "VAULT_GENESIS")]
    pub genesis: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "VAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `audit` subcommand.
#[derive(Parser, Debug)]
pub struct AuditArgs {
    /// Directory holding the ledger database.
    #[arg(long, short = 'd', env = "VAULT_DATA_DIR", default_value = "./vault-data")]
    pub data_dir: PathBuf,

    /// Deployment domain to audit.
    #[arg(long, env = "VAULT_DOMAIN", default_value = DEFAULT_DOMAIN)]
    pub domain: String,
}
