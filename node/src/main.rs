// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Vault Node
//!
//! Entry point for the `vault-node` binary. Parses CLI arguments, sets up
//! logging and metrics, opens the ledger and serves the HTTP/WS API.
//!
//! Subcommands:
//!
//! - `run`     — serve the ledger
//! - `audit`   — check a data directory's books offline
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use vault_ledger::config::EVENT_CHANNEL_CAPACITY;
use vault_ledger::{AccountingEngine, LedgerDb};

use cli::{Commands, VaultNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VaultNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Audit(args) => audit_ledger(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens (creating if needed) the ledger database under `data_dir`.
fn open_ledger(data_dir: &Path) -> Result<LedgerDb> {
    let db_path = data_dir.join("ledger");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open ledger at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "ledger opened");
    Ok(db)
}

/// Serves the ledger API and the metrics endpoint until shutdown.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        domain = %args.domain,
        data_dir = %args.data_dir.display(),
        "starting vault-node"
    );

    // --- Persistent storage ---
    let db = open_ledger(&args.data_dir)?;

    // --- Genesis allocations ---
    if let Some(path) = &args.genesis {
        let genesis = api::load_genesis(path)?;
        api::apply_genesis(&db, &genesis)?;
    }

    // --- Engine ---
    let engine = Arc::new(AccountingEngine::with_domain(db.clone(), &args.domain));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let report = engine.audit().context("startup audit failed")?;
    node_metrics.observe_audit(&report);
    if report.balanced {
        tracing::info!(
            total = report.total_balance,
            deposits = report.deposit_count,
            "startup audit balanced"
        );
    } else {
        tracing::error!(?report, "startup audit found unbalanced books");
    }

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        domain: args.domain.clone(),
        engine,
        event_tx,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!(addr = %api_addr, "API server listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!(addr = %metrics_addr, "metrics server listening");

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush ledger on shutdown")?;
    tracing::info!("vault-node stopped");
    Ok(())
}

/// Audits a data directory without starting the server.
///
/// Prints the report as JSON on stdout and fails if the books don't balance.
fn audit_ledger(args: cli::AuditArgs) -> Result<()> {
    logging::init_logging("vault_node=warn,vault_ledger=warn", LogFormat::Pretty);

    let db = open_ledger(&args.data_dir)?;
    let engine = AccountingEngine::with_domain(db, &args.domain);
    let report = engine.audit().context("audit failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    anyhow::ensure!(report.balanced, "ledger books are unbalanced");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("vault-node   {}", env!("CARGO_PKG_VERSION"));
    println!("domain       {}", vault_ledger::config::DEFAULT_DOMAIN);
    println!("rustc        {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
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
