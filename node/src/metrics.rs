//! # Prometheus Metrics
//!
//! Operational metrics for the vault node, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated registry with the `vault`
//! prefix so it never collides with a default global registry.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::{Arc, Mutex, PoisonError};

use vault_ledger::AuditReport;

/// All Prometheus metric handles for the node.
///
/// prometheus handles are `Arc`s internally, so clones share state.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Serializes [`NodeMetrics::refresh_total_balance`].
    refresh_lock: Arc<Mutex<()>>,
    /// Ledger operations by `op` and `outcome` (`ok` or an error kind).
    pub operations_total: IntCounterVec,
    /// The vault total as of the last committed operation.
    pub total_balance: IntGauge,
    /// Number of deposit records.
    pub deposit_accounts: IntGauge,
    /// Wall-clock latency of ledger operations, in seconds.
    pub operation_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("vault".into()), None)
            .expect("failed to create prometheus registry");

        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Ledger operations by type and outcome"),
            &["op", "outcome"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(operations_total.clone()))
            .expect("metric registration");

        let total_balance = IntGauge::new(
            "total_balance",
            "Vault total balance in smallest units (saturates at i64::MAX)",
        )
        .expect("metric creation");
        registry
            .register(Box::new(total_balance.clone()))
            .expect("metric registration");

        let deposit_accounts = IntGauge::new("deposit_accounts", "Number of deposit records")
            .expect("metric creation");
        registry
            .register(Box::new(deposit_accounts.clone()))
            .expect("metric registration");

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Ledger operation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            refresh_lock: Arc::new(Mutex::new(())),
            operations_total,
            total_balance,
            deposit_accounts,
            operation_latency_seconds,
        }
    }

    /// Counts one operation and its outcome.
    pub fn record_operation(&self, op: &str, outcome: &str, elapsed_secs: f64) {
        self.operations_total.with_label_values(&[op, outcome]).inc();
        self.operation_latency_seconds.observe(elapsed_secs);
    }

    /// Sets the balance gauges from an audit.
    pub fn observe_audit(&self, report: &AuditReport) {
        self.total_balance
            .set(i64::try_from(report.total_balance).unwrap_or(i64::MAX));
        self.deposit_accounts
            .set(i64::try_from(report.deposit_count).unwrap_or(i64::MAX));
    }

    /// Sets the total-balance gauge directly.
    pub fn set_total_balance(&self, total: u64) {
        self.total_balance
            .set(i64::try_from(total).unwrap_or(i64::MAX));
    }

    /// Sets the total-balance gauge from a fresh read of committed state.
    ///
    /// Refreshes run one at a time, so the last refresh to finish publishes
    /// a total read after every commit that preceded it.
    pub fn refresh_total_balance<E>(
        &self,
        read: impl FnOnce() -> Result<u64, E>,
    ) -> Result<(), E> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.set_total_balance(read()?);
        Ok(())
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
