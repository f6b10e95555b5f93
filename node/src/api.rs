//! # REST + WebSocket API
//!
//! The axum router exposing the vault ledger. Handlers share state through
//! axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                    | Description                          |
//! |--------|-------------------------|--------------------------------------|
//! | GET    | `/health`               | Liveness probe                       |
//! | GET    | `/status`               | Node and vault summary               |
//! | POST   | `/vault/initialize`     | Create the vault                     |
//! | POST   | `/deposits/initialize`  | Create the caller's deposit record   |
//! | POST   | `/deposits/deposit`     | Deposit into the caller's record     |
//! | POST   | `/deposits/withdraw`    | Withdraw from the caller's record    |
//! | GET    | `/vault`                | Vault record and custody balance     |
//! | GET    | `/deposits/:owner`      | Deposit record of an owner           |
//! | GET    | `/accounts/:address`    | Native balance of an account         |
//! | GET    | `/audit`                | Conservation audit                   |
//! | GET    | `/ws`                   | WebSocket stream of ledger events    |
//!
//! ## Trust
//!
//! The node trusts its callers. `caller` is a bare identity in the request
//! body and nothing proves the sender holds it, so the `Unauthorized` check
//! only stops a caller from acting on a record other than the one its
//! claimed identity owns. Put the node behind something that authenticates
//! clients before exposing it.
//!
//! ## Errors
//!
//! Failures come back as `{"error": "...", "kind": "..."}` where `kind` is
//! the ledger error name. The status code follows the kind: 409 for
//! `AlreadyInitialized`, 404 for `Uninitialized`, 403 for `Unauthorized`,
//! 400 for `InvalidAmount` and malformed identities, 422 for the balance
//! errors, 500 for storage failures.

use std::path::Path as FsPath;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vault_ledger::{
    AccountingEngine, Address, AuditReport, Identity, LedgerDb, LedgerError, LedgerEvent,
    LedgerResult,
};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Deployment domain the engine derives addresses under.
    pub domain: String,
    /// The accounting engine.
    pub engine: Arc<AccountingEngine>,
    /// Broadcast channel feeding WebSocket subscribers.
    pub event_tx: broadcast::Sender<LedgerEvent>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/vault/initialize", post(initialize_vault_handler))
        .route("/deposits/initialize", post(initialize_deposit_handler))
        .route("/deposits/deposit", post(deposit_handler))
        .route("/deposits/withdraw", post(withdraw_handler))
        .route("/vault", get(vault_handler))
        .route("/deposits/:owner", get(deposit_record_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/audit", get(audit_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request Types
// ---------------------------------------------------------------------------

/// Body of the initialize endpoints.
#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    /// Base58 identity of the caller.
    pub caller: String,
}

/// Body of the deposit and withdraw endpoints.
#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    /// Base58 identity of the caller.
    pub caller: String,
    /// Amount in smallest units.
    pub amount: u64,
    /// Record to operate on. Defaults to the caller's own.
    #[serde(default)]
    pub deposit_address: Option<String>,
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response body for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub domain: String,
    pub vault_address: String,
    pub vault_initialized: bool,
    pub total_balance: u64,
    pub deposit_count: usize,
    pub timestamp: String,
}

/// Response body for `GET /vault`.
#[derive(Debug, Serialize, Deserialize)]
pub struct VaultResponse {
    pub address: String,
    pub authority: String,
    pub total_balance: u64,
    /// Native currency actually held at the vault address.
    pub custody_balance: u64,
}

/// Response body for `GET /deposits/:owner`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DepositResponse {
    pub address: String,
    pub owner: String,
    pub balance: u64,
}

/// Response body for `GET /accounts/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: String,
    pub balance: u64,
}

/// Error body returned on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// The ledger rejected the request.
    Ledger(LedgerError),
    /// An identity or address in the request did not parse.
    InvalidIdentity(String),
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError::Ledger(e)
    }
}

/// HTTP status for a ledger error.
pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::AlreadyInitialized { .. } => StatusCode::CONFLICT,
        LedgerError::Uninitialized { .. } => StatusCode::NOT_FOUND,
        LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        LedgerError::InsufficientFunds { .. }
        | LedgerError::Overflow { .. }
        | LedgerError::Underflow { .. }
        | LedgerError::TransferFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Ledger(e) => {
                if matches!(e, LedgerError::Storage(_)) {
                    tracing::error!(error = %e, "ledger storage failure");
                }
                (
                    status_for(&e),
                    ErrorResponse {
                        error: e.to_string(),
                        kind: e.kind().to_string(),
                    },
                )
            }
            ApiError::InvalidIdentity(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: msg,
                    kind: "InvalidIdentity".to_string(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_identity(raw: &str) -> Result<Identity, ApiError> {
    Identity::from_str(raw).map_err(|e| ApiError::InvalidIdentity(format!("identity {raw:?}: {e}")))
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Address::from_str(raw).map_err(|e| ApiError::InvalidIdentity(format!("address {raw:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Operation Plumbing
// ---------------------------------------------------------------------------

/// Runs one ledger operation: times it, counts the outcome, updates the
/// balance gauges and fans the event out to WebSocket subscribers.
fn execute(
    state: &AppState,
    op: &'static str,
    f: impl FnOnce(&AccountingEngine) -> LedgerResult<LedgerEvent>,
) -> Result<Json<LedgerEvent>, ApiError> {
    let started = Instant::now();
    let result = f(&state.engine);
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    state
        .metrics
        .record_operation(op, outcome, started.elapsed().as_secs_f64());

    let event = result?;
    match &event {
        LedgerEvent::DepositInitialized { .. } => state.metrics.deposit_accounts.inc(),
        _ => {
            // The event's total may already be stale under concurrent writers.
            let refreshed = state
                .metrics
                .refresh_total_balance(|| state.engine.fetch_vault().map(|v| v.total_balance));
            if let Err(e) = refreshed {
                tracing::warn!(error = %e, "failed to refresh total balance gauge");
            }
        }
    }

    // No subscribers is not an error.
    let _ = state.event_tx.send(event.clone());
    Ok(Json(event))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — 200 while the process is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — node and vault summary.
async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let (vault_initialized, total_balance) = match state.engine.fetch_vault() {
        Ok(vault) => (true, vault.total_balance),
        Err(LedgerError::Uninitialized { .. }) => (false, 0),
        Err(e) => return Err(e.into()),
    };
    let deposit_count = state
        .engine
        .db()
        .deposit_count()
        .map_err(LedgerError::from)?;

    Ok(Json(StatusResponse {
        version: state.version.clone(),
        domain: state.domain.clone(),
        vault_address: state.engine.vault_address().to_base58(),
        vault_initialized,
        total_balance,
        deposit_count,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// `POST /vault/initialize`
async fn initialize_vault_handler(
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<LedgerEvent>, ApiError> {
    let caller = parse_identity(&req.caller)?;
    execute(&state, "initialize_vault", |engine| {
        engine.initialize_vault(&caller)
    })
}

/// `POST /deposits/initialize`
async fn initialize_deposit_handler(
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<LedgerEvent>, ApiError> {
    let caller = parse_identity(&req.caller)?;
    execute(&state, "initialize_deposit", |engine| {
        engine.initialize_deposit(&caller)
    })
}

/// `POST /deposits/deposit`
async fn deposit_handler(
    State(state): State<AppState>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<LedgerEvent>, ApiError> {
    let caller = parse_identity(&req.caller)?;
    let target = match req.deposit_address.as_deref() {
        Some(raw) => parse_address(raw)?,
        None => state.engine.deposit_address(&caller),
    };
    execute(&state, "deposit", |engine| {
        engine.deposit_into(&caller, &target, req.amount)
    })
}

/// `POST /deposits/withdraw`
async fn withdraw_handler(
    State(state): State<AppState>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<LedgerEvent>, ApiError> {
    let caller = parse_identity(&req.caller)?;
    let target = match req.deposit_address.as_deref() {
        Some(raw) => parse_address(raw)?,
        None => state.engine.deposit_address(&caller),
    };
    execute(&state, "withdraw", |engine| {
        engine.withdraw_from(&caller, &target, req.amount)
    })
}

/// `GET /vault` — the vault record plus what custody actually holds.
async fn vault_handler(State(state): State<AppState>) -> Result<Json<VaultResponse>, ApiError> {
    let vault = state.engine.fetch_vault()?;
    Ok(Json(VaultResponse {
        address: state.engine.vault_address().to_base58(),
        authority: vault.authority.to_base58(),
        total_balance: vault.total_balance,
        custody_balance: state.engine.custody_balance()?,
    }))
}

/// `GET /deposits/:owner`
async fn deposit_record_handler(
    Path(owner): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DepositResponse>, ApiError> {
    let owner = parse_identity(&owner)?;
    let record = state.engine.fetch_user_deposit(&owner)?;
    Ok(Json(DepositResponse {
        address: state.engine.deposit_address(&owner).to_base58(),
        owner: record.owner.to_base58(),
        balance: record.balance,
    }))
}

/// `GET /accounts/:address` — native balance; zero for unknown accounts.
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = parse_address(&address)?;
    Ok(Json(AccountResponse {
        address: account.to_base58(),
        balance: state.engine.native_balance(&account)?,
    }))
}

/// `GET /audit` — runs the conservation audit and refreshes the gauges.
async fn audit_handler(State(state): State<AppState>) -> Result<Json<AuditReport>, ApiError> {
    let report = state.engine.audit()?;
    state.metrics.observe_audit(&report);
    Ok(Json(report))
}

/// `GET /ws` — upgrades to a WebSocket streaming [`LedgerEvent`]s.
///
/// Push-only: client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards broadcast events until the client goes away.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize ledger event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Genesis Allocations
// ---------------------------------------------------------------------------

/// Initial native balances, read from a JSON file.
///
/// ```json
/// { "allocations": [ { "account": "<base58>", "balance": 5000000000 } ] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisFile {
    pub allocations: Vec<GenesisAllocation>,
}

/// One native account credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub account: Address,
    pub balance: u64,
}

/// Reads and parses a genesis file.
pub fn load_genesis(path: &FsPath) -> anyhow::Result<GenesisFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read genesis file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse genesis file {}", path.display()))
}

/// Credits the allocations if no native account exists yet.
///
/// Returns how many allocations were applied: all of them on first start,
/// zero on every start after.
pub fn apply_genesis(db: &LedgerDb, genesis: &GenesisFile) -> anyhow::Result<usize> {
    if db.native_account_count() > 0 {
        tracing::info!("native accounts present, genesis already applied");
        return Ok(0);
    }

    for allocation in &genesis.allocations {
        db.credit_native(&allocation.account, allocation.balance)
            .with_context(|| format!("failed to credit genesis account {}", allocation.account))?;
    }
    db.flush().context("failed to flush genesis allocations")?;

    tracing::info!(accounts = genesis.allocations.len(), "genesis allocations applied");
    Ok(genesis.allocations.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use vault_ledger::config::UNITS_PER_COIN;

    /// AppState over a temporary store, plus one funded identity.
    fn test_app_state() -> (AppState, Identity) {
        let db = LedgerDb::open_temporary().expect("temp db");
        let user = Identity::new_unique();
        db.credit_native(&Address::from(&user), 10 * UNITS_PER_COIN)
            .expect("fund user");
        let (event_tx, _) = broadcast::channel(16);

        let state = AppState {
            version: "0.1.0-test".into(),
            domain: "test".into(),
            engine: Arc::new(AccountingEngine::with_domain(db, "test")),
            event_tx,
            metrics: Arc::new(crate::metrics::NodeMetrics::new()),
        };
        (state, user)
    }

    /// Vault initialized, `user` has a deposit record.
    fn ready_state() -> (AppState, Identity) {
        let (state, user) = test_app_state();
        state
            .engine
            .initialize_vault(&Identity::new_unique())
            .unwrap();
        state.engine.initialize_deposit(&user).unwrap();
        (state, user)
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    // -- 1. Health --------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state();
        let router = create_router(state);
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
    }

    // -- 2. Status before and after vault initialization ------------------------

    #[tokio::test]
    async fn status_reflects_vault_initialization() {
        let (state, user) = test_app_state();
        let router = create_router(state);

        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["vault_initialized"], false);

        let (status, _) = post_json(
            &router,
            "/vault/initialize",
            serde_json::json!({ "caller": user.to_base58() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = get(&router, "/status").await;
        let status_json = json(&body);
        assert_eq!(status_json["vault_initialized"], true);
        assert_eq!(status_json["total_balance"], 0);
        assert_eq!(status_json["domain"], "test");
    }

    // -- 3. Full deposit / withdraw flow over HTTP ------------------------------

    #[tokio::test]
    async fn deposit_and_withdraw_flow() {
        let (state, user) = ready_state();
        let router = create_router(state);
        let caller = user.to_base58();

        let (status, body) = post_json(
            &router,
            "/deposits/deposit",
            serde_json::json!({ "caller": caller, "amount": 1_000_000_000u64 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let event = json(&body);
        assert_eq!(event["type"], "deposited");
        assert_eq!(event["balance"], 1_000_000_000u64);

        let (status, _) = post_json(
            &router,
            "/deposits/withdraw",
            serde_json::json!({ "caller": caller, "amount": 500_000_000u64 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(&router, &format!("/deposits/{caller}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["balance"], 500_000_000u64);

        let (_, body) = get(&router, "/vault").await;
        let vault = json(&body);
        assert_eq!(vault["total_balance"], 500_000_000u64);
        assert_eq!(vault["custody_balance"], 500_000_000u64);

        let (_, body) = get(&router, &format!("/accounts/{caller}")).await;
        assert_eq!(json(&body)["balance"], 9_500_000_000u64);
    }

    // -- 4. Over-withdrawal maps to 422 ----------------------------------------

    #[tokio::test]
    async fn over_withdrawal_is_unprocessable() {
        let (state, user) = ready_state();
        state.engine.deposit(&user, 500_000_000).unwrap();
        let router = create_router(state);

        let (status, body) = post_json(
            &router,
            "/deposits/withdraw",
            serde_json::json!({ "caller": user.to_base58(), "amount": 100_000_000_000u64 }),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json(&body)["kind"], "InsufficientFunds");
    }

    // -- 5. Double initialization maps to 409 ----------------------------------

    #[tokio::test]
    async fn double_vault_initialization_conflicts() {
        let (state, user) = ready_state();
        let router = create_router(state);

        let (status, body) = post_json(
            &router,
            "/vault/initialize",
            serde_json::json!({ "caller": user.to_base58() }),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json(&body)["kind"], "AlreadyInitialized");
    }

    // -- 6. Missing records map to 404 -----------------------------------------

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let (state, user) = test_app_state();
        let router = create_router(state);

        let (status, body) = get(&router, "/vault").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["kind"], "Uninitialized");

        let (status, _) = get(&router, &format!("/deposits/{}", user.to_base58())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- 7. Foreign record maps to 403 -----------------------------------------

    #[tokio::test]
    async fn foreign_deposit_address_is_forbidden() {
        let (state, user) = ready_state();
        let victim = Identity::new_unique();
        state.engine.initialize_deposit(&victim).unwrap();
        let victim_record = state.engine.deposit_address(&victim).to_base58();
        let router = create_router(state);

        let (status, body) = post_json(
            &router,
            "/deposits/withdraw",
            serde_json::json!({
                "caller": user.to_base58(),
                "amount": 1,
                "deposit_address": victim_record,
            }),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json(&body)["kind"], "Unauthorized");
    }

    #[tokio::test]
    async fn vault_address_as_deposit_target_is_forbidden() {
        let (state, user) = ready_state();
        state.engine.deposit(&user, 30).unwrap();
        let vault = state.engine.vault_address().to_base58();
        let engine = Arc::clone(&state.engine);
        let router = create_router(state);

        for path in ["/deposits/deposit", "/deposits/withdraw"] {
            let (status, body) = post_json(
                &router,
                path,
                serde_json::json!({
                    "caller": user.to_base58(),
                    "amount": 10,
                    "deposit_address": vault,
                }),
            )
            .await;

            assert_eq!(status, StatusCode::FORBIDDEN, "{path}");
            assert_eq!(json(&body)["kind"], "Unauthorized", "{path}");
        }
        assert_eq!(engine.fetch_vault().unwrap().total_balance, 30);
    }

    // -- 8. Bad input maps to 400 ----------------------------------------------

    #[tokio::test]
    async fn zero_amount_and_bad_identity_are_bad_requests() {
        let (state, user) = ready_state();
        let router = create_router(state);

        let (status, body) = post_json(
            &router,
            "/deposits/deposit",
            serde_json::json!({ "caller": user.to_base58(), "amount": 0 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["kind"], "InvalidAmount");

        let (status, body) = post_json(
            &router,
            "/deposits/deposit",
            serde_json::json!({ "caller": "not-base58!", "amount": 5 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["kind"], "InvalidIdentity");
    }

    // -- 9. Audit endpoint -----------------------------------------------------

    #[tokio::test]
    async fn audit_endpoint_reports_balanced_books() {
        let (state, user) = ready_state();
        state.engine.deposit(&user, 42).unwrap();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);

        let (status, body) = get(&router, "/audit").await;

        assert_eq!(status, StatusCode::OK);
        let report = json(&body);
        assert_eq!(report["balanced"], true);
        assert_eq!(report["total_balance"], 42);
        assert_eq!(report["deposit_count"], 1);
        assert_eq!(metrics.deposit_accounts.get(), 1);
    }

    // -- 10. Operations are counted and broadcast ------------------------------

    #[tokio::test]
    async fn operations_are_counted_and_broadcast() {
        let (state, user) = ready_state();
        let mut rx = state.event_tx.subscribe();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);
        let caller = user.to_base58();

        post_json(
            &router,
            "/deposits/deposit",
            serde_json::json!({ "caller": caller, "amount": 7 }),
        )
        .await;
        post_json(
            &router,
            "/deposits/withdraw",
            serde_json::json!({ "caller": caller, "amount": 8 }),
        )
        .await;

        let event = rx.try_recv().expect("deposit event broadcast");
        assert!(matches!(event, LedgerEvent::Deposited { amount: 7, .. }));
        assert!(rx.try_recv().is_err(), "rejected withdraw must not broadcast");

        let counted = |op: &str, outcome: &str| {
            metrics
                .operations_total
                .with_label_values(&[op, outcome])
                .get()
        };
        assert_eq!(counted("deposit", "ok"), 1);
        assert_eq!(counted("withdraw", "InsufficientFunds"), 1);
        assert_eq!(metrics.total_balance.get(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn total_balance_gauge_settles_on_committed_total() {
        let (state, user) = ready_state();
        let metrics = Arc::clone(&state.metrics);
        let engine = Arc::clone(&state.engine);
        let router = create_router(state);
        let caller = user.to_base58();

        let mut tasks = Vec::new();
        for i in 0..16u64 {
            let router = router.clone();
            let (path, amount) = if i % 4 == 3 {
                ("/deposits/withdraw", 1)
            } else {
                ("/deposits/deposit", 2)
            };
            let body = serde_json::json!({ "caller": caller, "amount": amount });
            tasks.push(tokio::spawn(async move { post_json(&router, path, body).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let total = engine.fetch_vault().unwrap().total_balance;
        assert_eq!(metrics.total_balance.get(), i64::try_from(total).unwrap());
        assert!(engine.audit().unwrap().balanced);
    }

    // -- 11. Genesis allocations apply once ------------------------------------

    #[tokio::test]
    async fn genesis_applies_only_to_empty_store() {
        let db = LedgerDb::open_temporary().unwrap();
        let account = Address::from(&Identity::new_unique());
        let genesis = GenesisFile {
            allocations: vec![GenesisAllocation {
                account,
                balance: 3 * UNITS_PER_COIN,
            }],
        };

        assert_eq!(apply_genesis(&db, &genesis).unwrap(), 1);
        assert_eq!(apply_genesis(&db, &genesis).unwrap(), 0);
        assert_eq!(db.native_balance(&account).unwrap(), 3 * UNITS_PER_COIN);
    }

    #[tokio::test]
    async fn genesis_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        let account = Address::from(&Identity::new_unique());
        std::fs::write(
            &path,
            serde_json::json!({
                "allocations": [ { "account": account.to_base58(), "balance": 12 } ]
            })
            .to_string(),
        )
        .unwrap();

        let genesis = load_genesis(&path).unwrap();

        assert_eq!(genesis.allocations.len(), 1);
        assert_eq!(genesis.allocations[0].account, account);
        assert_eq!(genesis.allocations[0].balance, 12);
        assert!(load_genesis(&dir.path().join("missing.json")).is_err());
    }
}
