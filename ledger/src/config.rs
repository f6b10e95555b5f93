//! # Ledger Configuration & Constants
//!
//! Every magic number the ledger depends on lives here. Namespaces and
//! discriminators are part of the persisted layout: change them after a
//! deployment holds funds and every existing record becomes unreachable.

// ---------------------------------------------------------------------------
// Address Namespaces
// ---------------------------------------------------------------------------

/// Namespace of the singleton vault record. Derived without an owner.
pub const VAULT_NAMESPACE: &[u8] = b"vault";

/// Namespace of per-depositor records. Derived with the owner identity.
pub const DEPOSIT_NAMESPACE: &[u8] = b"deposit";

/// Deployment domain used when none is configured. Two deployments with
/// different domains derive disjoint address spaces from the same store.
pub const DEFAULT_DOMAIN: &str = "custody-vault/v1";

// ---------------------------------------------------------------------------
// Record Layout
// ---------------------------------------------------------------------------

/// Length of the kind discriminator prefixed to every stored record.
pub const DISCRIMINATOR_LENGTH: usize = 8;

/// Identity and address length in bytes.
pub const IDENTITY_LENGTH: usize = 32;

/// Encoded size of a vault record: discriminator + authority + total.
pub const VAULT_RECORD_LEN: usize = DISCRIMINATOR_LENGTH + IDENTITY_LENGTH + 8;

/// Encoded size of a deposit record: discriminator + owner + balance.
pub const DEPOSIT_RECORD_LEN: usize = DISCRIMINATOR_LENGTH + IDENTITY_LENGTH + 8;

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// Smallest currency units per whole coin. Nine decimals, display only;
/// the ledger never divides.
pub const UNITS_PER_COIN: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Node Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Capacity of the live event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Formats a unit amount as whole coins for logs, e.g. `1.500000000`.
pub fn format_coins(units: u64) -> String {
    format!("{}.{:09}", units / UNITS_PER_COIN, units % UNITS_PER_COIN)
}
