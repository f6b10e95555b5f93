//! Receipts returned by successful engine operations.
//!
//! Events are values, not log entries: the engine never persists them. The
//! node forwards them to WebSocket subscribers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::identity::{Address, Identity};

/// What a committed operation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    #[serde(rename = "vault_initialized")]
    VaultInitialized {
        vault: Address,
        authority: Identity,
        timestamp: i64,
    },

    #[serde(rename = "deposit_initialized")]
    DepositInitialized {
        deposit: Address,
        owner: Identity,
        timestamp: i64,
    },

    /// Funds moved from the owner's native account into custody.
    #[serde(rename = "deposited")]
    Deposited {
        deposit: Address,
        owner: Identity,
        amount: u64,
        /// The owner's recorded balance after the deposit.
        balance: u64,
        /// The vault total after the deposit.
        total_balance: u64,
        timestamp: i64,
    },

    /// Funds moved out of custody back to the owner.
    #[serde(rename = "withdrawn")]
    Withdrawn {
        deposit: Address,
        owner: Identity,
        amount: u64,
        balance: u64,
        total_balance: u64,
        timestamp: i64,
    },
}

impl LedgerEvent {
    /// Short operation name, used as a metrics label.
    pub fn operation(&self) -> &'static str {
        match self {
            LedgerEvent::VaultInitialized { .. } => "initialize_vault",
            LedgerEvent::DepositInitialized { .. } => "initialize_deposit",
            LedgerEvent::Deposited { .. } => "deposit",
            LedgerEvent::Withdrawn { .. } => "withdraw",
        }
    }

    /// Milliseconds since the Unix epoch at which the operation committed.
    pub fn timestamp(&self) -> i64 {
        match self {
            LedgerEvent::VaultInitialized { timestamp, .. }
            | LedgerEvent::DepositInitialized { timestamp, .. }
            | LedgerEvent::Deposited { timestamp, .. }
            | LedgerEvent::Withdrawn { timestamp, .. } => *timestamp,
        }
    }
}

/// Current wall-clock time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
