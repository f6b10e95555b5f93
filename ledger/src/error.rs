//! # Ledger Errors
//!
//! Every failed operation surfaces exactly one [`LedgerError`] naming what
//! went wrong. Nothing is swallowed, nothing is downgraded to a log line,
//! and a failed operation has written nothing.

use thiserror::Error;

use crate::identity::{Address, Identity};
use crate::state::RecordKind;
use crate::storage::DbError;

/// Convenience alias for results carrying a [`LedgerError`].
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failures of the native currency transfer paired with a ledger mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The paying account holds less than the amount being moved.
    #[error("insufficient funds in {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// The debited native account.
        account: Address,
        /// Its balance at the time of the transfer.
        available: u64,
        /// The amount requested.
        requested: u64,
    },

    /// Crediting the receiving account would exceed `u64::MAX`.
    #[error("credit to {account} would overflow")]
    Overflow {
        /// The credited native account.
        account: Address,
    },

    /// A transfer from an account to itself.
    #[error("source and destination are both {0}")]
    SelfTransfer(Address),
}

/// The ledger failure taxonomy.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An initialize call found a record already present at its address.
    #[error("{kind} already initialized at {address}")]
    AlreadyInitialized {
        /// Kind of record the call tried to create.
        kind: RecordKind,
        /// Where the existing record lives.
        address: Address,
    },

    /// An operation needed a record that does not exist.
    #[error("{kind} not initialized at {address}")]
    Uninitialized {
        /// Kind of the missing record.
        kind: RecordKind,
        /// Where it was expected.
        address: Address,
    },

    /// The caller targeted a record other than its own deposit record.
    #[error("{caller} may not act on record {address}")]
    Unauthorized {
        /// The identity that made the call.
        caller: Identity,
        /// The record it tried to touch.
        address: Address,
    },

    /// Zero (or otherwise disallowed) amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(u64),

    /// A withdrawal larger than the caller's own recorded balance.
    #[error("insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds {
        /// The caller's recorded balance.
        available: u64,
        /// The amount requested.
        requested: u64,
    },

    /// An addition would leave the `u64` range.
    #[error("{kind} balance overflow: current {current}, adding {amount}")]
    Overflow {
        /// Record whose balance would overflow.
        kind: RecordKind,
        /// Balance before the failed addition.
        current: u64,
        /// The amount being added.
        amount: u64,
    },

    /// A subtraction would go below zero. Unreachable while the
    /// insufficient-funds guard and the sum invariant hold.
    #[error("{kind} balance underflow: current {current}, subtracting {amount}")]
    Underflow {
        /// Record whose balance would underflow.
        kind: RecordKind,
        /// Balance before the failed subtraction.
        current: u64,
        /// The amount being subtracted.
        amount: u64,
    },

    /// The paired currency transfer could not be carried out.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    /// The ledger store failed or returned undecodable data.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl LedgerError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::AlreadyInitialized { .. } => "AlreadyInitialized",
            LedgerError::Uninitialized { .. } => "Uninitialized",
            LedgerError::Unauthorized { .. } => "Unauthorized",
            LedgerError::InvalidAmount(_) => "InvalidAmount",
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::Overflow { .. } => "Overflow",
            LedgerError::Underflow { .. } => "Underflow",
            LedgerError::TransferFailed(_) => "TransferFailed",
            LedgerError::Storage(_) => "Storage",
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        LedgerError::Storage(DbError::Sled(e))
    }
}
