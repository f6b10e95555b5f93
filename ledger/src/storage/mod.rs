//! # Storage Module
//!
//! The ledger store. One sled database, two trees:
//!
//! ```text
//! records          — address -> tagged record (Vault | UserDeposit)
//! native_accounts  — address -> u64 native currency balance
//! ```
//!
//! The second tree is the transfer executor's state. Keeping it in the same
//! database is what lets a currency movement and the ledger mutation it
//! pays for commit in one transaction.
//!
//! ## Concurrency
//!
//! Every mutation runs as a [`UnitOfWork`]: a sled multi-tree transaction.
//! sled transactions are optimistic. If another commit touches a key this
//! one read, the closure is re-run against fresh state, so increments of
//! the shared vault total are never lost. Operations on different deposit
//! records only meet on the vault key.

pub mod db;

pub use db::{abort, DbError, DbResult, LedgerDb, NativeAccounts, TxResult, UnitOfWork};
