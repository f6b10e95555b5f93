// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Vault Ledger — Custodial Accounting Core
//!
//! A single shared pool that tracks aggregate deposited funds, plus one
//! ledger entry per depositor recording that depositor's claim on the pool.
//! Small surface, strict books: the sum of every depositor's balance is the
//! vault total, always, no matter how many callers are hammering the store
//! at once.
//!
//! ## Architecture
//!
//! - **identity** — Opaque 32-byte identities and storage addresses.
//! - **address** — Deterministic address derivation (namespace + owner).
//! - **state** — The two record types and their tagged on-disk codec.
//! - **storage** — sled-backed ledger store with transactional trees.
//! - **transfer** — Native currency movement inside the ledger transaction.
//! - **engine** — The four state transitions, queries and the audit.
//! - **events** — Receipts emitted by successful operations.
//! - **error** — The failure taxonomy every operation reports through.
//! - **config** — Namespaces, discriminators and other constants.
//!
//! ## Ground Rules
//!
//! 1. All amounts are `u64` in the smallest currency unit. Checked math only.
//! 2. A currency transfer and the ledger mutation it pays for commit in the
//!    same store transaction, or neither does.
//! 3. The engine holds no state of its own. Every call reads, validates and
//!    writes back atomically.

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod state;
pub mod storage;
pub mod transfer;

pub use address::{AddressDeriver, Blake3Deriver};
pub use engine::{AccountingEngine, AuditReport};
pub use error::{LedgerError, LedgerResult, TransferError};
pub use events::LedgerEvent;
pub use identity::{Address, Identity, IdentityError};
pub use state::{RecordKind, UserDeposit, Vault};
pub use storage::{DbError, LedgerDb, NativeAccounts, TxResult};
pub use transfer::{SystemTransfer, TransferExecutor};
