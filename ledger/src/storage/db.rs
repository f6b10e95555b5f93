//! # LedgerDb — Transactional Record Store
//!
//! Built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree              | Key              | Value                          |
//! |-------------------|------------------|--------------------------------|
//! | `records`         | address (32B)    | discriminator (8B) + bincode   |
//! | `native_accounts` | address (32B)    | balance (8B BE)                |
//!
//! ## Atomicity
//!
//! [`LedgerDb::unit_of_work`] opens a transaction spanning both trees. The
//! closure stages reads and writes through a [`UnitOfWork`]; returning an
//! error aborts the whole thing and nothing lands. Returning `Ok` commits
//! every staged write at once. On a write-write conflict sled discards the
//! attempt and runs the closure again, which is why the closure must be
//! free of side effects outside the transaction view.

use std::path::Path;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};

use crate::error::{LedgerError, LedgerResult};
use crate::identity::Address;
use crate::state::{Record, RecordKind, UserDeposit};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Bytes at an address carry the wrong (or no) record discriminator.
    #[error("record kind mismatch: expected {expected}, found {found:?}")]
    KindMismatch {
        expected: RecordKind,
        found: Option<RecordKind>,
    },

    #[error("native balance overflow at {0}")]
    NativeOverflow(Address),
}

pub type DbResult<T> = Result<T, DbError>;

/// Result type of every step inside a unit of work.
pub type TxResult<T> = ConflictableTransactionResult<T, LedgerError>;

/// Aborts the surrounding unit of work with `err`.
pub fn abort<T>(err: impl Into<LedgerError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization(format!("expected 8 balance bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_address(bytes: &[u8]) -> DbResult<Address> {
    let raw: [u8; 32] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization(format!("expected 32 address bytes, got {}", bytes.len())))?;
    Ok(Address::new(raw))
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent storage for ledger records and native balances.
///
/// # Thread Safety
///
/// sled trees support lock-free concurrent reads and serializable
/// transactions. `LedgerDb` is a cheap handle clone; share it across
/// threads freely.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    /// The underlying sled database handle.
    db: Db,
    /// Vault and deposit records keyed by derived address.
    records: Tree,
    /// Native currency balances keyed by account address.
    native: Tree,
}

impl LedgerDb {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary store, removed when the last handle drops.
    ///
    /// Ideal for unit tests: no filesystem side effects, no cleanup.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let records = db.open_tree("records")?;
        let native = db.open_tree("native_accounts")?;
        Ok(Self {
            db,
            records,
            native,
        })
    }

    // -- Unit of work -------------------------------------------------------

    /// Runs `f` as one atomic transaction over both trees.
    ///
    /// Aborts map to the returned error; conflicts are retried by sled.
    pub fn unit_of_work<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: Fn(&UnitOfWork<'_>) -> TxResult<T>,
    {
        let result = (&self.records, &self.native).transaction(|(records, native)| {
            let uow = UnitOfWork {
                records,
                native: NativeAccounts { tree: native },
            };
            f(&uow)
        });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(LedgerError::Storage(DbError::Sled(err))),
        }
    }

    // -- Record reads -------------------------------------------------------

    /// Reads a typed record. `None` when nothing is stored at `address`.
    pub fn get_record<R: Record>(&self, address: &Address) -> DbResult<Option<R>> {
        match self.records.get(address.as_bytes())? {
            Some(bytes) => Ok(Some(R::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the kind of record stored at `address`, if any.
    pub fn record_kind(&self, address: &Address) -> DbResult<Option<RecordKind>> {
        Ok(self
            .records
            .get(address.as_bytes())?
            .and_then(|bytes| RecordKind::of(&bytes)))
    }

    /// Every deposit record in the store, in address order.
    ///
    /// Not a snapshot: records committed while the scan runs may or may not
    /// be included.
    pub fn iter_user_deposits(&self) -> impl Iterator<Item = DbResult<(Address, UserDeposit)>> {
        self.records.iter().filter_map(|entry| {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(err) => return Some(Err(DbError::Sled(err))),
            };
            if RecordKind::of(&value) != Some(RecordKind::UserDeposit) {
                return None;
            }
            Some(decode_address(&key).and_then(|address| Ok((address, UserDeposit::decode(&value)?))))
        })
    }

    /// Number of deposit records.
    pub fn deposit_count(&self) -> DbResult<usize> {
        let mut count = 0;
        for entry in self.records.iter() {
            let (_, value) = entry?;
            if RecordKind::of(&value) == Some(RecordKind::UserDeposit) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Total number of stored records of any kind.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    // -- Native accounts ----------------------------------------------------

    /// Native balance of `account`. Unknown accounts hold zero.
    pub fn native_balance(&self, account: &Address) -> DbResult<u64> {
        match self.native.get(account.as_bytes())? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Adds `amount` to a native account and returns the new balance.
    ///
    /// Used for genesis allocations and test funding. Never called by the
    /// accounting engine.
    pub fn credit_native(&self, account: &Address, amount: u64) -> DbResult<u64> {
        let result = self.native.transaction(|tx| {
            let current = match tx.get(account.as_bytes())? {
                Some(bytes) => decode_u64(&bytes).map_err(ConflictableTransactionError::Abort)?,
                None => 0,
            };
            let next = current
                .checked_add(amount)
                .ok_or(ConflictableTransactionError::Abort(DbError::NativeOverflow(*account)))?;
            tx.insert(account.as_bytes().as_slice(), &next.to_be_bytes()[..])?;
            Ok(next)
        });

        match result {
            Ok(balance) => Ok(balance),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(DbError::Sled(err)),
        }
    }

    /// Number of native accounts ever credited.
    pub fn native_account_count(&self) -> usize {
        self.native.len()
    }

    // -- Utility ------------------------------------------------------------

    /// Blocks until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// Transactional view handed to a [`LedgerDb::unit_of_work`] closure.
pub struct UnitOfWork<'a> {
    records: &'a TransactionalTree,
    native: NativeAccounts<'a>,
}

impl<'a> UnitOfWork<'a> {
    /// Reads a typed record inside the transaction.
    pub fn get<R: Record>(&self, address: &Address) -> TxResult<Option<R>> {
        match self.records.get(address.as_bytes())? {
            Some(bytes) => match R::decode(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(err) => abort(err),
            },
            None => Ok(None),
        }
    }

    /// Returns `true` when any record is stored at `address`.
    pub fn exists(&self, address: &Address) -> TxResult<bool> {
        Ok(self.records.get(address.as_bytes())?.is_some())
    }

    /// Stages a typed record write.
    pub fn put<R: Record>(&self, address: &Address, record: &R) -> TxResult<()> {
        let bytes = match record.encode() {
            Ok(bytes) => bytes,
            Err(err) => return abort(err),
        };
        self.records.insert(address.as_bytes().as_slice(), bytes)?;
        Ok(())
    }

    /// The native account view sharing this transaction.
    pub fn native(&self) -> &NativeAccounts<'a> {
        &self.native
    }
}

// ---------------------------------------------------------------------------
// NativeAccounts
// ---------------------------------------------------------------------------

/// Native currency balances, as seen from inside a unit of work.
pub struct NativeAccounts<'a> {
    tree: &'a TransactionalTree,
}

impl NativeAccounts<'_> {
    /// Balance of `account`; zero when never credited.
    pub fn balance(&self, account: &Address) -> TxResult<u64> {
        match self.tree.get(account.as_bytes())? {
            Some(bytes) => match decode_u64(&bytes) {
                Ok(balance) => Ok(balance),
                Err(err) => abort(err),
            },
            None => Ok(0),
        }
    }

    /// Stages a new balance for `account`.
    pub fn set_balance(&self, account: &Address, balance: u64) -> TxResult<()> {
        self.tree.insert(account.as_bytes().as_slice(), &balance.to_be_bytes()[..])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
