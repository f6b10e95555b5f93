//! # Accounting Engine
//!
//! Validates and applies the four ledger transitions:
//!
//! | Operation            | Record touched          | Currency moved        |
//! |----------------------|-------------------------|-----------------------|
//! | `initialize_vault`   | Vault (create)          | none                  |
//! | `initialize_deposit` | UserDeposit (create)    | none                  |
//! | `deposit`            | Vault + UserDeposit     | caller -> custody     |
//! | `withdraw`           | Vault + UserDeposit     | custody -> caller     |
//!
//! The engine keeps no state between calls. Each operation is one
//! [`UnitOfWork`](crate::storage::UnitOfWork): read the records, validate,
//! move currency, write the records. Any failure aborts the unit and the
//! store is left exactly as it was.
//!
//! ## Validation order
//!
//! Deposit: amount, vault exists, record exists, caller owns record,
//! checked additions, transfer.
//!
//! Withdraw: amount, record exists, caller owns record, amount within the
//! caller's *own* balance, vault exists, checked subtractions, transfer.
//!
//! Rejected operations are returned to the caller as-is. The engine never
//! retries; only store-level write conflicts are re-run, by the store.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::{AddressDeriver, Blake3Deriver};
use crate::config::format_coins;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{now_millis, LedgerEvent};
use crate::identity::{Address, Identity};
use crate::state::{RecordKind, UserDeposit, Vault};
use crate::storage::{abort, DbResult, LedgerDb};
use crate::transfer::{SystemTransfer, TransferExecutor};

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Result of checking the books against the conservation invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Whether a vault record exists.
    pub vault_initialized: bool,
    /// `Vault.total_balance` (zero when uninitialized).
    pub total_balance: u64,
    /// Sum of every `UserDeposit.balance`.
    pub sum_of_deposits: u128,
    /// Number of deposit records.
    pub deposit_count: usize,
    /// Native currency held at the vault address.
    pub custody_balance: u64,
    /// The largest single deposit balance.
    pub max_deposit: u64,
    /// `total == sum`, no deposit above the total, custody covers the total.
    pub balanced: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The custodial accounting core.
///
/// Cheap to share: wrap in an `Arc` and call from as many threads as you
/// like. Operations on different depositors only contend on the vault
/// record, and the store serializes those.
#[derive(Debug, Clone)]
pub struct AccountingEngine<D = Blake3Deriver, T = SystemTransfer> {
    db: LedgerDb,
    deriver: D,
    transfer: T,
}

impl AccountingEngine {
    /// An engine over `db` with the default domain and native transfers.
    pub fn new(db: LedgerDb) -> Self {
        Self::with_parts(db, Blake3Deriver::default(), SystemTransfer)
    }

    /// An engine over `db` in the given deployment domain.
    pub fn with_domain(db: LedgerDb, domain: &str) -> Self {
        Self::with_parts(db, Blake3Deriver::new(domain), SystemTransfer)
    }
}

impl<D: AddressDeriver, T: TransferExecutor> AccountingEngine<D, T> {
    /// An engine with explicit collaborators.
    pub fn with_parts(db: LedgerDb, deriver: D, transfer: T) -> Self {
        Self {
            db,
            deriver,
            transfer,
        }
    }

    /// The underlying store.
    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    // -- Initialization -----------------------------------------------------

    /// Creates the vault with `caller` as authority and a zero total.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyInitialized`] if the vault exists. The existing
    /// record is left untouched.
    pub fn initialize_vault(&self, caller: &Identity) -> LedgerResult<LedgerEvent> {
        let address = self.deriver.vault_address();

        self.db
            .unit_of_work(|uow| {
                if uow.exists(&address)? {
                    return abort(LedgerError::AlreadyInitialized {
                        kind: RecordKind::Vault,
                        address,
                    });
                }
                uow.put(&address, &Vault::new(*caller))
            })
            .map_err(|e| rejected("initialize_vault", caller, e))?;

        info!(vault = %address, authority = %caller, "vault initialized");
        Ok(LedgerEvent::VaultInitialized {
            vault: address,
            authority: *caller,
            timestamp: now_millis(),
        })
    }

    /// Creates the caller's deposit record with a zero balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyInitialized`] if the caller already has one.
    /// The balance is never reset.
    pub fn initialize_deposit(&self, caller: &Identity) -> LedgerResult<LedgerEvent> {
        let address = self.deriver.deposit_address(caller);

        self.db
            .unit_of_work(|uow| {
                if uow.exists(&address)? {
                    return abort(LedgerError::AlreadyInitialized {
                        kind: RecordKind::UserDeposit,
                        address,
                    });
                }
                uow.put(&address, &UserDeposit::new(*caller))
            })
            .map_err(|e| rejected("initialize_deposit", caller, e))?;

        info!(deposit = %address, owner = %caller, "deposit record initialized");
        Ok(LedgerEvent::DepositInitialized {
            deposit: address,
            owner: *caller,
            timestamp: now_millis(),
        })
    }

    // -- Deposit ------------------------------------------------------------

    /// Moves `amount` from the caller's native account into custody and
    /// credits the caller's deposit record.
    pub fn deposit(&self, caller: &Identity, amount: u64) -> LedgerResult<LedgerEvent> {
        let target = self.deriver.deposit_address(caller);
        self.deposit_into(caller, &target, amount)
    }

    /// [`deposit`](Self::deposit) against an explicitly named record.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] for a zero amount.
    /// - [`LedgerError::Unauthorized`] if `target` is not the caller's record.
    /// - [`LedgerError::Uninitialized`] if the vault or the record is missing.
    /// - [`LedgerError::Overflow`] if either balance would exceed `u64::MAX`.
    /// - [`LedgerError::TransferFailed`] if the caller cannot pay.
    pub fn deposit_into(
        &self,
        caller: &Identity,
        target: &Address,
        amount: u64,
    ) -> LedgerResult<LedgerEvent> {
        if amount == 0 {
            return Err(rejected("deposit", caller, LedgerError::InvalidAmount(amount)));
        }

        if *target != self.deriver.deposit_address(caller) {
            return Err(rejected(
                "deposit",
                caller,
                LedgerError::Unauthorized {
                    caller: *caller,
                    address: *target,
                },
            ));
        }

        let vault_address = self.deriver.vault_address();
        let payer = Address::from(caller);

        let (balance, total_balance) = self
            .db
            .unit_of_work(|uow| {
                let Some(mut vault) = uow.get::<Vault>(&vault_address)? else {
                    return abort(LedgerError::Uninitialized {
                        kind: RecordKind::Vault,
                        address: vault_address,
                    });
                };
                let Some(mut record) = uow.get::<UserDeposit>(target)? else {
                    return abort(LedgerError::Uninitialized {
                        kind: RecordKind::UserDeposit,
                        address: *target,
                    });
                };
                if record.owner != *caller {
                    return abort(LedgerError::Unauthorized {
                        caller: *caller,
                        address: *target,
                    });
                }

                let Some(total) = vault.total_balance.checked_add(amount) else {
                    return abort(LedgerError::Overflow {
                        kind: RecordKind::Vault,
                        current: vault.total_balance,
                        amount,
                    });
                };
                let Some(balance) = record.balance.checked_add(amount) else {
                    return abort(LedgerError::Overflow {
                        kind: RecordKind::UserDeposit,
                        current: record.balance,
                        amount,
                    });
                };

                self.transfer
                    .transfer(uow.native(), &payer, &vault_address, amount)?;

                vault.total_balance = total;
                record.balance = balance;
                uow.put(&vault_address, &vault)?;
                uow.put(target, &record)?;
                Ok((balance, total))
            })
            .map_err(|e| rejected("deposit", caller, e))?;

        info!(
            owner = %caller,
            amount,
            balance,
            total = %format_coins(total_balance),
            "deposit committed"
        );
        Ok(LedgerEvent::Deposited {
            deposit: *target,
            owner: *caller,
            amount,
            balance,
            total_balance,
            timestamp: now_millis(),
        })
    }

    // -- Withdraw -----------------------------------------------------------

    /// Moves `amount` out of custody back to the caller and debits the
    /// caller's deposit record.
    pub fn withdraw(&self, caller: &Identity, amount: u64) -> LedgerResult<LedgerEvent> {
        let target = self.deriver.deposit_address(caller);
        self.withdraw_from(caller, &target, amount)
    }

    /// [`withdraw`](Self::withdraw) against an explicitly named record.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] for a zero amount.
    /// - [`LedgerError::Unauthorized`] if `target` is not the caller's record.
    /// - [`LedgerError::Uninitialized`] if the record or the vault is missing.
    /// - [`LedgerError::InsufficientFunds`] if `amount` exceeds the caller's
    ///   own balance, however much the vault holds in total.
    /// - [`LedgerError::TransferFailed`] if custody cannot pay out.
    pub fn withdraw_from(
        &self,
        caller: &Identity,
        target: &Address,
        amount: u64,
    ) -> LedgerResult<LedgerEvent> {
        if amount == 0 {
            return Err(rejected("withdraw", caller, LedgerError::InvalidAmount(amount)));
        }

        if *target != self.deriver.deposit_address(caller) {
            return Err(rejected(
                "withdraw",
                caller,
                LedgerError::Unauthorized {
                    caller: *caller,
                    address: *target,
                },
            ));
        }

        let vault_address = self.deriver.vault_address();
        let payee = Address::from(caller);

        let (balance, total_balance) = self
            .db
            .unit_of_work(|uow| {
                let Some(mut record) = uow.get::<UserDeposit>(target)? else {
                    return abort(LedgerError::Uninitialized {
                        kind: RecordKind::UserDeposit,
                        address: *target,
                    });
                };
                if record.owner != *caller {
                    return abort(LedgerError::Unauthorized {
                        caller: *caller,
                        address: *target,
                    });
                }
                if amount > record.balance {
                    return abort(LedgerError::InsufficientFunds {
                        available: record.balance,
                        requested: amount,
                    });
                }
                let Some(mut vault) = uow.get::<Vault>(&vault_address)? else {
                    return abort(LedgerError::Uninitialized {
                        kind: RecordKind::Vault,
                        address: vault_address,
                    });
                };

                let Some(total) = vault.total_balance.checked_sub(amount) else {
                    return abort(LedgerError::Underflow {
                        kind: RecordKind::Vault,
                        current: vault.total_balance,
                        amount,
                    });
                };
                let Some(balance) = record.balance.checked_sub(amount) else {
                    return abort(LedgerError::Underflow {
                        kind: RecordKind::UserDeposit,
                        current: record.balance,
                        amount,
                    });
                };

                self.transfer
                    .transfer(uow.native(), &vault_address, &payee, amount)?;

                vault.total_balance = total;
                record.balance = balance;
                uow.put(&vault_address, &vault)?;
                uow.put(target, &record)?;
                Ok((balance, total))
            })
            .map_err(|e| rejected("withdraw", caller, e))?;

        info!(
            owner = %caller,
            amount,
            balance,
            total = %format_coins(total_balance),
            "withdrawal committed"
        );
        Ok(LedgerEvent::Withdrawn {
            deposit: *target,
            owner: *caller,
            amount,
            balance,
            total_balance,
            timestamp: now_millis(),
        })
    }

    // -- Queries ------------------------------------------------------------

    /// Address of the singleton vault record.
    pub fn vault_address(&self) -> Address {
        self.deriver.vault_address()
    }

    /// Address of `owner`'s deposit record.
    pub fn deposit_address(&self, owner: &Identity) -> Address {
        self.deriver.deposit_address(owner)
    }

    /// Snapshot of the vault record.
    pub fn fetch_vault(&self) -> LedgerResult<Vault> {
        let address = self.deriver.vault_address();
        debug!(vault = %address, "fetching vault");
        self.db
            .get_record::<Vault>(&address)?
            .ok_or(LedgerError::Uninitialized {
                kind: RecordKind::Vault,
                address,
            })
    }

    /// Snapshot of `owner`'s deposit record.
    pub fn fetch_user_deposit(&self, owner: &Identity) -> LedgerResult<UserDeposit> {
        self.fetch_user_deposit_at(&self.deriver.deposit_address(owner))
    }

    /// Snapshot of the deposit record stored at `address`.
    pub fn fetch_user_deposit_at(&self, address: &Address) -> LedgerResult<UserDeposit> {
        debug!(deposit = %address, "fetching deposit record");
        self.db
            .get_record::<UserDeposit>(address)?
            .ok_or(LedgerError::Uninitialized {
                kind: RecordKind::UserDeposit,
                address: *address,
            })
    }

    /// Native currency balance of any account.
    pub fn native_balance(&self, account: &Address) -> LedgerResult<u64> {
        Ok(self.db.native_balance(account)?)
    }

    /// Native currency held in custody at the vault address.
    pub fn custody_balance(&self) -> LedgerResult<u64> {
        self.native_balance(&self.deriver.vault_address())
    }

    /// Checks the conservation invariants across every record.
    ///
    /// Reads are not one snapshot. Run it while no operations are in
    /// flight for an exact answer.
    pub fn audit(&self) -> LedgerResult<AuditReport> {
        let vault_address = self.deriver.vault_address();
        let vault = self.db.get_record::<Vault>(&vault_address)?;
        let total_balance = vault.map_or(0, |v| v.total_balance);

        let deposits = self.db.iter_user_deposits().collect::<DbResult<Vec<_>>>()?;
        let sum_of_deposits: u128 = deposits.iter().map(|(_, d)| u128::from(d.balance)).sum();
        let max_deposit = deposits.iter().map(|(_, d)| d.balance).max().unwrap_or(0);
        let custody_balance = self.db.native_balance(&vault_address)?;

        let balanced = sum_of_deposits == u128::from(total_balance)
            && max_deposit <= total_balance
            && custody_balance >= total_balance;

        let report = AuditReport {
            vault_initialized: vault.is_some(),
            total_balance,
            sum_of_deposits,
            deposit_count: deposits.len(),
            custody_balance,
            max_deposit,
            balanced,
        };

        if balanced {
            debug!(total = total_balance, deposits = report.deposit_count, "audit balanced");
        } else {
            warn!(?report, "audit found unbalanced books");
        }
        Ok(report)
    }
}

/// Logs a rejected operation and hands the error back.
fn rejected(op: &'static str, caller: &Identity, err: LedgerError) -> LedgerError {
    warn!(op, caller = %caller, kind = err.kind(), error = %err, "operation rejected");
    err
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
