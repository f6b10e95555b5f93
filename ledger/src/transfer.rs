//! # Native Currency Transfers
//!
//! Deposits and withdrawals move real funds between a caller's native
//! account and the vault's custody account. The movement is performed by a
//! [`TransferExecutor`] *inside* the same unit of work as the ledger write,
//! so a rejected transfer leaves the ledger untouched and a rejected ledger
//! write leaves the currency where it was.
//!
//! The default executor, [`SystemTransfer`], debits and credits balances in
//! the store's `native_accounts` tree.

use crate::error::TransferError;
use crate::identity::Address;
use crate::storage::{abort, NativeAccounts, TxResult};

/// Moves native currency between two accounts within a unit of work.
///
/// Implementations must only touch state through `accounts`; anything else
/// would escape the transaction and could run more than once on conflict.
pub trait TransferExecutor: Send + Sync {
    /// Moves `amount` from `from` to `to`, or aborts with
    /// [`LedgerError::TransferFailed`](crate::error::LedgerError::TransferFailed).
    fn transfer(
        &self,
        accounts: &NativeAccounts<'_>,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> TxResult<()>;
}

/// The built-in executor backed by the `native_accounts` tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransfer;

impl TransferExecutor for SystemTransfer {
    fn transfer(
        &self,
        accounts: &NativeAccounts<'_>,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> TxResult<()> {
        if from == to {
            return abort(TransferError::SelfTransfer(*from));
        }

        let available = accounts.balance(from)?;
        if available < amount {
            return abort(TransferError::InsufficientFunds {
                account: *from,
                available,
                requested: amount,
            });
        }

        let receiving = accounts.balance(to)?;
        let Some(credited) = receiving.checked_add(amount) else {
            return abort(TransferError::Overflow { account: *to });
        };

        accounts.set_balance(from, available - amount)?;
        accounts.set_balance(to, credited)?;
        Ok(())
    }
}
