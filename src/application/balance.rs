use crate::domain::money::Balance;
use crate::domain::ports::{LedgerStore, UnitOfWork};
use crate::domain::wallet::WalletId;
use crate::error::Result;

/// Derives wallet balances from ledger entries.
pub struct BalanceCalculator;

impl BalanceCalculator {
    /// Balance as seen by `uow`. Call only while the wallet lock is held so the result
    /// cannot go stale before the dependent write.
    pub async fn balance_of(uow: &mut dyn UnitOfWork, wallet: WalletId) -> Result<Balance> {
        Ok(uow.balance(wallet).await?)
    }

    /// Lock-free balance of committed entries. Advisory only; not for write paths.
    pub async fn committed(store: &dyn LedgerStore, wallet: WalletId) -> Result<Balance> {
        Ok(store.balance(wallet).await?)
    }
}
