use crate::domain::ports::UnitOfWork;
use crate::domain::wallet::WalletId;
use crate::error::Result;
use std::collections::BTreeSet;

/// Acquires wallet locks in one global order.
///
/// Every caller locks in ascending `WalletId` order regardless of which wallet is debited,
/// so two units of work can never wait on each other in a cycle. Locks belong to the unit
/// of work and are released when it commits or rolls back.
pub struct WalletLockManager;

impl WalletLockManager {
    /// Locks all `wallets` and returns them in the order they were locked.
    pub async fn acquire(uow: &mut dyn UnitOfWork, wallets: &[WalletId]) -> Result<Vec<WalletId>> {
        let ordered = Self::lock_order(wallets);
        for id in &ordered {
            uow.lock_wallet(*id).await?;
        }
        Ok(ordered)
    }

    pub fn lock_order(wallets: &[WalletId]) -> Vec<WalletId> {
        wallets
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
