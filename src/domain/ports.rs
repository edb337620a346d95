use super::money::Balance;
use super::transaction::{IdempotencyKey, LedgerEntry, Transaction, TransactionId, TransactionStatus};
use super::wallet::{Wallet, WalletId};
use crate::error::StoreResult;
use async_trait::async_trait;

/// A transactional store: the persistence port of the ledger.
///
/// Implementations must provide exclusive per-wallet locks, a unique constraint on
/// idempotency keys and atomic commit/rollback of everything staged in a
/// [`UnitOfWork`]. Reads on the store itself only see committed state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a new atomic unit of work.
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn UnitOfWork + 'a>>;

    async fn register_wallet(&self, wallet: Wallet) -> StoreResult<()>;
    async fn wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>>;
    async fn wallets(&self) -> StoreResult<Vec<Wallet>>;

    /// Lock-free sum of the committed entries of `wallet`.
    async fn balance(&self, wallet: WalletId) -> StoreResult<Balance>;

    async fn transaction_by_key(&self, key: &IdempotencyKey) -> StoreResult<Option<Transaction>>;
    async fn transaction_entries(&self, id: TransactionId) -> StoreResult<Vec<LedgerEntry>>;
}

/// One atomic unit of work against a [`LedgerStore`].
///
/// Nothing staged here is visible to other units until [`UnitOfWork::commit`].
/// Wallet locks are held until the unit ends; dropping an unfinished unit rolls
/// it back.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_transaction(&mut self, key: &IdempotencyKey) -> StoreResult<Option<Transaction>>;

    /// Stages a new transaction row.
    ///
    /// Fails with `StoreError::DuplicateKey` when another transaction, committed or
    /// still in flight, already holds the idempotency key.
    async fn insert_transaction(&mut self, tx: &Transaction) -> StoreResult<()>;

    async fn update_status(&mut self, id: TransactionId, status: TransactionStatus) -> StoreResult<()>;

    /// Takes the exclusive lock on one wallet row, waiting up to the store's lock timeout.
    async fn lock_wallet(&mut self, id: WalletId) -> StoreResult<()>;

    /// Sum of the wallet's entries as seen by this unit.
    async fn balance(&mut self, wallet: WalletId) -> StoreResult<Balance>;

    async fn append_entry(&mut self, entry: LedgerEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
