use crate::domain::transaction::TransactionStatus;
use crate::domain::wallet::WalletId;
use thiserror::Error;

/// Errors reported by a storage backend.
///
/// The orchestrator translates these into [`LedgerError`] variants so callers never
/// see a raw backend failure for conditions the ledger knows how to interpret.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Idempotency key already used: {0}")]
    DuplicateKey(String),
    #[error("Wallet {0} not found")]
    WalletNotFound(WalletId),
    #[error("Wallet {0} already exists")]
    WalletExists(WalletId),
    #[error("Timed out waiting for lock on wallet {0}")]
    LockTimeout(WalletId),
    #[error("Deadlock detected while locking wallet {0}")]
    Deadlock(WalletId),
    #[error("Balance of wallet {0} is out of range")]
    BalanceOverflow(WalletId),
    #[error("Unit of work already finished")]
    Finished,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("Invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),
    #[error("Wallet {0} cannot transfer to itself")]
    SelfTransfer(WalletId),
    #[error("Insufficient funds in wallet {wallet}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        wallet: WalletId,
        balance: i64,
        requested: i64,
    },
    #[error("Wallet {0} not found")]
    WalletNotFound(WalletId),
    #[error("Posting would move the balance of wallet {0} out of range")]
    BalanceOverflow(WalletId),
    #[error("Timed out waiting for lock on wallet {0}")]
    LockTimeout(WalletId),
    #[error("Deadlock detected while locking wallet {0}")]
    Deadlock(WalletId),
    #[error("Operation with idempotency key {0} is still in flight")]
    OperationInFlight(String),
    #[error("Invalid transaction status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(StoreError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Whether resubmitting the same request (same idempotency key) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout(_) | LedgerError::Deadlock(_) | LedgerError::OperationInFlight(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WalletNotFound(id) => LedgerError::WalletNotFound(id),
            StoreError::LockTimeout(id) => LedgerError::LockTimeout(id),
            StoreError::Deadlock(id) => LedgerError::Deadlock(id),
            StoreError::BalanceOverflow(id) => LedgerError::BalanceOverflow(id),
            other => LedgerError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
