use crate::domain::money::Balance;
use crate::domain::ports::{LedgerStore, UnitOfWork};
use crate::domain::transaction::{
    IdempotencyKey, LedgerEntry, Transaction, TransactionId, TransactionStatus,
};
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, Options,
    TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;
use uuid::Uuid;

/// Column Family for wallet rows, keyed by big-endian wallet id.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for transactions, keyed by transaction uuid.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping idempotency keys to transaction uuids.
pub const CF_IDEMPOTENCY: &str = "idempotency";
/// Column Family for entries keyed by wallet id followed by entry uuid.
pub const CF_WALLET_ENTRIES: &str = "wallet_entries";
/// Column Family for entries keyed by transaction uuid followed by entry uuid.
pub const CF_TRANSACTION_ENTRIES: &str = "transaction_entries";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_WALLETS,
    CF_TRANSACTIONS,
    CF_IDEMPOTENCY,
    CF_WALLET_ENTRIES,
    CF_TRANSACTION_ENTRIES,
];

/// A persistent ledger store backed by a RocksDB `TransactionDB`.
///
/// Units of work are pessimistic RocksDB transactions: `get_for_update` on a wallet row is
/// the exclusive row lock, and the same call on the idempotency key enforces uniqueness
/// against concurrent attempts. Lock waits are bounded by the configured timeout and
/// RocksDB deadlock detection is enabled on every transaction.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<TransactionDB>`).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<TransactionDB>,
    lock_timeout_ms: i64,
}

impl RocksDbLedgerStore {
    /// Opens or creates a ledger database at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    /// * `lock_timeout` - Longest wait for a single row lock.
    pub fn open<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let lock_timeout_ms = i64::try_from(lock_timeout.as_millis()).unwrap_or(i64::MAX);
        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(lock_timeout_ms);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db: TransactionDB =
            TransactionDB::open_cf_descriptors(&opts, &txn_db_opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            lock_timeout_ms,
        })
    }
}

fn column<'db>(db: &'db TransactionDB, name: &str) -> StoreResult<&'db ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| {
        StoreError::Backend(format!("{} column family not found", name).into())
    })
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_uuid(bytes: &[u8]) -> StoreResult<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| StoreError::Backend(Box::new(e)))
}

fn wallet_key(id: WalletId) -> [u8; 8] {
    id.0.to_be_bytes()
}

fn composite_key(prefix: &[u8], suffix: &Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 16);
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix.as_bytes());
    key
}

fn is_lock_conflict(err: &rocksdb::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::Busy)
}

/// Sums entry amounts of all `(key, value)` pairs whose key starts with the wallet's prefix.
fn sum_prefixed<I>(iter: I, wallet: WalletId) -> StoreResult<Balance>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let prefix = wallet_key(wallet);
    let mut amounts = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(&prefix) {
            break;
        }
        let entry: LedgerEntry = decode(&value)?;
        amounts.push(entry.amount);
    }
    Balance::from_amounts(amounts).ok_or(StoreError::BalanceOverflow(wallet))
}

/// Runs a RocksDB call that may wait on a row lock or disk.
///
/// On a multi-threaded runtime the worker hands its other tasks to a fresh thread first,
/// so a contended wallet never stalls operations on unrelated wallets.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn collect_prefixed<I>(iter: I, prefix: &[u8]) -> StoreResult<Vec<LedgerEntry>>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut entries = Vec::new();
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        entries.push(decode(&value)?);
    }
    Ok(entries)
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn UnitOfWork + 'a>> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        txn_opts.set_deadlock_detect(true);
        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);
        Ok(Box::new(RocksDbUnitOfWork {
            db: self.db.as_ref(),
            txn: Some(txn),
        }))
    }

    async fn register_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        let cf = column(&self.db, CF_WALLETS)?;
        let key = wallet_key(wallet.id);
        let value = encode(&wallet)?;
        blocking(|| -> StoreResult<()> {
            let txn = self.db.transaction();
            if txn.get_for_update_cf(cf, key, true)?.is_some() {
                return Err(StoreError::WalletExists(wallet.id));
            }
            txn.put_cf(cf, key, value)?;
            txn.commit()?;
            Ok(())
        })
    }

    async fn wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        let cf = column(&self.db, CF_WALLETS)?;
        match self.db.get_cf(cf, wallet_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn wallets(&self) -> StoreResult<Vec<Wallet>> {
        let cf = column(&self.db, CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            wallets.push(decode(&value)?);
        }
        Ok(wallets)
    }

    async fn balance(&self, wallet: WalletId) -> StoreResult<Balance> {
        let wallets = column(&self.db, CF_WALLETS)?;
        if self.db.get_cf(wallets, wallet_key(wallet))?.is_none() {
            return Err(StoreError::WalletNotFound(wallet));
        }
        let cf = column(&self.db, CF_WALLET_ENTRIES)?;
        let prefix = wallet_key(wallet);
        blocking(|| {
            let iter = self
                .db
                .iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));
            sum_prefixed(iter, wallet)
        })
    }

    async fn transaction_by_key(&self, key: &IdempotencyKey) -> StoreResult<Option<Transaction>> {
        let idempotency = column(&self.db, CF_IDEMPOTENCY)?;
        let Some(id) = self.db.get_cf(idempotency, key.as_str().as_bytes())? else {
            return Ok(None);
        };
        let transactions = column(&self.db, CF_TRANSACTIONS)?;
        match self.db.get_cf(transactions, &id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn transaction_entries(&self, id: TransactionId) -> StoreResult<Vec<LedgerEntry>> {
        let cf = column(&self.db, CF_TRANSACTION_ENTRIES)?;
        let prefix = id.0.as_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));
        collect_prefixed(iter, prefix)
    }
}

/// Unit of work wrapping one pessimistic RocksDB transaction.
///
/// Dropping it without commit discards the transaction and releases its locks.
pub struct RocksDbUnitOfWork<'a> {
    db: &'a TransactionDB,
    txn: Option<rocksdb::Transaction<'a, TransactionDB>>,
}

impl<'a> RocksDbUnitOfWork<'a> {
    fn txn(&self) -> StoreResult<&rocksdb::Transaction<'a, TransactionDB>> {
        self.txn.as_ref().ok_or(StoreError::Finished)
    }

    fn load_transaction(&self, id: &Uuid) -> StoreResult<Option<Transaction>> {
        let cf = column(self.db, CF_TRANSACTIONS)?;
        match self.txn()?.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<'a> UnitOfWork for RocksDbUnitOfWork<'a> {
    async fn find_transaction(&mut self, key: &IdempotencyKey) -> StoreResult<Option<Transaction>> {
        let cf = column(self.db, CF_IDEMPOTENCY)?;
        match self.txn()?.get_cf(cf, key.as_str().as_bytes())? {
            Some(id) => self.load_transaction(&decode_uuid(&id)?),
            None => Ok(None),
        }
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        let idempotency = column(self.db, CF_IDEMPOTENCY)?;
        let transactions = column(self.db, CF_TRANSACTIONS)?;
        let txn = self.txn()?;
        let key = tx.idempotency_key.as_str().as_bytes();

        // Waits for a concurrent holder of the key to finish, then sees its committed row.
        match blocking(|| txn.get_for_update_cf(idempotency, key, true)) {
            Ok(Some(_)) => {
                return Err(StoreError::DuplicateKey(tx.idempotency_key.to_string()));
            }
            Ok(None) => {}
            Err(err) if is_lock_conflict(&err) => {
                debug!(key = %tx.idempotency_key, error = %err, "idempotency key held by another unit");
                return Err(StoreError::DuplicateKey(tx.idempotency_key.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        txn.put_cf(idempotency, key, tx.id.0.as_bytes())?;
        txn.put_cf(transactions, tx.id.0.as_bytes(), encode(tx)?)?;
        Ok(())
    }

    async fn update_status(&mut self, id: TransactionId, status: TransactionStatus) -> StoreResult<()> {
        let cf = column(self.db, CF_TRANSACTIONS)?;
        let txn = self.txn()?;
        let bytes = txn
            .get_for_update_cf(cf, id.0.as_bytes(), true)?
            .ok_or_else(|| StoreError::Backend(format!("transaction {} not found", id).into()))?;
        let mut tx: Transaction = decode(&bytes)?;
        if !tx.status.can_transition_to(status) {
            return Err(StoreError::Backend(
                format!("transaction {} cannot move from {} to {}", id, tx.status, status).into(),
            ));
        }
        tx.status = status;
        txn.put_cf(cf, id.0.as_bytes(), encode(&tx)?)?;
        Ok(())
    }

    async fn lock_wallet(&mut self, id: WalletId) -> StoreResult<()> {
        let cf = column(self.db, CF_WALLETS)?;
        let txn = self.txn()?;
        match blocking(|| txn.get_for_update_cf(cf, wallet_key(id), true)) {
            Ok(Some(_)) => {
                debug!(wallet = %id, "wallet lock acquired");
                Ok(())
            }
            Ok(None) => Err(StoreError::WalletNotFound(id)),
            Err(err) => match err.kind() {
                ErrorKind::TimedOut => Err(StoreError::LockTimeout(id)),
                ErrorKind::Busy => Err(StoreError::Deadlock(id)),
                _ => Err(err.into()),
            },
        }
    }

    async fn balance(&mut self, wallet: WalletId) -> StoreResult<Balance> {
        let cf = column(self.db, CF_WALLET_ENTRIES)?;
        let prefix = wallet_key(wallet);
        let txn = self.txn()?;
        blocking(|| {
            let iter = txn.iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));
            sum_prefixed(iter, wallet)
        })
    }

    async fn append_entry(&mut self, entry: LedgerEntry) -> StoreResult<()> {
        if self.load_transaction(&entry.transaction_id.0)?.is_none() {
            return Err(StoreError::Backend(
                format!("transaction {} not found", entry.transaction_id).into(),
            ));
        }
        let by_wallet = column(self.db, CF_WALLET_ENTRIES)?;
        let by_transaction = column(self.db, CF_TRANSACTION_ENTRIES)?;
        let value = encode(&entry)?;
        let txn = self.txn()?;
        txn.put_cf(
            by_wallet,
            composite_key(&wallet_key(entry.wallet_id), &entry.id.0),
            &value,
        )?;
        txn.put_cf(
            by_transaction,
            composite_key(entry.transaction_id.0.as_bytes(), &entry.id.0),
            &value,
        )?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        let txn = this.txn.take().ok_or(StoreError::Finished)?;
        blocking(|| txn.commit())?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        let txn = this.txn.take().ok_or(StoreError::Finished)?;
        txn.rollback()?;
        Ok(())
    }
}
