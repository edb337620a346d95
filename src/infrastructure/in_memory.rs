use crate::domain::money::Balance;
use crate::domain::ports::{LedgerStore, UnitOfWork};
use crate::domain::transaction::{
    IdempotencyKey, LedgerEntry, Transaction, TransactionId, TransactionStatus,
};
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

struct WalletRow {
    wallet: Wallet,
    lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct State {
    wallets: BTreeMap<WalletId, WalletRow>,
    transactions: HashMap<TransactionId, Transaction>,
    keys: HashMap<IdempotencyKey, TransactionId>,
    /// Keys inserted by units of work that have not finished yet.
    claimed: HashSet<IdempotencyKey>,
    entries: HashMap<TransactionId, Vec<LedgerEntry>>,
    /// Running sum of each wallet's committed entries.
    totals: HashMap<WalletId, Balance>,
}

impl State {
    fn total(&self, wallet: WalletId) -> Balance {
        self.totals.get(&wallet).copied().unwrap_or_default()
    }

    fn release_claims(&mut self, keys: &[IdempotencyKey]) {
        for key in keys {
            self.claimed.remove(key);
        }
    }
}

struct Shared {
    state: Mutex<State>,
    lock_timeout: Duration,
}

impl Shared {
    // No critical section awaits or leaves the state half-written.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A thread-safe in-memory ledger store.
///
/// Wallet rows carry a `tokio::sync::Mutex` acting as the exclusive row lock, idempotency
/// keys of in-flight units are claimed up front to enforce uniqueness, and every write of a
/// unit of work is staged locally and applied in one step on commit.
/// Ideal for testing or deployments where persistence is not required.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory store.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                lock_timeout,
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn UnitOfWork + 'a>> {
        Ok(Box::new(InMemoryUnitOfWork::new(self.shared.clone())))
    }

    async fn register_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        let mut state = self.shared.state();
        if state.wallets.contains_key(&wallet.id) {
            return Err(StoreError::WalletExists(wallet.id));
        }
        state.wallets.insert(
            wallet.id,
            WalletRow {
                wallet,
                lock: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        Ok(())
    }

    async fn wallet(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        let state = self.shared.state();
        Ok(state.wallets.get(&id).map(|row| row.wallet.clone()))
    }

    async fn wallets(&self) -> StoreResult<Vec<Wallet>> {
        let state = self.shared.state();
        Ok(state.wallets.values().map(|row| row.wallet.clone()).collect())
    }

    async fn balance(&self, wallet: WalletId) -> StoreResult<Balance> {
        let state = self.shared.state();
        if !state.wallets.contains_key(&wallet) {
            return Err(StoreError::WalletNotFound(wallet));
        }
        Ok(state.total(wallet))
    }

    async fn transaction_by_key(&self, key: &IdempotencyKey) -> StoreResult<Option<Transaction>> {
        let state = self.shared.state();
        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn transaction_entries(&self, id: TransactionId) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.shared.state();
        Ok(state.entries.get(&id).cloned().unwrap_or_default())
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
///
/// Held wallet guards are released when the unit is dropped, after commit or rollback.
pub struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    transactions: Vec<Transaction>,
    entries: Vec<LedgerEntry>,
    claimed: Vec<IdempotencyKey>,
    held: Vec<(WalletId, OwnedMutexGuard<()>)>,
    finished: bool,
}

impl InMemoryUnitOfWork {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            transactions: Vec::new(),
            entries: Vec::new(),
            claimed: Vec::new(),
            held: Vec::new(),
            finished: false,
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.finished {
            Err(StoreError::Finished)
        } else {
            Ok(())
        }
    }

    fn staged_mut(&mut self, id: TransactionId) -> StoreResult<&mut Transaction> {
        self.transactions
            .iter_mut()
            .find(|tx| tx.id == id)
            .ok_or_else(|| {
                StoreError::Backend(format!("transaction {} is not part of this unit", id).into())
            })
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn find_transaction(&mut self, key: &IdempotencyKey) -> StoreResult<Option<Transaction>> {
        self.ensure_open()?;
        if let Some(tx) = self.transactions.iter().find(|tx| &tx.idempotency_key == key) {
            return Ok(Some(tx.clone()));
        }
        let state = self.shared.state();
        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.shared.state();
            if state.keys.contains_key(&tx.idempotency_key)
                || !state.claimed.insert(tx.idempotency_key.clone())
            {
                return Err(StoreError::DuplicateKey(tx.idempotency_key.to_string()));
            }
        }
        self.claimed.push(tx.idempotency_key.clone());
        self.transactions.push(tx.clone());
        Ok(())
    }

    async fn update_status(&mut self, id: TransactionId, status: TransactionStatus) -> StoreResult<()> {
        self.ensure_open()?;
        let tx = self.staged_mut(id)?;
        if !tx.status.can_transition_to(status) {
            return Err(StoreError::Backend(
                format!("transaction {} cannot move from {} to {}", id, tx.status, status).into(),
            ));
        }
        tx.status = status;
        Ok(())
    }

    async fn lock_wallet(&mut self, id: WalletId) -> StoreResult<()> {
        self.ensure_open()?;
        if self.held.iter().any(|(held, _)| *held == id) {
            return Ok(());
        }
        let lock = {
            let state = self.shared.state();
            state
                .wallets
                .get(&id)
                .map(|row| row.lock.clone())
                .ok_or(StoreError::WalletNotFound(id))?
        };
        let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(id))?;
        debug!(wallet = %id, "wallet lock acquired");
        self.held.push((id, guard));
        Ok(())
    }

    async fn balance(&mut self, wallet: WalletId) -> StoreResult<Balance> {
        self.ensure_open()?;
        let committed = self.shared.state().total(wallet);
        let staged = self
            .entries
            .iter()
            .filter(|entry| entry.wallet_id == wallet)
            .map(|entry| entry.amount);
        Balance::from_amounts(std::iter::once(committed.value()).chain(staged))
            .ok_or(StoreError::BalanceOverflow(wallet))
    }

    async fn append_entry(&mut self, entry: LedgerEntry) -> StoreResult<()> {
        self.ensure_open()?;
        self.staged_mut(entry.transaction_id)?;
        self.entries.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        this.ensure_open()?;
        let mut deltas: HashMap<WalletId, Vec<i64>> = HashMap::new();
        for entry in &this.entries {
            deltas.entry(entry.wallet_id).or_default().push(entry.amount);
        }

        let shared = this.shared.clone();
        {
            let mut state = shared.state();
            // Nothing is applied unless every new total fits; on error the dropped unit
            // releases its claims.
            let mut totals = Vec::with_capacity(deltas.len());
            for (wallet, amounts) in deltas {
                let current = state.total(wallet).value();
                let next = Balance::from_amounts(std::iter::once(current).chain(amounts))
                    .ok_or(StoreError::BalanceOverflow(wallet))?;
                totals.push((wallet, next));
            }

            let claimed = std::mem::take(&mut this.claimed);
            state.release_claims(&claimed);
            for tx in this.transactions.drain(..) {
                state.keys.insert(tx.idempotency_key.clone(), tx.id);
                state.transactions.insert(tx.id, tx);
            }
            for entry in this.entries.drain(..) {
                state
                    .entries
                    .entry(entry.transaction_id)
                    .or_default()
                    .push(entry);
            }
            state.totals.extend(totals);
        }
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        this.ensure_open()?;
        let claimed = std::mem::take(&mut this.claimed);
        this.shared.state().release_claims(&claimed);
        this.transactions.clear();
        this.entries.clear();
        this.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished && !self.claimed.is_empty() {
            let claimed = std::mem::take(&mut self.claimed);
            self.shared.state().release_claims(&claimed);
        }
    }
}
