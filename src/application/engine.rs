use crate::application::balance::BalanceCalculator;
use crate::application::idempotency::{IdempotencyGuard, Prior};
use crate::application::locking::WalletLockManager;
use crate::config::LedgerConfig;
use crate::domain::money::{Amount, Balance};
use crate::domain::operation::{OperationDefinitions, OperationKind, OperationOutcome, Transfer};
use crate::domain::ports::{LedgerStoreBox, UnitOfWork};
use crate::domain::transaction::{
    IdempotencyKey, LedgerEntry, Transaction, TransactionId, TransactionStatus,
};
use crate::domain::wallet::{Wallet, WalletId, WalletKind};
use crate::error::{LedgerError, Result, StoreError};
use tracing::{debug, info, warn};

/// Progress of one operation through its unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Guarded,
    Locked,
    Validated,
    Posted,
    Committed,
    Failed,
}

impl Stage {
    /// Marks the operation failed and returns the stage it reached.
    fn fail(&mut self) -> Stage {
        std::mem::replace(self, Stage::Failed)
    }
}

/// What a unit of work produced before it was finished.
enum Staged {
    AlreadyProcessed(TransactionId),
    Posted(TransactionId),
}

/// The main entry point of the ledger.
///
/// `LedgerEngine` drives spend, top-up and bonus operations end to end: idempotency check,
/// ordered wallet locking, funds validation and the balanced two-entry posting all happen
/// inside one unit of work of the underlying store, which either commits as a whole or
/// leaves no trace. The engine is `Send + Sync`; share it behind an `Arc` to run
/// operations concurrently.
pub struct LedgerEngine {
    store: LedgerStoreBox,
    operations: OperationDefinitions,
}

impl LedgerEngine {
    /// Creates a new `LedgerEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - The transactional store holding wallets, transactions and entries.
    /// * `config` - Provides the system wallets the operation templates are bound to.
    pub fn new(store: LedgerStoreBox, config: &LedgerConfig) -> Self {
        Self {
            store,
            operations: OperationDefinitions::new(config.system_wallets),
        }
    }

    /// Moves `amount` from the user wallet to the treasury. Fails with
    /// [`LedgerError::InsufficientFunds`] when the user balance does not cover it.
    pub async fn spend(&self, user_wallet: WalletId, amount: i64, key: &str) -> Result<OperationOutcome> {
        self.execute(OperationKind::Spend, user_wallet, amount, key).await
    }

    /// Moves `amount` from the treasury to the user wallet.
    pub async fn top_up(&self, user_wallet: WalletId, amount: i64, key: &str) -> Result<OperationOutcome> {
        self.execute(OperationKind::TopUp, user_wallet, amount, key).await
    }

    /// Moves `amount` from the bonus pool to the user wallet.
    pub async fn grant_bonus(
        &self,
        user_wallet: WalletId,
        amount: i64,
        key: &str,
    ) -> Result<OperationOutcome> {
        self.execute(OperationKind::Bonus, user_wallet, amount, key).await
    }

    /// Runs one operation at most once per idempotency key.
    ///
    /// Amount, key and wallet pairing are validated before the store is touched. Every
    /// failure after that rolls the unit of work back entirely; nothing is retried here.
    pub async fn execute(
        &self,
        kind: OperationKind,
        user_wallet: WalletId,
        amount: i64,
        key: &str,
    ) -> Result<OperationOutcome> {
        let amount = Amount::new(amount)?;
        let key = IdempotencyKey::new(key)?;
        let transfer = self.operations.transfer(kind, user_wallet, amount)?;

        let mut stage = Stage::Start;
        let mut uow = self.store.begin().await?;
        let staged = self.stage(uow.as_mut(), &transfer, &key, &mut stage).await;

        match staged {
            Ok(Staged::AlreadyProcessed(transaction_id)) => {
                uow.rollback().await?;
                debug!(key = %key, %transaction_id, "operation already processed");
                Ok(OperationOutcome::AlreadyProcessed { transaction_id })
            }
            Ok(Staged::Posted(transaction_id)) => match uow.commit().await {
                Ok(()) => {
                    stage = Stage::Committed;
                    info!(
                        %kind,
                        key = %key,
                        %transaction_id,
                        debit = %transfer.debit,
                        credit = %transfer.credit,
                        amount = %transfer.amount,
                        ?stage,
                        "operation completed"
                    );
                    Ok(OperationOutcome::Completed { transaction_id })
                }
                Err(StoreError::DuplicateKey(_)) => {
                    IdempotencyGuard::resolve_conflict(self.store.as_ref(), &key).await
                }
                Err(err) => {
                    let failed_at = stage.fail();
                    warn!(%kind, key = %key, ?failed_at, ?stage, error = %err, "commit failed");
                    Err(err.into())
                }
            },
            Err(LedgerError::Storage(StoreError::DuplicateKey(_))) => {
                let failed_at = stage.fail();
                Self::abort(uow, &key, failed_at).await;
                debug!(key = %key, "idempotency key taken by a concurrent attempt");
                IdempotencyGuard::resolve_conflict(self.store.as_ref(), &key).await
            }
            Err(err) => {
                let failed_at = stage.fail();
                warn!(
                    %kind,
                    key = %key,
                    ?failed_at,
                    ?stage,
                    error = %err,
                    "operation failed, rolling back"
                );
                Self::abort(uow, &key, failed_at).await;
                Err(err)
            }
        }
    }

    async fn stage(
        &self,
        uow: &mut dyn UnitOfWork,
        transfer: &Transfer,
        key: &IdempotencyKey,
        stage: &mut Stage,
    ) -> Result<Staged> {
        if let Prior::AlreadyProcessed(id) = IdempotencyGuard::check(uow, key).await? {
            return Ok(Staged::AlreadyProcessed(id));
        }
        *stage = Stage::Guarded;

        let mut tx = Transaction::pending(key.clone());
        uow.insert_transaction(&tx).await?;
        WalletLockManager::acquire(uow, &transfer.wallets()).await?;
        *stage = Stage::Locked;

        let legs = transfer.legs();
        for (wallet, delta) in legs {
            let balance = BalanceCalculator::balance_of(uow, wallet).await?;
            if transfer.requires_funds && wallet == transfer.debit && !balance.covers(transfer.amount)
            {
                return Err(LedgerError::InsufficientFunds {
                    wallet,
                    balance: balance.value(),
                    requested: transfer.amount.value(),
                });
            }
            if balance.checked_add(delta).is_none() {
                return Err(LedgerError::BalanceOverflow(wallet));
            }
        }
        *stage = Stage::Validated;

        debug_assert_eq!(legs.iter().map(|(_, amount)| amount).sum::<i64>(), 0);
        for (wallet, amount) in legs {
            uow.append_entry(LedgerEntry::new(tx.id, wallet, amount))
                .await?;
        }
        *stage = Stage::Posted;

        tx.transition(TransactionStatus::Completed)?;
        uow.update_status(tx.id, tx.status).await?;
        Ok(Staged::Posted(tx.id))
    }

    async fn abort(uow: Box<dyn UnitOfWork + '_>, key: &IdempotencyKey, stage: Stage) {
        if let Err(err) = uow.rollback().await {
            warn!(key = %key, ?stage, error = %err, "rollback failed");
        }
    }

    /// Returns the committed balance of a wallet without taking any lock.
    ///
    /// The value is advisory: it may already be outdated when the caller reads it.
    pub async fn get_balance(&self, wallet: WalletId) -> Result<Balance> {
        BalanceCalculator::committed(self.store.as_ref(), wallet).await
    }

    pub async fn transaction_by_key(&self, key: &str) -> Result<Option<Transaction>> {
        let key = IdempotencyKey::new(key)?;
        Ok(self.store.transaction_by_key(&key).await?)
    }

    pub async fn transaction_entries(&self, id: TransactionId) -> Result<Vec<LedgerEntry>> {
        Ok(self.store.transaction_entries(id).await?)
    }

    pub async fn register_wallet(&self, wallet: Wallet) -> Result<()> {
        Ok(self.store.register_wallet(wallet).await?)
    }

    /// Registers the configured treasury and bonus pool wallets if they are missing.
    ///
    /// Fails with [`LedgerError::Config`] when a configured id already belongs to a wallet
    /// of another kind.
    pub async fn ensure_system_wallets(&self, asset_type_id: i64) -> Result<()> {
        let system = self.operations.system_wallets();
        for (id, kind) in [
            (system.treasury, WalletKind::Treasury),
            (system.bonus_pool, WalletKind::Bonus),
        ] {
            match self.store.wallet(id).await? {
                None => {
                    info!(wallet = %id, %kind, "registering system wallet");
                    self.register_wallet(Wallet::system(id, kind, asset_type_id))
                        .await?;
                }
                Some(existing) if existing.kind != kind => {
                    return Err(LedgerError::Config(format!(
                        "wallet {} is configured as the {} wallet but registered as {}",
                        id, kind, existing.kind
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Returns every registered wallet, ordered by wallet id.
    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets = self.store.wallets().await?;
        wallets.sort_by_key(|wallet| wallet.id);
        Ok(wallets)
    }

    /// Returns every wallet with its committed balance, ordered by wallet id.
    pub async fn balances(&self) -> Result<Vec<(Wallet, Balance)>> {
        let wallets = self.wallets().await?;
        let mut balances = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            let balance = self.get_balance(wallet.id).await?;
            balances.push((wallet, balance));
        }
        Ok(balances)
    }
}
