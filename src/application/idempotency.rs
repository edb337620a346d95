use crate::domain::operation::OperationOutcome;
use crate::domain::ports::{LedgerStore, UnitOfWork};
use crate::domain::transaction::{IdempotencyKey, TransactionId, TransactionStatus};
use crate::error::{LedgerError, Result};
use tracing::debug;

/// What the guard found for an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prior {
    /// A completed transaction already carries the key.
    AlreadyProcessed(TransactionId),
    /// No completed transaction carries the key; the operation must run.
    NotFound,
}

/// Deduplicates operations by idempotency key.
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    /// Looks the key up inside the caller's unit of work.
    ///
    /// Only a `Completed` transaction short-circuits. A `Pending` row belongs to an attempt
    /// that has not finished, and a `Failed` one left no postings, so both fall through to
    /// `NotFound`; the store's unique constraint then decides between concurrent attempts.
    pub async fn check(uow: &mut dyn UnitOfWork, key: &IdempotencyKey) -> Result<Prior> {
        let prior = match uow.find_transaction(key).await? {
            Some(tx) if tx.status == TransactionStatus::Completed => Prior::AlreadyProcessed(tx.id),
            Some(tx) => {
                debug!(key = %key, status = %tx.status, "prior attempt is not completed");
                Prior::NotFound
            }
            None => Prior::NotFound,
        };
        Ok(prior)
    }

    /// Interprets a unique-constraint rejection of `key`.
    ///
    /// Re-reads committed state outside the failed unit: if the winning attempt has
    /// completed, the caller is answered with its transaction. Otherwise the winner is
    /// still in flight and the caller gets a retryable [`LedgerError::OperationInFlight`].
    pub async fn resolve_conflict(
        store: &dyn LedgerStore,
        key: &IdempotencyKey,
    ) -> Result<OperationOutcome> {
        match store.transaction_by_key(key).await? {
            Some(tx) if tx.is_completed() => Ok(OperationOutcome::AlreadyProcessed {
                transaction_id: tx.id,
            }),
            _ => Err(LedgerError::OperationInFlight(key.to_string())),
        }
    }
}
