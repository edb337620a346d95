//! Application layer containing the transaction orchestration.
//!
//! `LedgerEngine` composes the idempotency guard, the wallet lock manager and the balance
//! calculator inside one unit of work of the storage port for every operation.

pub mod balance;
pub mod engine;
pub mod idempotency;
pub mod locking;
