//! Domain model of the ledger: wallets, money, transactions, operation templates
//! and the storage port the orchestrator depends on.

pub mod money;
pub mod operation;
pub mod ports;
pub mod transaction;
pub mod wallet;
