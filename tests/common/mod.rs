#![allow(dead_code)]

use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::time::Duration;
use wallet_ledger::application::engine::LedgerEngine;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::wallet::{Wallet, WalletId};
use wallet_ledger::infrastructure::in_memory::InMemoryLedgerStore;

pub const TREASURY: WalletId = WalletId(3);
pub const BONUS: WalletId = WalletId(4);

pub fn in_memory_store(lock_timeout: Duration) -> InMemoryLedgerStore {
    InMemoryLedgerStore::new(lock_timeout)
}

/// Builds an engine over `store` with the default system wallets and one user wallet per id.
pub async fn engine_with_users(store: InMemoryLedgerStore, users: &[i64]) -> LedgerEngine {
    let config = LedgerConfig {
        lock_timeout: Duration::from_secs(5),
        ..LedgerConfig::default()
    };
    let engine = LedgerEngine::new(Box::new(store), &config);
    engine.ensure_system_wallets(1).await.unwrap();
    for id in users {
        engine
            .register_wallet(Wallet::user(WalletId(*id), *id * 100, 1))
            .await
            .unwrap();
    }
    engine
}

pub fn write_operations(path: &Path, rows: &[[&str; 4]]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["op", "wallet", "amount", "key"])?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_wallets(path: &Path, rows: &[[&str; 4]]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["id", "user", "asset", "kind"])?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
