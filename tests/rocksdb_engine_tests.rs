#![cfg(feature = "storage-rocksdb")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use wallet_ledger::application::engine::LedgerEngine;
use wallet_ledger::application::locking::WalletLockManager;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::money::Balance;
use wallet_ledger::domain::operation::OperationOutcome;
use wallet_ledger::domain::ports::LedgerStore;
use wallet_ledger::domain::transaction::{IdempotencyKey, Transaction};
use wallet_ledger::domain::wallet::{Wallet, WalletId};
use wallet_ledger::error::{LedgerError, StoreError};
use wallet_ledger::infrastructure::rocksdb::RocksDbLedgerStore;

mod common;

const USER: WalletId = WalletId(1);

async fn rocksdb_engine(
    path: &Path,
    lock_timeout: Duration,
    users: &[i64],
) -> (LedgerEngine, RocksDbLedgerStore) {
    let store = RocksDbLedgerStore::open(path, lock_timeout).unwrap();
    let engine = LedgerEngine::new(Box::new(store.clone()), &LedgerConfig::default());
    engine.ensure_system_wallets(1).await.unwrap();
    for id in users {
        engine
            .register_wallet(Wallet::user(WalletId(*id), *id * 100, 1))
            .await
            .unwrap();
    }
    (engine, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rocksdb_concurrent_duplicates_apply_once() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = rocksdb_engine(dir.path(), Duration::from_secs(5), &[1]).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.top_up(USER, 10, "same-request").await
        }));
    }

    let mut completed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(OperationOutcome::Completed { transaction_id }) => completed.push(transaction_id),
            Ok(OperationOutcome::AlreadyProcessed { .. }) => {}
            Err(LedgerError::OperationInFlight(key)) => assert_eq!(key, "same-request"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(completed.len(), 1, "exactly one attempt must complete");
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(10));
    let entries = engine.transaction_entries(completed[0]).await.unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rocksdb_concurrent_spend_and_top_up_on_one_wallet() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = rocksdb_engine(dir.path(), Duration::from_secs(5), &[1]).await;
    let engine = Arc::new(engine);
    engine.top_up(USER, 1_000, "seed").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                engine.spend(USER, 10, &format!("spend-{i}")).await
            } else {
                engine.top_up(USER, 10, &format!("top-up-{i}")).await
            }
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_completed());
    }

    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(1_000));
    assert_eq!(
        engine.get_balance(common::TREASURY).await.unwrap(),
        Balance(-1_000)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rocksdb_opposite_lock_requests_do_not_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, store) = rocksdb_engine(dir.path(), Duration::from_secs(5), &[1, 2]).await;

    let mut handles = Vec::new();
    for round in 0..20 {
        let store = store.clone();
        let wallets = if round % 2 == 0 {
            [WalletId(1), WalletId(2)]
        } else {
            [WalletId(2), WalletId(1)]
        };
        handles.push(tokio::spawn(async move {
            let mut uow = store.begin().await?;
            let locked = WalletLockManager::acquire(uow.as_mut(), &wallets).await?;
            uow.rollback().await?;
            Ok::<_, LedgerError>(locked)
        }));
    }

    for handle in handles {
        let locked = handle.await.unwrap().unwrap();
        assert_eq!(locked, vec![WalletId(1), WalletId(2)]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rocksdb_lock_cycle_is_reported_as_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, store) = rocksdb_engine(dir.path(), Duration::from_secs(3), &[1, 2]).await;
    let barrier = Arc::new(Barrier::new(2));

    // Units that skip the ordered lock manager can form a cycle.
    let mut handles = Vec::new();
    for (first, second) in [(WalletId(1), WalletId(2)), (WalletId(2), WalletId(1))] {
        let store = store.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let mut uow = store.begin().await?;
            uow.lock_wallet(first).await?;
            barrier.wait().await;
            uow.lock_wallet(second).await?;
            uow.rollback().await
        }));
    }

    let mut deadlocks = 0;
    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(StoreError::Deadlock(_)) => deadlocks += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((deadlocks, succeeded), (1, 1));

    let err: LedgerError = StoreError::Deadlock(WalletId(1)).into();
    assert!(err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rocksdb_key_held_by_in_flight_attempt_is_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = rocksdb_engine(dir.path(), Duration::from_millis(200), &[1]).await;

    let mut other = store.begin().await.unwrap();
    other
        .insert_transaction(&Transaction::pending(
            IdempotencyKey::new("in-flight").unwrap(),
        ))
        .await
        .unwrap();

    let err = engine.top_up(USER, 5, "in-flight").await.unwrap_err();
    assert!(matches!(err, LedgerError::OperationInFlight(_)));
    assert!(err.is_retryable());

    other.rollback().await.unwrap();
    let retry = engine.top_up(USER, 5, "in-flight").await.unwrap();
    assert!(retry.is_completed());
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(5));
}

#[tokio::test]
async fn test_rocksdb_credit_beyond_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = rocksdb_engine(dir.path(), Duration::from_secs(1), &[1]).await;

    assert!(engine.top_up(USER, i64::MAX, "a").await.unwrap().is_completed());
    let err = engine.top_up(USER, 1, "b").await.unwrap_err();
    assert!(matches!(err, LedgerError::BalanceOverflow(USER)));
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(i64::MAX));
}
