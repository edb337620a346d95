use std::sync::Arc;
use std::time::Duration;
use wallet_ledger::domain::money::Balance;
use wallet_ledger::domain::operation::OperationOutcome;
use wallet_ledger::domain::ports::LedgerStore;
use wallet_ledger::domain::transaction::{IdempotencyKey, Transaction};
use wallet_ledger::domain::wallet::WalletId;
use wallet_ledger::error::LedgerError;

mod common;

const USER: WalletId = WalletId(1);

#[tokio::test]
async fn test_sequential_duplicate_yields_one_transaction() {
    let engine =
        common::engine_with_users(common::in_memory_store(Duration::from_secs(1)), &[1]).await;

    let first = engine.top_up(USER, 250, "dup").await.unwrap();
    let second = engine.top_up(USER, 250, "dup").await.unwrap();

    assert!(first.is_completed());
    assert_eq!(
        second,
        OperationOutcome::AlreadyProcessed {
            transaction_id: first.transaction_id()
        }
    );
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(250));
    assert_eq!(
        engine
            .transaction_entries(first.transaction_id())
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_apply_once() {
    let engine = Arc::new(
        common::engine_with_users(common::in_memory_store(Duration::from_secs(5)), &[1]).await,
    );

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

    // Once settled, every retry resolves to the winner.
    let retry = engine.top_up(USER, 10, "same-request").await.unwrap();
    assert_eq!(
        retry,
        OperationOutcome::AlreadyProcessed {
            transaction_id: completed[0]
        }
    );
}

#[tokio::test]
async fn test_key_held_by_in_flight_attempt_is_retryable() {
    let store = common::in_memory_store(Duration::from_secs(1));
    let engine = common::engine_with_users(store.clone(), &[1]).await;

    // Another worker inserted the key but has not committed yet.
    let key = IdempotencyKey::new("in-flight").unwrap();
    let mut other = store.begin().await.unwrap();
    other
        .insert_transaction(&Transaction::pending(key.clone()))
        .await
        .unwrap();

    let err = engine.top_up(USER, 5, "in-flight").await.unwrap_err();
    assert!(matches!(err, LedgerError::OperationInFlight(_)));
    assert!(err.is_retryable());
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(0));

    // The other worker crashes; its unit rolls back and the caller's retry goes through.
    drop(other);
    let retry = engine.top_up(USER, 5, "in-flight").await.unwrap();
    assert!(retry.is_completed());
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(5));
}

#[tokio::test]
async fn test_distinct_keys_are_independent() {
    let engine =
        common::engine_with_users(common::in_memory_store(Duration::from_secs(1)), &[1]).await;
    for i in 0..5 {
        let outcome = engine.top_up(USER, 1, &format!("key-{i}")).await.unwrap();
        assert!(outcome.is_completed());
    }
    assert_eq!(engine.get_balance(USER).await.unwrap(), Balance(5));
}
