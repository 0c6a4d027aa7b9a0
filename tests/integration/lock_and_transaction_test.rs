// tests/integration/lock_and_transaction_test.rs

//! Distributed Lock + Distributed Transaction working together: lock
//! mutual exclusion under concurrent callers, and the transaction's
//! two-phase commit/rollback over both stores.

use super::test_helpers::Harness;
use mongodb::bson::doc;
use playhub_core::transaction::CacheOp;
use std::time::Duration;

#[tokio::test]
async fn only_one_concurrent_acquirer_wins_the_same_key() {
    let h = Harness::new();
    let attempts = 8usize;
    let mut handles = Vec::new();
    for _ in 0..attempts {
        let lock = h.lock.clone();
        handles.push(tokio::spawn(async move {
            lock.try_acquire("room:42", Duration::from_secs(5)).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn transaction_commits_document_write_and_cache_op_together() {
    let h = Harness::new();
    let handle = h
        .transactions
        .begin(&["match:1".to_string()])
        .await
        .unwrap();

    let document = handle.document().await.unwrap();
    document
        .upsert("matches", doc! {"_id": "match:1"}, doc! {"status": "finished"})
        .await
        .unwrap();
    handle
        .register_cache_op(CacheOp::Set {
            key: "match:1".to_string(),
            value: b"finished".to_vec(),
            ttl: None,
        })
        .await
        .unwrap();
    handle.commit().await.unwrap();

    let cached = h.cache_store.get("match:1").await.unwrap();
    assert_eq!(cached, Some(b"finished".to_vec()));
    let stored = h.documents.find_one("matches", doc! {"_id": "match:1"}).await.unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn transaction_rollback_on_document_commit_failure_restores_prior_cache_value() {
    let h = Harness::new();
    h.cache_store.set("match:2", b"in-progress".to_vec(), None).await.unwrap();
    h.doc_backend.fail_next_commit();

    let handle = h.transactions.begin(&["match:2".to_string()]).await.unwrap();
    handle
        .register_cache_op(CacheOp::Set {
            key: "match:2".to_string(),
            value: b"finished".to_vec(),
            ttl: None,
        })
        .await
        .unwrap();
    let result = handle.commit().await;
    assert!(result.is_err());

    let cached = h.cache_store.get("match:2").await.unwrap();
    assert_eq!(cached, Some(b"in-progress".to_vec()));
}

#[tokio::test]
async fn a_transaction_holding_a_key_blocks_a_second_transaction_on_the_same_key() {
    let h = Harness::new();
    let handle = h.transactions.begin(&["shared".to_string()]).await.unwrap();

    let transactions = h.transactions.clone();
    let second = tokio::spawn(async move {
        transactions
            .begin_with_timeout(&["shared".to_string()], Duration::from_millis(100))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second.is_finished());

    handle.rollback().await.unwrap();
    let second_result = second.await.unwrap();
    assert!(second_result.is_ok());
}
