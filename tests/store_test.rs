//! Work item store contract tests, run against the in-memory store.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portalq::error::{Error, ErrorKind};
use portalq::model::{LastError, NewWorkItem, Outcome, Status};
use portalq::store::WorkStore;
use portalq::store::mem::MemStore;

use common::{claim_status_payload, eligibility_payload};

fn transient_error(message: &str) -> LastError {
    LastError {
        kind: ErrorKind::Transient,
        message: message.into(),
    }
}

fn empty_outcome() -> Outcome {
    Outcome {
        data: serde_json::json!({"coverage_status": "Active"}),
        lines: Vec::new(),
        duration_ms: 10,
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_creates_pending_item() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();

    assert_eq!(item.status, Status::Pending);
    assert_eq!(item.attempts, 0);
    assert!(item.last_error.is_none());
    assert!(item.not_before.is_none());
}

#[tokio::test]
async fn duplicate_idempotency_key_is_rejected_and_store_unchanged() {
    let store = MemStore::new();

    store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")).idempotency_key("req-101"))
        .await
        .unwrap();

    let err = store
        .enqueue(NewWorkItem::new(eligibility_payload("CD456")).idempotency_key("req-101"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Duplicate(ref key) if key == "req-101"));

    let items = store.list(None, 100).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn distinct_idempotency_keys_both_enqueue() {
    let store = MemStore::new();

    store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")).idempotency_key("req-101"))
        .await
        .unwrap();
    store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")).idempotency_key("req-102"))
        .await
        .unwrap();

    assert_eq!(store.list(None, 100).await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claims_follow_fifo_order() {
    let store = MemStore::new();

    let mut expected = Vec::new();
    for member in ["M1", "M2", "M3"] {
        let item = store
            .enqueue(NewWorkItem::new(eligibility_payload(member)))
            .await
            .unwrap();
        expected.push(item.id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for want in expected {
        let claimed = store.claim_next().await.unwrap().expect("claimable item");
        assert_eq!(claimed.id, want);
        assert_eq!(claimed.status, Status::InProgress);
        assert_eq!(claimed.attempts, 1);
    }
    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn claim_returns_none_on_empty_queue() {
    let store = MemStore::new();
    assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_claimants_never_share_an_item() {
    let store = Arc::new(MemStore::new());

    let total = 20;
    for i in 0..total {
        store
            .enqueue(NewWorkItem::new(claim_status_payload(&format!("CLM-{i}"))))
            .await
            .unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        workers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = store.claim_next().await.unwrap() {
                claimed.push(item.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), total, "every item claimed exactly once");
    assert_eq!(unique.len(), total, "no item claimed twice");
}

#[tokio::test]
async fn not_before_hides_item_until_elapsed() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();
    store.claim_next().await.unwrap().expect("claim");

    store
        .release_for_retry(
            item.id,
            transient_error("portal timeout"),
            Utc::now() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();

    assert!(
        store.claim_next().await.unwrap().is_none(),
        "gated item must be invisible"
    );

    let retried = store.get(item.id).await.unwrap();
    assert_eq!(retried.status, Status::Pending);
    assert_eq!(retried.attempts, 1);
    assert_eq!(
        retried.last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Transient)
    );
}

#[tokio::test]
async fn elapsed_not_before_is_claimable_again() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();
    store.claim_next().await.unwrap().expect("claim");
    store
        .release_for_retry(
            item.id,
            transient_error("portal timeout"),
            Utc::now() - chrono::Duration::seconds(1),
        )
        .await
        .unwrap();

    let reclaimed = store.claim_next().await.unwrap().expect("reclaimable");
    assert_eq!(reclaimed.id, item.id);
    assert_eq!(reclaimed.attempts, 2);
}

// ---------------------------------------------------------------------------
// Terminal writes and the outcome invariant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn record_outcome_flips_to_success_and_clears_error() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();
    store.claim_next().await.unwrap().expect("claim");
    store
        .release_for_retry(
            item.id,
            transient_error("first try failed"),
            Utc::now() - chrono::Duration::seconds(1),
        )
        .await
        .unwrap();
    store.claim_next().await.unwrap().expect("reclaim");

    store.record_outcome(item.id, empty_outcome()).await.unwrap();

    let done = store.get(item.id).await.unwrap();
    assert_eq!(done.status, Status::Success);
    assert!(done.last_error.is_none(), "success clears last_error");
    assert!(store.get_outcome(item.id).await.unwrap().is_some());
}

#[tokio::test]
async fn outcome_exists_iff_success() {
    let store = MemStore::new();

    let ok = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB1")))
        .await
        .unwrap();
    let failed = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB2")))
        .await
        .unwrap();

    store.claim_next().await.unwrap();
    store.record_outcome(ok.id, empty_outcome()).await.unwrap();

    store.claim_next().await.unwrap();
    store
        .record_failure(
            failed.id,
            Status::FailedTech,
            transient_error("gave up"),
        )
        .await
        .unwrap();

    assert!(store.get_outcome(ok.id).await.unwrap().is_some());
    assert!(store.get_outcome(failed.id).await.unwrap().is_none());
}

#[tokio::test]
async fn transitions_outside_the_table_are_rejected() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();

    // Pending -> Success is not in the table.
    let err = store.record_outcome(item.id, empty_outcome()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    // Pending -> FailedTech is not in the table either.
    let err = store
        .record_failure(item.id, Status::FailedTech, transient_error("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    // Terminal states cannot loop back.
    store.claim_next().await.unwrap();
    store.record_outcome(item.id, empty_outcome()).await.unwrap();
    let err = store
        .release_for_retry(item.id, transient_error("x"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn record_failure_requires_a_failed_status() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();
    store.claim_next().await.unwrap();

    let err = store
        .record_failure(item.id, Status::Success, transient_error("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Other(_)));
}

#[tokio::test]
async fn missing_ids_report_not_found() {
    let store = MemStore::new();
    let ghost = portalq::model::WorkItemId::new();

    assert!(matches!(store.get(ghost).await, Err(Error::NotFound(_))));
    assert!(matches!(
        store.get_outcome(ghost).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.record_outcome(ghost, empty_outcome()).await,
        Err(Error::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_claims_are_reclaimed() {
    let store = MemStore::new();

    let item = store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();
    store.claim_next().await.unwrap().expect("claim");

    tokio::time::sleep(Duration::from_millis(10)).await;
    let reclaimed = store.reclaim_stale(Duration::ZERO).await.unwrap();
    assert_eq!(reclaimed, vec![item.id]);

    let back = store.get(item.id).await.unwrap();
    assert_eq!(back.status, Status::Pending);
    assert_eq!(
        back.last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Transient)
    );
    assert_eq!(back.attempts, 1, "reclaim keeps the attempt count");
}

#[tokio::test]
async fn fresh_claims_are_left_alone() {
    let store = MemStore::new();

    store
        .enqueue(NewWorkItem::new(eligibility_payload("AB123")))
        .await
        .unwrap();
    store.claim_next().await.unwrap().expect("claim");

    let reclaimed = store
        .reclaim_stale(Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(reclaimed.is_empty());
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_by_status() {
    let store = MemStore::new();

    store
        .enqueue(NewWorkItem::new(eligibility_payload("AB1")))
        .await
        .unwrap();
    store
        .enqueue(NewWorkItem::new(eligibility_payload("AB2")))
        .await
        .unwrap();
    let claimed = store.claim_next().await.unwrap().expect("claim");

    let in_progress = store.list(Some(Status::InProgress), 10).await.unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, claimed.id);

    let still_pending = store.list(Some(Status::Pending), 10).await.unwrap();
    assert_eq!(still_pending.len(), 1);

    assert_eq!(store.list(None, 1).await.unwrap().len(), 1, "limit applies");
}
