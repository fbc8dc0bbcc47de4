//! Integration tests for `PgEventStore`.

use std::collections::BTreeMap;

use chrono::Utc;
use chronicle_core::error::DomainError;
use chronicle_core::event_store::{EventStore, StoredEvent};
use chronicle_event_store::pg_event_store::PgEventStore;
use sqlx::PgPool;
use uuid::Uuid;

/// Helper to build a `StoredEvent` with sensible defaults.
fn make_stored_event(aggregate_id: Uuid, version: i64) -> StoredEvent {
    StoredEvent {
        event_id: Uuid::new_v4(),
        event_type: "order.item_added".to_string(),
        aggregate_id,
        aggregate_type: "order".to_string(),
        version,
        payload: serde_json::json!({"product_id": "sku-1", "quantity": 1}),
        correlation_id: Uuid::new_v4(),
        causation_id: Uuid::new_v4(),
        occurred_at: Utc::now(),
        attributes: BTreeMap::from([("schema".to_string(), "v1".to_string())]),
    }
}

// --- load_events ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_events_returns_empty_vec_for_nonexistent_aggregate(pool: PgPool) {
    let store = PgEventStore::new(pool);

    let events = store
        .load_events(Uuid::new_v4(), "order", 1, None)
        .await
        .unwrap();

    assert!(events.is_empty());
}

// --- save_events + load_events round-trip ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_save_and_load_single_event(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let event = make_stored_event(aggregate_id, 1);
    let expected = event.clone();

    store.save_events(aggregate_id, &[event], 0).await.unwrap();

    let loaded = store.load_events(aggregate_id, "order", 1, None).await.unwrap();
    assert_eq!(loaded.len(), 1);

    let e = &loaded[0];
    assert_eq!(e.event_id, expected.event_id);
    assert_eq!(e.event_type, expected.event_type);
    assert_eq!(e.aggregate_type, "order");
    assert_eq!(e.payload, expected.payload);
    assert_eq!(e.version, 1);
    assert_eq!(e.attributes, expected.attributes);
    // TIMESTAMPTZ has microsecond precision.
    assert_eq!(
        e.occurred_at.timestamp_micros(),
        expected.occurred_at.timestamp_micros()
    );
}

// --- ranges ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_events_respects_version_range(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let events: Vec<_> = (1..=5)
        .map(|v| make_stored_event(aggregate_id, v))
        .collect();
    store.save_events(aggregate_id, &events, 0).await.unwrap();

    let middle = store
        .load_events(aggregate_id, "order", 2, Some(4))
        .await
        .unwrap();
    let history = store
        .get_event_history(aggregate_id, "order", 4)
        .await
        .unwrap();

    assert_eq!(
        middle.iter().map(|e| e.version).collect::<Vec<_>>(),
        vec![2, 3, 4]
    );
    assert_eq!(
        history.iter().map(|e| e.version).collect::<Vec<_>>(),
        vec![4, 5]
    );
    assert_eq!(store.stream_version(aggregate_id).await.unwrap(), 5);
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_stale_expected_version_is_a_conflict(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    store
        .save_events(
            aggregate_id,
            &[
                make_stored_event(aggregate_id, 1),
                make_stored_event(aggregate_id, 2),
                make_stored_event(aggregate_id, 3),
            ],
            0,
        )
        .await
        .unwrap();

    let result = store
        .save_events(aggregate_id, &[make_stored_event(aggregate_id, 3)], 2)
        .await;

    match result {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id: conflict_id,
            expected,
            actual,
        }) => {
            assert_eq!(conflict_id, aggregate_id);
            assert_eq!(expected, 2);
            assert_eq!(actual, 3);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(store.stream_version(aggregate_id).await.unwrap(), 3);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_writers_exactly_one_succeeds(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    store
        .save_events(aggregate_id, &[make_stored_event(aggregate_id, 1)], 0)
        .await
        .unwrap();

    let first = [make_stored_event(aggregate_id, 2)];
    let second = [make_stored_event(aggregate_id, 2)];
    let (a, b) = tokio::join!(
        store.save_events(aggregate_id, &first, 1),
        store.save_events(aggregate_id, &second, 1),
    );

    assert!(a.is_ok() ^ b.is_ok());
    let failure = if a.is_err() { a } else { b };
    assert!(failure.unwrap_err().is_conflict());
    assert_eq!(store.stream_version(aggregate_id).await.unwrap(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_sequential_appends_with_correct_expected_version(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    store
        .save_events(
            aggregate_id,
            &[
                make_stored_event(aggregate_id, 1),
                make_stored_event(aggregate_id, 2),
            ],
            0,
        )
        .await
        .unwrap();
    store
        .save_events(
            aggregate_id,
            &[
                make_stored_event(aggregate_id, 3),
                make_stored_event(aggregate_id, 4),
            ],
            2,
        )
        .await
        .unwrap();

    let loaded = store.load_events(aggregate_id, "order", 1, None).await.unwrap();
    assert_eq!(loaded.len(), 4);
    for (i, event) in loaded.iter().enumerate() {
        assert_eq!(event.version, i64::try_from(i + 1).unwrap());
    }
}

// --- edge cases ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_save_empty_events_is_noop(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    store.save_events(aggregate_id, &[], 0).await.unwrap();

    assert_eq!(store.stream_version(aggregate_id).await.unwrap(), 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_gapped_batch_is_rejected_before_writing(pool: PgPool) {
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    let result = store
        .save_events(
            aggregate_id,
            &[
                make_stored_event(aggregate_id, 1),
                make_stored_event(aggregate_id, 3),
            ],
            0,
        )
        .await;

    assert!(matches!(result, Err(DomainError::Validation(_))));
    assert_eq!(store.stream_version(aggregate_id).await.unwrap(), 0);
}
