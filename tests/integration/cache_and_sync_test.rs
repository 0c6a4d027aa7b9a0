// tests/integration/cache_and_sync_test.rs

//! Cache Strategy + Sync Engine + Conflict Detector working together
//! across the cache/document boundary.

use super::test_helpers::Harness;
use mongodb::bson::doc;
use playhub_core::cache_strategy::CacheCategory;
use playhub_core::conflict::ConflictPolicy;
use playhub_core::sync::entity::EntityKind;

#[tokio::test]
async fn write_through_lands_in_both_cache_and_document_store() {
    let h = Harness::new();
    h.sync
        .write(EntityKind::player(), CacheCategory::PlayerState, "p1", &"idle".to_string())
        .await
        .unwrap();

    let cached: Option<String> = h.cache.get(CacheCategory::PlayerState, "p1").await.unwrap();
    assert_eq!(cached, Some("idle".to_string()));

    let stored = h.documents.find_one("player", doc! {"_id": "p1"}).await.unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn write_behind_flush_persists_queued_writes() {
    let h = Harness::new();
    let mut config = playhub_core::config::SyncConfig::default();
    config.default_strategy = playhub_core::config::SyncStrategy::WriteBehind;
    let sync = playhub_core::sync::SyncEngine::new(h.cache.clone(), h.documents.clone(), config);

    sync.write(EntityKind::room(), CacheCategory::RoomState, "r1", &"open".to_string())
        .await
        .unwrap();
    assert_eq!(sync.queue_depth(), 1);

    let flushed = sync.flush_once().await.unwrap();
    assert_eq!(flushed, 1);
    assert_eq!(sync.queue_depth(), 0);

    let stored = h.documents.find_one("room", doc! {"_id": "r1"}).await.unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn cache_aside_read_backfills_on_miss() {
    let h = Harness::new();
    let loaded = h
        .sync
        .read_cache_aside(CacheCategory::PlayerState, "p2", || async {
            Ok::<String, playhub_core::CoreError>("loaded".to_string())
        })
        .await
        .unwrap();
    assert_eq!(loaded, "loaded");

    let cached: Option<String> = h.cache.get(CacheCategory::PlayerState, "p2").await.unwrap();
    assert_eq!(cached, Some("loaded".to_string()));
}

#[tokio::test]
async fn conflict_detector_serializes_concurrent_writes_under_the_shared_lock() {
    let h = Harness::new();
    let first = h
        .conflict
        .check_and_write(EntityKind::player(), "p3", 0, b"A".to_vec(), "writer-1", ConflictPolicy::OptimisticLock)
        .await
        .unwrap();
    assert!(!first.has_conflict);

    let second = h
        .conflict
        .check_and_write(EntityKind::player(), "p3", 0, b"B".to_vec(), "writer-2", ConflictPolicy::OptimisticLock)
        .await
        .unwrap();
    assert!(second.has_conflict);
    assert_eq!(second.stored_payload, b"A".to_vec());
}
