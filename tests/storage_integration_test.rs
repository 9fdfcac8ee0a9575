mod common;

use common::*;
use stay_search_index::config::SearchSettings;
use stay_search_index::index::{keys, IndexDocument};
use stay_search_index::search::SearchRequest;
use stay_search_index::state::{IndexStore, InMemoryStore, RedisStore, SledStore};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Index lifecycle that every store backend must support
async fn test_index_lifecycle(store: Arc<dyn IndexStore>) {
    let harness = Harness::with_store(store.clone(), SearchSettings::default());
    let pool = amenity("Pool");
    let hotel = property("Aden", 12.8, 45.0);
    let mut room = unit(&hotel, "Sunset Suite", 100.0);
    room.amenities = vec![pool.clone()];
    let key = IndexDocument::key_for(hotel.id, room.id);

    // Write: document plus every secondary structure
    harness.add(&hotel, &room, vec![], vec![]).await;
    assert!(store.get_document(&key).await.unwrap().is_some());
    assert!(store.members(keys::ALL).await.unwrap().contains(&key));
    assert!(store.members(&keys::city("aden")).await.unwrap().contains(&key));
    assert!(store.members(&keys::amenity(&pool.id)).await.unwrap().contains(&key));
    assert!(store.members(&keys::keyword("sunset")).await.unwrap().contains(&key));
    assert!(store
        .range_by_score(keys::PRICE_MIN, 90.0, 110.0)
        .await
        .unwrap()
        .contains(&key));
    assert_eq!(store.cardinality(keys::APPROVED).await.unwrap(), 1);

    // Update: old scores and memberships are replaced
    harness.catalog.update_unit(&room.id, |unit| {
        unit.base_price = 300.0;
        unit.amenities.clear();
    });
    harness.indexing.reindex_unit(hotel.id, room.id).await.unwrap();
    assert!(store
        .range_by_score(keys::PRICE_MIN, 90.0, 110.0)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .range_by_score(keys::PRICE_MIN, 250.0, 350.0)
        .await
        .unwrap()
        .contains(&key));
    assert!(store.members(&keys::amenity(&pool.id)).await.unwrap().is_empty());
    let document = store.get_document(&key).await.unwrap().unwrap();
    assert_eq!(document.metadata.version, 2);

    // Search runs against the same structures
    let request = SearchRequest {
        city: Some("Aden".to_string()),
        text: Some("sunset".to_string()),
        enable_relaxation: false,
        ..Default::default()
    };
    assert_eq!(harness.search.search(request).await.unwrap().total_count, 1);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert!(!stats.dimensions.is_empty());

    // Delete: nothing of the document remains
    harness.indexing.remove_unit(hotel.id, room.id).await.unwrap();
    assert!(store.get_document(&key).await.unwrap().is_none());
    assert!(store.members(keys::ALL).await.unwrap().is_empty());
    assert!(store.members(&keys::city("aden")).await.unwrap().is_empty());
    assert!(store.members(&keys::keyword("sunset")).await.unwrap().is_empty());
    assert!(store
        .range_by_score(keys::PRICE_MIN, f64::NEG_INFINITY, f64::INFINITY)
        .await
        .unwrap()
        .is_empty());
    assert!(store.document_keys().await.unwrap().is_empty());
}

/// Set algebra over several documents
async fn test_set_queries(store: Arc<dyn IndexStore>) {
    let harness = Harness::with_store(store.clone(), SearchSettings::default());
    let aden = property("Aden", 12.8, 45.0);
    let sanaa = property("Sanaa", 15.35, 44.2);
    let mut expected_aden = Vec::new();
    for n in 0..3 {
        let room = unit(&aden, &format!("Aden Room {}", n), 100.0 + n as f64 * 50.0);
        harness.add(&aden, &room, vec![], vec![]).await;
        expected_aden.push(IndexDocument::key_for(aden.id, room.id));
    }
    let sanaa_room = unit(&sanaa, "Sanaa Room", 80.0);
    harness.add(&sanaa, &sanaa_room, vec![], vec![]).await;

    let aden_keys = store
        .intersect(&[keys::APPROVED.to_string(), keys::city("aden")])
        .await
        .unwrap();
    assert_eq!(aden_keys.len(), 3);
    assert!(expected_aden.iter().all(|key| aden_keys.contains(key)));

    let both = store
        .union(&[keys::city("aden"), keys::city("sanaa")])
        .await
        .unwrap();
    assert_eq!(both.len(), 4);

    assert!(store.intersect(&[]).await.unwrap().is_empty());
    assert_eq!(store.range_by_score(keys::PRICE_MIN, 0.0, 120.0).await.unwrap().len(), 2);

    let documents = store
        .get_documents(&[expected_aden[0].clone(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents[0].is_some());
    assert!(documents[1].is_none());
}

/// Concurrent writers on distinct units
async fn test_concurrent_indexing(store: Arc<dyn IndexStore>) {
    let harness = Arc::new(Harness::with_store(store.clone(), SearchSettings::default()));
    let hotel = property("Aden", 12.8, 45.0);

    let mut handles = vec![];
    for n in 0..10 {
        let harness = Arc::clone(&harness);
        let hotel = hotel.clone();
        handles.push(tokio::spawn(async move {
            let room = unit(&hotel, &format!("Room {}", n), 100.0);
            harness.add(&hotel, &room, vec![], vec![]).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.document_keys().await.unwrap().len(), 10);
    assert_eq!(store.cardinality(&keys::property(&hotel.id)).await.unwrap(), 10);
}

// InMemoryStore tests
#[tokio::test]
async fn test_inmemory_lifecycle() {
    test_index_lifecycle(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn test_inmemory_set_queries() {
    test_set_queries(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn test_inmemory_concurrent() {
    test_concurrent_indexing(Arc::new(InMemoryStore::new())).await;
}

// SledStore tests
#[tokio::test]
async fn test_sled_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::new(temp_dir.path()).unwrap();
    test_index_lifecycle(Arc::new(store)).await;
}

#[tokio::test]
async fn test_sled_set_queries() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::new(temp_dir.path()).unwrap();
    test_set_queries(Arc::new(store)).await;
}

#[tokio::test]
async fn test_sled_concurrent() {
    let temp_dir = TempDir::new().unwrap();
    let store = SledStore::new(temp_dir.path()).unwrap();
    test_concurrent_indexing(Arc::new(store)).await;
}

#[tokio::test]
async fn test_sled_persistence() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    let key = IndexDocument::key_for(hotel.id, room.id);

    {
        let store: Arc<dyn IndexStore> = Arc::new(SledStore::new(&path).unwrap());
        let harness = Harness::with_store(store.clone(), SearchSettings::default());
        harness.add(&hotel, &room, vec![], vec![]).await;
        store.flush().await.unwrap();
    }

    let store = SledStore::new(&path).unwrap();
    let document = store.get_document(&key).await.unwrap().unwrap();
    assert_eq!(document.unit_id, room.id);
    assert!(store.members(&keys::city("aden")).await.unwrap().contains(&key));
    assert!(store
        .range_by_score(keys::PRICE_MIN, 100.0, 100.0)
        .await
        .unwrap()
        .contains(&key));
}

// RedisStore tests (conditional on Redis being available)
const REDIS_URL: &str = "redis://127.0.0.1:6379/15";

async fn redis_store() -> Option<Arc<dyn IndexStore>> {
    match RedisStore::new_with_prefix(REDIS_URL, &format!("test-{}", Uuid::new_v4())).await {
        Ok(store) => Some(Arc::new(store)),
        Err(_) => {
            eprintln!("Skipping test: Redis not available");
            None
        }
    }
}

#[tokio::test]
async fn test_redis_lifecycle() {
    if let Some(store) = redis_store().await {
        test_index_lifecycle(store).await;
    }
}

#[tokio::test]
async fn test_redis_set_queries() {
    if let Some(store) = redis_store().await {
        test_set_queries(store).await;
    }
}
