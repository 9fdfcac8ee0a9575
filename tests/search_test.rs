//! End-to-end search tests over an in-memory index

mod common;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use stay_search_index::config::SearchSettings;
use stay_search_index::error::{AppError, Result};
use stay_search_index::index::IndexDocument;
use stay_search_index::models::{CalendarEntry, FieldType};
use stay_search_index::search::{
    PriceBand, RelaxationLevel, SearchError, SearchItem, SearchRequest, SearchResponse, SortBy,
    UnitResult,
};
use stay_search_index::state::{
    create_in_memory_store, ApplyOutcome, IndexStore, StoreStats, WriteBatch,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fault {
    Healthy,
    Slow,
    Down,
}

/// In-memory store whose reads can be slowed down or failed
struct FaultyStore {
    inner: Arc<dyn IndexStore>,
    fault: Mutex<Fault>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: create_in_memory_store(),
            fault: Mutex::new(Fault::Healthy),
        }
    }

    fn set(&self, fault: Fault) {
        *self.fault.lock() = fault;
    }

    async fn read(&self) -> Result<()> {
        let fault = *self.fault.lock();
        match fault {
            Fault::Healthy => Ok(()),
            Fault::Slow => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
            Fault::Down => Err(AppError::Storage("connection refused".to_string())),
        }
    }
}

#[async_trait]
impl IndexStore for FaultyStore {
    async fn get_document(&self, key: &str) -> Result<Option<IndexDocument>> {
        self.read().await?;
        self.inner.get_document(key).await
    }

    async fn get_documents(&self, keys: &[String]) -> Result<Vec<Option<IndexDocument>>> {
        self.read().await?;
        self.inner.get_documents(keys).await
    }

    async fn members(&self, set: &str) -> Result<BTreeSet<String>> {
        self.read().await?;
        self.inner.members(set).await
    }

    async fn intersect(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        self.read().await?;
        self.inner.intersect(sets).await
    }

    async fn union(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        self.read().await?;
        self.inner.union(sets).await
    }

    async fn cardinality(&self, set: &str) -> Result<usize> {
        self.read().await?;
        self.inner.cardinality(set).await
    }

    async fn range_by_score(&self, zset: &str, min: f64, max: f64) -> Result<BTreeSet<String>> {
        self.read().await?;
        self.inner.range_by_score(zset, min, max).await
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<ApplyOutcome> {
        self.inner.apply(batch).await
    }

    async fn document_keys(&self) -> Result<Vec<String>> {
        self.inner.document_keys().await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.inner.stats().await
    }

    fn backend(&self) -> &'static str {
        "faulty"
    }
}

fn units(response: &SearchResponse) -> Vec<&UnitResult> {
    response
        .items
        .iter()
        .filter_map(|item| match item {
            SearchItem::Unit(unit) => Some(unit),
            SearchItem::Property(_) => None,
        })
        .collect()
}

fn stay(check_in: i64, check_out: i64) -> SearchRequest {
    SearchRequest {
        check_in: Some(day(check_in)),
        check_out: Some(day(check_out)),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_rule_priced_stay_is_included_with_total() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 120.0);
    harness
        .add(&hotel, &room, vec![rule(day(10), day(20), 100.0)], vec![])
        .await;

    let response = harness.search.search(stay(12, 15)).await.unwrap();

    assert_eq!(response.relaxation_level, RelaxationLevel::Exact);
    assert_eq!(response.relaxation_trace, vec![RelaxationLevel::Exact]);
    let found = units(&response);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unit_id, room.id);
    assert_eq!(found[0].total_price, Some(300.0));
    assert_eq!(found[0].nights, Some(3));
    assert_eq!(found[0].price_per_night, 100.0);
    assert!(found[0].filter_mismatches.is_empty());
}

#[tokio::test]
async fn test_blocked_night_excluded_then_found_by_relaxing_dates() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    harness
        .add(
            &hotel,
            &room,
            vec![rule(day(10), day(20), 100.0)],
            vec![CalendarEntry::blocked(day(13), day(14))],
        )
        .await;

    let exact_only = SearchRequest {
        enable_relaxation: false,
        ..stay(12, 15)
    };
    let response = harness.search.search(exact_only).await.unwrap();
    assert_eq!(response.total_count, 0);
    assert_eq!(response.relaxation_level, RelaxationLevel::Exact);

    let response = harness.search.search(stay(12, 15)).await.unwrap();
    assert_eq!(response.relaxation_level, RelaxationLevel::RelaxDates);
    assert_eq!(response.relaxed_filters, vec!["dates".to_string()]);
    assert_eq!(
        response.relaxation_trace,
        vec![RelaxationLevel::Exact, RelaxationLevel::RelaxDates]
    );
    assert!(response.actual_criteria.dates.is_none());
    assert!(response.user_message.is_some());

    let found = units(&response);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].filter_mismatches, vec!["dates".to_string()]);
    assert_eq!(found[0].total_price, None);
}

#[tokio::test]
async fn test_price_band_widened_when_nothing_matches() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    for n in 0..5 {
        let room = unit(&hotel, &format!("Room {}", n), 100.0);
        harness.add(&hotel, &room, vec![], vec![]).await;
    }

    let request = SearchRequest {
        min_price: Some(50.0),
        max_price: Some(80.0),
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();

    assert_eq!(response.relaxation_level, RelaxationLevel::RelaxPrice);
    assert_eq!(response.relaxed_filters, vec!["price".to_string()]);
    // Dates were absent: visited but not counted as relaxed
    assert_eq!(
        response.relaxation_trace,
        vec![
            RelaxationLevel::Exact,
            RelaxationLevel::RelaxDates,
            RelaxationLevel::RelaxPrice
        ]
    );
    assert_eq!(response.total_count, 5);
    assert_eq!(
        response.actual_criteria.price,
        Some(PriceBand {
            min: Some(25.0),
            max: Some(120.0)
        })
    );
    assert!(units(&response)
        .iter()
        .all(|unit| unit.filter_mismatches == vec!["price".to_string()]));
}

#[tokio::test]
async fn test_booking_excludes_overlap_unless_self_excluded() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    let booking = Uuid::new_v4();
    harness
        .add(
            &hotel,
            &room,
            vec![],
            vec![CalendarEntry::booked(day(12), day(15), booking)],
        )
        .await;

    let overlapping = SearchRequest {
        enable_relaxation: false,
        ..stay(14, 16)
    };
    let response = harness.search.search(overlapping.clone()).await.unwrap();
    assert_eq!(response.total_count, 0);

    let adjacent = SearchRequest {
        enable_relaxation: false,
        ..stay(15, 18)
    };
    assert_eq!(harness.search.search(adjacent).await.unwrap().total_count, 1);

    let modifying = SearchRequest {
        exclude_booking_id: Some(booking),
        ..overlapping
    };
    assert_eq!(harness.search.search(modifying).await.unwrap().total_count, 1);
}

#[tokio::test]
async fn test_grouping_rolls_units_into_properties() {
    let harness = Harness::new();
    let resort = property("Aden", 12.8, 45.0);
    for (n, price) in [80.0, 120.0, 200.0].into_iter().enumerate() {
        let room = unit(&resort, &format!("Resort Room {}", n), price);
        harness.add(&resort, &room, vec![], vec![]).await;
    }
    let inn = property("Aden", 12.81, 45.01);
    let inn_room = unit(&inn, "Inn Room", 60.0);
    harness.add(&inn, &inn_room, vec![], vec![]).await;

    let request = SearchRequest {
        group_by_property: true,
        max_units_per_property: Some(2),
        sort_by: SortBy::PriceAsc,
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();

    assert_eq!(response.total_count, 2);
    let groups: Vec<_> = response
        .items
        .iter()
        .filter_map(|item| match item {
            SearchItem::Property(group) => Some(group),
            SearchItem::Unit(_) => None,
        })
        .collect();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].property_id, inn.id);

    let resort_group = groups[1];
    assert_eq!(resort_group.property_id, resort.id);
    assert_eq!(resort_group.matched_units_count, resort_group.units.len());
    assert_eq!(resort_group.units.len(), 2);
    assert_eq!(resort_group.hidden_units_count, 1);
    assert_eq!(resort_group.min_price, 80.0);
    assert_eq!(resort_group.max_price, 200.0);
    for group in groups {
        assert!(group.min_price <= group.max_price);
    }
}

#[tokio::test]
async fn test_pagination_respects_page_size() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    for n in 0..25 {
        let room = unit(&hotel, &format!("Room {}", n), 50.0 + n as f64);
        harness.add(&hotel, &room, vec![], vec![]).await;
    }

    let first = SearchRequest {
        page_size: Some(10),
        sort_by: SortBy::PriceAsc,
        ..Default::default()
    };
    let response = harness.search.search(first.clone()).await.unwrap();
    assert_eq!(response.total_count, 25);
    assert_eq!(response.total_pages, 3);
    assert_eq!(response.items.len(), 10);
    assert_eq!(units(&response)[0].price_per_night, 50.0);

    let last = SearchRequest { page: 3, ..first };
    let response = harness.search.search(last).await.unwrap();
    assert_eq!(response.items.len(), 5);
    assert_eq!(units(&response)[4].price_per_night, 74.0);

    let too_big = SearchRequest {
        page_size: Some(101),
        ..Default::default()
    };
    assert!(matches!(
        harness.search.search(too_big).await,
        Err(SearchError::Validation(_))
    ));
}

#[tokio::test]
async fn test_invalid_requests_fail_before_index_access() {
    let harness = Harness::new();

    let inverted = stay(15, 12);
    assert!(matches!(
        harness.search.search(inverted).await,
        Err(SearchError::Validation(_))
    ));

    let half_geo = SearchRequest {
        latitude: Some(12.8),
        ..Default::default()
    };
    assert!(matches!(
        harness.search.search(half_geo).await,
        Err(SearchError::Validation(_))
    ));

    let bad_radius = SearchRequest {
        latitude: Some(12.8),
        longitude: Some(45.0),
        radius_km: Some(-3.0),
        ..Default::default()
    };
    assert!(matches!(
        harness.search.search(bad_radius).await,
        Err(SearchError::Validation(_))
    ));

    let bad_filter = SearchRequest {
        dynamic_filters: BTreeMap::from([("floor".to_string(), "9..1".to_string())]),
        ..Default::default()
    };
    assert!(matches!(
        harness.search.search(bad_filter).await,
        Err(SearchError::Validation(_))
    ));
}

#[tokio::test]
async fn test_dynamic_field_filters() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let mut low = unit(&hotel, "Low Room", 100.0);
    low.dynamic_fields = vec![
        dynamic_field("floor", "1", FieldType::Number),
        dynamic_field("view", "Garden", FieldType::Select),
    ];
    let mut high = unit(&hotel, "High Room", 100.0);
    high.dynamic_fields = vec![
        dynamic_field("floor", "7", FieldType::Number),
        dynamic_field("view", "Sea", FieldType::Select),
    ];
    harness.add(&hotel, &low, vec![], vec![]).await;
    harness.add(&hotel, &high, vec![], vec![]).await;

    let search = |filters: &[(&str, &str)]| SearchRequest {
        dynamic_filters: filters
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        enable_relaxation: false,
        ..Default::default()
    };

    let response = harness.search.search(search(&[("floor", "5..")])).await.unwrap();
    let found = units(&response);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unit_id, high.id);
    assert!(found[0].card_fields.iter().any(|field| field.name == "floor"));

    let response = harness.search.search(search(&[("view", "garden")])).await.unwrap();
    assert_eq!(units(&response)[0].unit_id, low.id);

    let response = harness.search.search(search(&[("view", "~ea")])).await.unwrap();
    assert_eq!(units(&response)[0].unit_id, high.id);

    let unknown = harness.search.search(search(&[("balcony", "yes")])).await;
    assert!(matches!(unknown, Err(SearchError::UnknownField(name)) if name == "balcony"));

    let wrong_type = harness.search.search(search(&[("view", "1..3")])).await;
    assert!(matches!(wrong_type, Err(SearchError::Validation(_))));
}

#[tokio::test]
async fn test_geo_radius_and_distance_sort() {
    let harness = Harness::new();
    let aden = property("Aden", 12.80, 45.03);
    let aden_room = unit(&aden, "Aden Room", 100.0);
    let sanaa = property("Sanaa", 15.35, 44.20);
    let sanaa_room = unit(&sanaa, "Sanaa Room", 100.0);
    harness.add(&aden, &aden_room, vec![], vec![]).await;
    harness.add(&sanaa, &sanaa_room, vec![], vec![]).await;

    let nearby = SearchRequest {
        latitude: Some(12.79),
        longitude: Some(45.02),
        radius_km: Some(20.0),
        enable_relaxation: false,
        ..Default::default()
    };
    let response = harness.search.search(nearby).await.unwrap();
    let found = units(&response);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unit_id, aden_room.id);
    assert!(found[0].distance_km.unwrap() < 20.0);

    let everywhere = SearchRequest {
        latitude: Some(12.79),
        longitude: Some(45.02),
        sort_by: SortBy::Distance,
        ..Default::default()
    };
    let response = harness.search.search(everywhere).await.unwrap();
    let found = units(&response);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].unit_id, aden_room.id);
    assert!(found[0].distance_km < found[1].distance_km);
}

#[tokio::test]
async fn test_text_matches_tokens_and_substrings() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let sunset = unit(&hotel, "Sunset Suite", 100.0);
    let garden = unit(&hotel, "Garden Room", 100.0);
    harness.add(&hotel, &sunset, vec![], vec![]).await;
    harness.add(&hotel, &garden, vec![], vec![]).await;

    for text in ["sunset", "SUNS", "sunset aden"] {
        let request = SearchRequest {
            text: Some(text.to_string()),
            enable_relaxation: false,
            ..Default::default()
        };
        let response = harness.search.search(request).await.unwrap();
        let found = units(&response);
        assert_eq!(found.len(), 1, "text {:?}", text);
        assert_eq!(found[0].unit_id, sunset.id);
    }
}

#[tokio::test]
async fn test_amenities_are_required_together() {
    let harness = Harness::new();
    let pool = amenity("Pool");
    let wifi = amenity("Wifi");
    let hotel = property("Aden", 12.8, 45.0);
    let mut both = unit(&hotel, "Deluxe", 100.0);
    both.amenities = vec![pool.clone(), wifi.clone()];
    let mut only_wifi = unit(&hotel, "Standard", 100.0);
    only_wifi.amenities = vec![wifi.clone()];
    harness.add(&hotel, &both, vec![], vec![]).await;
    harness.add(&hotel, &only_wifi, vec![], vec![]).await;

    let request = SearchRequest {
        amenity_ids: vec![pool.id, wifi.id],
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();
    assert_eq!(response.relaxation_level, RelaxationLevel::Exact);
    assert_eq!(units(&response).len(), 1);
    assert_eq!(units(&response)[0].unit_id, both.id);
}

#[tokio::test]
async fn test_city_filter_is_normalized_and_unapproved_hidden() {
    let harness = Harness::new();
    let approved = property("Aden", 12.8, 45.0);
    let approved_room = unit(&approved, "Room", 100.0);
    let mut pending = property("Aden", 12.8, 45.0);
    pending.is_approved = false;
    let pending_room = unit(&pending, "Room", 100.0);
    harness.add(&approved, &approved_room, vec![], vec![]).await;
    harness.add(&pending, &pending_room, vec![], vec![]).await;

    let request = SearchRequest {
        city: Some("  ADEN ".to_string()),
        enable_relaxation: false,
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();
    let found = units(&response);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unit_id, approved_room.id);
    assert_eq!(response.stage_counts.len(), 7);
    assert_eq!(response.stage_counts[0].candidates, 1);
}

#[tokio::test]
async fn test_exhausted_search_explains_itself() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Room", 100.0);
    harness.add(&hotel, &room, vec![], vec![]).await;

    let request = SearchRequest {
        city: Some("Mukalla".to_string()),
        min_star_rating: Some(5),
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();

    assert_eq!(response.relaxation_level, RelaxationLevel::Exhausted);
    assert_eq!(response.relaxed_filters, vec!["rating".to_string()]);
    assert_eq!(response.relaxation_trace, RelaxationLevel::ORDER.to_vec());
    assert_eq!(response.total_count, 0);
    assert!(response.user_message.is_some());
    assert!(!response.suggested_actions.is_empty());
}

#[tokio::test]
async fn test_wider_radius_finds_units_outside_the_original_circle() {
    let harness = Harness::new();
    // About 22 km north of the search centre
    let hotel = property("Aden", 13.0, 45.0);
    let room = unit(&hotel, "Hill Room", 100.0);
    harness.add(&hotel, &room, vec![], vec![]).await;

    let request = SearchRequest {
        latitude: Some(12.8),
        longitude: Some(45.0),
        radius_km: Some(15.0),
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();

    assert_eq!(response.relaxation_level, RelaxationLevel::RelaxRadius);
    assert_eq!(response.relaxed_filters, vec!["radius".to_string()]);
    assert_eq!(response.relaxation_trace, RelaxationLevel::ORDER[..6].to_vec());
    assert_eq!(response.actual_criteria.geo.and_then(|geo| geo.radius_km), Some(30.0));
    assert_eq!(units(&response)[0].unit_id, room.id);
    assert!(units(&response)[0].distance_km.unwrap() > 15.0);
}

#[tokio::test]
async fn test_dropping_unit_type_walks_the_whole_order() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    harness.add(&hotel, &room, vec![], vec![]).await;

    let request = SearchRequest {
        latitude: Some(12.8),
        longitude: Some(45.0),
        radius_km: Some(10.0),
        unit_type_id: Some(Uuid::new_v4()),
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();

    assert_eq!(response.relaxation_level, RelaxationLevel::RelaxUnitType);
    // The radius was present, so it is loosened before the unit type goes
    assert_eq!(
        response.relaxed_filters,
        vec!["radius".to_string(), "unit_type".to_string()]
    );
    assert_eq!(response.relaxation_trace, RelaxationLevel::ORDER[..7].to_vec());
    assert_eq!(response.actual_criteria.unit_type_id, None);
    assert_eq!(response.actual_criteria.geo.and_then(|geo| geo.radius_km), Some(20.0));
    assert_eq!(response.total_count, 1);
    assert_eq!(units(&response)[0].unit_id, room.id);
}

#[tokio::test]
async fn test_radius_edge_across_cell_boundary() {
    let harness = Harness::new();
    let (latitude, longitude, radius) = (60.005, 10.2, 500.0);
    // 499.9 km due north, in a grid row the circle barely reaches
    let north = latitude + (499.9_f64 / 6371.0).to_degrees();
    let hotel = property("Tromso", north, longitude);
    let room = unit(&hotel, "Edge Room", 100.0);
    harness.add(&hotel, &room, vec![], vec![]).await;

    let request = SearchRequest {
        latitude: Some(latitude),
        longitude: Some(longitude),
        radius_km: Some(radius),
        enable_relaxation: false,
        ..Default::default()
    };
    let response = harness.search.search(request).await.unwrap();

    assert_eq!(response.total_count, 1);
    assert!(units(&response)[0].distance_km.unwrap() <= radius);
}

#[tokio::test]
async fn test_slow_store_times_out_with_retryable_error() {
    let store = Arc::new(FaultyStore::new());
    let harness = Harness::with_store(store.clone(), SearchSettings::default());
    let hotel = property("Aden", 12.8, 45.0);
    let mut room = unit(&hotel, "Sea Room", 100.0);
    room.dynamic_fields = vec![dynamic_field("floor", "3", FieldType::Number)];
    harness.add(&hotel, &room, vec![], vec![]).await;
    store.set(Fault::Slow);

    let request = SearchRequest {
        timeout_ms: Some(50),
        ..Default::default()
    };
    let err = harness.search.search(request).await.unwrap_err();
    assert!(matches!(err, SearchError::Timeout(50)));
    assert!(err.is_retryable());

    // Field registry lookups run under the same deadline
    let filtered = SearchRequest {
        timeout_ms: Some(50),
        dynamic_filters: BTreeMap::from([("floor".to_string(), "2..".to_string())]),
        ..Default::default()
    };
    let started = std::time::Instant::now();
    let err = harness.search.search(filtered).await.unwrap_err();
    assert!(matches!(err, SearchError::Timeout(50)));
    assert!(started.elapsed() < Duration::from_millis(450));
}

#[tokio::test]
async fn test_store_failure_is_an_error_not_an_empty_page() {
    let store = Arc::new(FaultyStore::new());
    let harness = Harness::with_store(store.clone(), SearchSettings::default());
    let hotel = property("Aden", 12.8, 45.0);
    harness.add(&hotel, &unit(&hotel, "Sea Room", 100.0), vec![], vec![]).await;
    store.set(Fault::Down);

    let result = harness.search.search(SearchRequest::default()).await;
    match result {
        Err(SearchError::Store(message)) => assert!(message.contains("connection refused")),
        other => panic!("expected a store error, got {:?}", other.map(|r| r.total_count)),
    }

    store.set(Fault::Healthy);
    let response = harness.search.search(SearchRequest::default()).await.unwrap();
    assert_eq!(response.total_count, 1);
}
