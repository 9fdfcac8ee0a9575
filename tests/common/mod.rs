//! Common test utilities
//!
//! Builds catalog entities and a fully wired in-memory index so integration
//! tests can index units and search them end to end.

#![allow(dead_code)]

use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use stay_search_index::api::{build_router, AppState};
use stay_search_index::catalog::{CatalogSource, InMemoryCatalog};
use stay_search_index::config::{BackoffStrategy, IndexingConfig, SearchSettings};
use stay_search_index::index::{IndexingService, ReindexOutcome, SecondaryIndexManager};
use stay_search_index::models::{
    Amenity, CalendarEntry, CancellationPolicy, DynamicFieldValue, FieldType, PricingMethod,
    PricingRule, Property, Unit,
};
use stay_search_index::search::SearchService;
use stay_search_index::state::{create_in_memory_store, IndexStore};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A day relative to a fixed point two months ahead, inside the index horizon
pub fn day(offset: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(60 + offset)
}

pub fn property(city: &str, latitude: f64, longitude: f64) -> Property {
    Property {
        id: Uuid::new_v4(),
        name: format!("{} Palms", city),
        property_type_id: Uuid::new_v4(),
        property_type_name: "Hotel".to_string(),
        owner_id: Uuid::new_v4(),
        star_rating: 4,
        average_rating: 4.2,
        is_approved: true,
        is_featured: false,
        view_count: 10,
        booking_count: 2,
        address: "1 Harbour Street".to_string(),
        city: city.to_string(),
        latitude,
        longitude,
        amenities: vec![],
        services: vec![],
        images: vec![],
        updated_at: Utc::now(),
    }
}

pub fn unit(property: &Property, name: &str, base_price: f64) -> Unit {
    Unit {
        id: Uuid::new_v4(),
        property_id: property.id,
        name: name.to_string(),
        unit_type_id: Uuid::new_v4(),
        unit_type_name: "Double Room".to_string(),
        base_price,
        currency: "USD".to_string(),
        max_adults: 2,
        max_children: 1,
        discount_percentage: 0.0,
        pricing_method: PricingMethod::Daily,
        cancellation: CancellationPolicy::default(),
        is_active: true,
        amenities: vec![],
        images: vec![],
        dynamic_fields: vec![],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn amenity(name: &str) -> Amenity {
    Amenity {
        id: Uuid::new_v4(),
        name: name.to_string(),
        category: None,
        extra_cost: None,
    }
}

pub fn dynamic_field(name: &str, value: &str, field_type: FieldType) -> DynamicFieldValue {
    DynamicFieldValue {
        name: name.to_string(),
        display_name: name.to_string(),
        value: value.to_string(),
        field_type,
        category: None,
        is_searchable: true,
        is_primary_filter: false,
        show_in_cards: true,
    }
}

pub fn rule(start: NaiveDate, end: NaiveDate, base_price: f64) -> PricingRule {
    PricingRule {
        id: Uuid::new_v4(),
        start_date: start,
        end_date: end,
        base_price,
        weekend_price: None,
        weekly_price: None,
        monthly_price: None,
        currency: "USD".to_string(),
        season: None,
        min_stay: None,
        max_stay: None,
    }
}

/// Retries without meaningful sleeps
pub fn fast_indexing_config() -> IndexingConfig {
    IndexingConfig {
        max_attempts: 2,
        backoff_base_ms: 1,
        backoff: BackoffStrategy::Fixed,
        rebuild_concurrency: 4,
        self_heal_interval_secs: 0,
        ..Default::default()
    }
}

/// Catalog, index and services wired over an in-memory store
pub struct Harness {
    pub catalog: InMemoryCatalog,
    pub store: Arc<dyn IndexStore>,
    pub index: Arc<SecondaryIndexManager>,
    pub indexing: Arc<IndexingService>,
    pub search: Arc<SearchService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SearchSettings::default())
    }

    pub fn with_settings(settings: SearchSettings) -> Self {
        Self::with_store(create_in_memory_store(), settings)
    }

    pub fn with_store(store: Arc<dyn IndexStore>, settings: SearchSettings) -> Self {
        let catalog = InMemoryCatalog::new();
        let index = Arc::new(SecondaryIndexManager::new(
            store.clone(),
            settings.geo_cell_degrees,
        ));
        let source: Arc<dyn CatalogSource> = Arc::new(catalog.clone());
        let indexing = Arc::new(IndexingService::new(
            source,
            index.clone(),
            fast_indexing_config(),
        ));
        let search = Arc::new(SearchService::new(index.clone(), settings));

        Self {
            catalog,
            store,
            index,
            indexing,
            search,
        }
    }

    /// HTTP router over this harness's services
    pub fn router(&self) -> Router {
        build_router(AppState::new(
            Arc::clone(&self.search),
            Arc::clone(&self.indexing),
        ))
    }

    /// Put a unit into the catalog without indexing it
    pub fn stage(
        &self,
        property: &Property,
        unit: &Unit,
        rules: Vec<PricingRule>,
        calendar: Vec<CalendarEntry>,
    ) {
        self.catalog.upsert_property(property.clone());
        self.catalog.upsert_unit(unit.clone());
        self.catalog.set_pricing_rules(unit.id, rules);
        self.catalog.set_calendar(unit.id, calendar);
    }

    /// Put a unit into the catalog and index it
    pub async fn add(
        &self,
        property: &Property,
        unit: &Unit,
        rules: Vec<PricingRule>,
        calendar: Vec<CalendarEntry>,
    ) -> ReindexOutcome {
        self.stage(property, unit, rules, calendar);
        self.indexing
            .reindex_unit(property.id, unit.id)
            .await
            .expect("reindex should succeed")
    }
}

/// Parse Prometheus exposition format into metric name -> lines
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}
