//! Unit search over the secondary index
//!
//! This module answers stay searches against the denormalized unit index:
//!
//! - **Staged Planning**: cheap set intersections first, document checks last
//! - **Date Availability**: half-open stays checked against merged calendar periods
//! - **Dynamic Fields**: typed filters on owner-defined attributes
//! - **Geo Radius**: grid-cell pre-filter refined by great-circle distance
//! - **Progressive Relaxation**: constraints loosened in a fixed order when too few units match
//! - **Grouping**: units rolled up per property, then paginated
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           SearchService                          │
//! ├─────────────────────────────────────────────────┤
//! │  - validation     - result cache (generation)   │
//! │  - timeout        - metrics                     │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │           RelaxationEngine                       │
//! ├─────────────────────────────────────────────────┤
//! │  Exact → RelaxDates → ... → Exhausted            │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │           QueryPlanner                           │
//! ├─────────────────────────────────────────────────┤
//! │  discrete → dates → ranges → amenities →         │
//! │  dynamic fields → geo → text                     │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │           ResultAggregator                       │
//! ├─────────────────────────────────────────────────┤
//! │  pricing, distance, sorting, grouping, paging    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stay_search_index::config::SearchSettings;
//! use stay_search_index::index::SecondaryIndexManager;
//! use stay_search_index::search::{SearchRequest, SearchService};
//! use stay_search_index::state::create_in_memory_store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let index = Arc::new(SecondaryIndexManager::new(create_in_memory_store(), 0.5));
//!     let search = SearchService::new(index, SearchSettings::default());
//!
//!     let request = SearchRequest {
//!         city: Some("Aden".to_string()),
//!         adults: Some(2),
//!         ..Default::default()
//!     };
//!
//!     let response = search.search(request).await?;
//!     println!("Found {} units", response.total_count);
//!
//!     Ok(())
//! }
//! ```

mod aggregator;
mod criteria;
mod error;
mod planner;
mod relaxation;
mod request;
mod service;

pub use aggregator::{
    CardField, PageOptions, PropertyGroup, ResultAggregator, ResultPage, SearchItem, UnitResult,
};
pub use criteria::{DynamicFilter, GeoFilter, PriceBand, SearchCriteria, StayDates};
pub use error::{SearchError, SearchResult};
pub use planner::{PlanOutcome, QueryPlanner, Stage, StageCount};
pub use relaxation::{RelaxationEngine, RelaxationLevel, RelaxationOutcome};
pub use request::{SearchRequest, SortBy, MAX_PAGE_SIZE, MAX_RADIUS_KM};
pub use service::{SearchResponse, SearchService};
