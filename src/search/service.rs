//! Main search service implementation

use crate::config::SearchSettings;
use crate::index::SecondaryIndexManager;
use crate::metrics::{SEARCH_CACHE_TOTAL, SEARCH_DURATION_SECONDS, SEARCH_REQUESTS_TOTAL};
use crate::search::aggregator::{PageOptions, ResultAggregator, SearchItem};
use crate::search::criteria::SearchCriteria;
use crate::search::error::{SearchError, SearchResult};
use crate::search::planner::{QueryPlanner, StageCount};
use crate::search::relaxation::{RelaxationEngine, RelaxationLevel};
use crate::search::request::SearchRequest;
use crate::state::{AppCache, CacheStats};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Search response with results and relaxation metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Units, or properties when grouping was requested
    pub items: Vec<SearchItem>,

    /// Number of items before pagination
    pub total_count: usize,

    pub total_pages: u32,
    pub page: u32,
    pub page_size: u32,

    /// Level at which the search stopped
    pub relaxation_level: RelaxationLevel,

    /// Categories that were actually loosened, in order
    pub relaxed_filters: Vec<String>,

    /// Every level visited, a prefix of the fixed relaxation order
    pub relaxation_trace: Vec<RelaxationLevel>,

    /// Criteria the returned items were found with
    pub actual_criteria: SearchCriteria,

    /// Candidates after each planner stage of the final run
    pub stage_counts: Vec<StageCount>,

    pub user_message: Option<String>,
    pub suggested_actions: Vec<String>,

    /// Search execution time in milliseconds
    pub search_time_ms: u64,
}

/// Main search service
pub struct SearchService {
    index: Arc<SecondaryIndexManager>,
    engine: RelaxationEngine,
    aggregator: ResultAggregator,
    settings: SearchSettings,
    cache: AppCache<String, SearchResponse>,
}

impl SearchService {
    pub fn new(index: Arc<SecondaryIndexManager>, settings: SearchSettings) -> Self {
        let engine = RelaxationEngine::new(
            QueryPlanner::new(index.clone()),
            settings.price_tolerance,
            settings.radius_multiplier,
        );
        let cache = AppCache::new(
            settings.cache_capacity,
            Duration::from_secs(settings.cache_ttl_secs),
        );

        Self {
            index,
            engine,
            aggregator: ResultAggregator::new(),
            settings,
            cache,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Search for units
    pub async fn search(&self, request: SearchRequest) -> SearchResult<SearchResponse> {
        let start_time = Instant::now();
        let result = self.run(&request, start_time).await;

        let outcome = match &result {
            Ok(response) => {
                SEARCH_REQUESTS_TOTAL
                    .with_label_values(&[response.relaxation_level.as_ref()])
                    .inc();
                info!(
                    total = response.total_count,
                    level = %response.relaxation_level,
                    elapsed_ms = response.search_time_ms,
                    "Search completed"
                );
                "ok"
            }
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "Search failed");
                err.kind()
            }
        };
        SEARCH_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(start_time.elapsed().as_secs_f64());

        result
    }

    async fn run(&self, request: &SearchRequest, start_time: Instant) -> SearchResult<SearchResponse> {
        request.check()?;
        let criteria = SearchCriteria::from_request(request)?;

        let cache_key = serde_json::to_string(request)
            .ok()
            .map(|json| format!("{}:{}", self.index.generation(), json));
        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key).await {
                SEARCH_CACHE_TOTAL.with_label_values(&["hit"]).inc();
                debug!("Search served from cache");
                return Ok(cached);
            }
            SEARCH_CACHE_TOTAL.with_label_values(&["miss"]).inc();
        }

        let page_size = request.page_size_or(self.settings.default_page_size);
        let min_results = request.min_results.unwrap_or(self.settings.min_results);
        let needed = (request.page as usize).saturating_mul(page_size as usize);
        let threshold = min_results.min(needed);

        let timeout_ms = request.timeout_ms.unwrap_or(self.settings.query_timeout_ms);
        // Registry lookups hit the store too, so they share the deadline
        let relaxed = tokio::time::timeout(Duration::from_millis(timeout_ms), async {
            self.check_dynamic_fields(&criteria).await?;
            let outcome = self
                .engine
                .search(&criteria, threshold, request.enable_relaxation)
                .await?;
            Ok::<_, SearchError>(outcome)
        })
        .await
        .map_err(|_| SearchError::Timeout(timeout_ms))??;

        let page = self.aggregator.aggregate(
            &relaxed.documents,
            &relaxed.actual_criteria,
            &criteria,
            PageOptions {
                sort_by: request.sort_by,
                page: request.page,
                page_size,
                group_by_property: request.group_by_property,
                max_units_per_property: request.max_units_per_property,
            },
            Utc::now().date_naive(),
        );

        let response = SearchResponse {
            items: page.items,
            total_count: page.total_count,
            total_pages: page.total_pages,
            page: request.page,
            page_size,
            relaxation_level: relaxed.level,
            relaxed_filters: relaxed.relaxed_filters,
            relaxation_trace: relaxed.trace,
            actual_criteria: relaxed.actual_criteria,
            stage_counts: relaxed.stage_counts,
            user_message: relaxed.user_message,
            suggested_actions: relaxed.suggested_actions,
            search_time_ms: start_time.elapsed().as_millis() as u64,
        };

        if let Some(key) = cache_key {
            self.cache.insert(key, response.clone()).await;
        }

        Ok(response)
    }

    /// Dynamic filters must name a registered searchable field of a compatible type
    async fn check_dynamic_fields(&self, criteria: &SearchCriteria) -> SearchResult<()> {
        for (name, filter) in &criteria.dynamic_filters {
            match self.index.registered_field(name).await? {
                Some(field_type) => filter.check_type(name, field_type)?,
                None => return Err(SearchError::UnknownField(name.clone())),
            }
        }
        Ok(())
    }
}
