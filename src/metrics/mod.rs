//! Prometheus metrics for the search index.
//!
//! Counters and histograms are process-global; [`init_metrics`] registers
//! them once at startup and [`gather_metrics`] renders the text exposition
//! format for the `/metrics` endpoint.
//!
//! ```no_run
//! use stay_search_index::metrics::SEARCH_REQUESTS_TOTAL;
//!
//! SEARCH_REQUESTS_TOTAL.with_label_values(&["exact"]).inc();
//! ```

mod middleware;

pub use middleware::track_http_metrics;

use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "stay_search";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Search Metrics
    // ============================================================================

    /// Labels: relaxation_level
    pub static ref SEARCH_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("search_requests_total", "Searches answered, by final relaxation level")
            .namespace(NAMESPACE),
        &["relaxation_level"]
    ).expect("Failed to create SEARCH_REQUESTS_TOTAL metric");

    /// Labels: outcome (ok, validation, timeout, store)
    pub static ref SEARCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("search_duration_seconds", "Search latency in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]),
        &["outcome"]
    ).expect("Failed to create SEARCH_DURATION_SECONDS metric");

    /// Labels: stage
    pub static ref SEARCH_STAGE_CANDIDATES: HistogramVec = HistogramVec::new(
        HistogramOpts::new("search_stage_candidates", "Candidates surviving each planner stage")
            .namespace(NAMESPACE)
            .buckets(prometheus::exponential_buckets(1.0, 4.0, 9).unwrap_or_default()),
        &["stage"]
    ).expect("Failed to create SEARCH_STAGE_CANDIDATES metric");

    /// Labels: result (hit, miss)
    pub static ref SEARCH_CACHE_TOTAL: CounterVec = CounterVec::new(
        Opts::new("search_cache_total", "Search cache lookups")
            .namespace(NAMESPACE),
        &["result"]
    ).expect("Failed to create SEARCH_CACHE_TOTAL metric");

    // ============================================================================
    // Indexing Metrics
    // ============================================================================

    /// Labels: outcome (written, unchanged, deleted, conflict, build_error)
    pub static ref INDEX_WRITES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("index_writes_total", "Index document writes by outcome")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create INDEX_WRITES_TOTAL metric");

    /// Labels: event
    pub static ref INDEX_WRITE_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "index_write_failures_total",
            "Index updates that exhausted their retries; the index is inconsistent until rebuilt"
        )
        .namespace(NAMESPACE),
        &["event"]
    ).expect("Failed to create INDEX_WRITE_FAILURES_TOTAL metric");

    /// Labels: result (indexed, skipped, failed, removed)
    pub static ref REBUILD_UNITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("rebuild_units_total", "Units processed by rebuild jobs")
            .namespace(NAMESPACE),
        &["result"]
    ).expect("Failed to create REBUILD_UNITS_TOTAL metric");

    /// Units currently recorded as failed
    pub static ref FAILED_UNITS: Gauge = Gauge::with_opts(
        Opts::new("failed_units", "Units whose last index update failed")
            .namespace(NAMESPACE)
    ).expect("Failed to create FAILED_UNITS metric");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Application build information")
            .namespace(NAMESPACE),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Register every metric with [`PROMETHEUS_REGISTRY`].
///
/// # Errors
/// Fails if called more than once per process.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_STAGE_CANDIDATES.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(SEARCH_CACHE_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(INDEX_WRITES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(INDEX_WRITE_FAILURES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(REBUILD_UNITS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(FAILED_UNITS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;
    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
