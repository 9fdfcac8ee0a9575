use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Index store configuration
    pub state: StateConfig,

    /// Query engine configuration
    #[serde(default)]
    pub search: SearchSettings,

    /// Indexing / rebuild configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        let config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: STAY_SEARCH_)
            .add_source(
                config::Environment::with_prefix("STAY_SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot work together
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.search.default_page_size == 0 || self.search.default_page_size > 100 {
            return Err(config::ConfigError::Message(
                "search.default_page_size must be within 1..=100".to_string(),
            ));
        }

        if !(self.search.price_tolerance > 0.0 && self.search.price_tolerance <= 10.0) {
            return Err(config::ConfigError::Message(
                "search.price_tolerance must be within (0, 10]".to_string(),
            ));
        }

        if self.search.radius_multiplier <= 1.0 {
            return Err(config::ConfigError::Message(
                "search.radius_multiplier must be greater than 1".to_string(),
            ));
        }

        if self.search.geo_cell_degrees <= 0.0 || self.search.geo_cell_degrees > 10.0 {
            return Err(config::ConfigError::Message(
                "search.geo_cell_degrees must be within (0, 10]".to_string(),
            ));
        }

        if self.indexing.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "indexing.max_attempts must be at least 1".to_string(),
            ));
        }

        let schedule = self.indexing.retry_schedule_total();
        let window = self.indexing.staleness_window();
        if schedule > window {
            return Err(config::ConfigError::Message(format!(
                "indexing retry schedule ({}ms) exceeds the staleness window ({}ms)",
                schedule.as_millis(),
                window.as_millis()
            )));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            state: StateConfig::default(),
            search: SearchSettings::default(),
            indexing: IndexingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Index store backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,

    /// Redis connection string
    pub redis_url: Option<String>,

    /// Prefix applied to every index key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Memory,
            path: None,
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Memory,
    Sled,
    Redis,
}

/// Query engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Page size used when the request does not set one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Result count below which relaxation kicks in
    #[serde(default = "default_min_results")]
    pub min_results: usize,

    /// Fraction by which a price range is widened on each side when relaxed
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: f64,

    /// Factor applied to the search radius when relaxed
    #[serde(default = "default_radius_multiplier")]
    pub radius_multiplier: f64,

    /// Default query timeout (milliseconds)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Maximum cached search responses
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Cached response lifetime (seconds)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Edge length of a geo grid cell in degrees
    #[serde(default = "default_geo_cell_degrees")]
    pub geo_cell_degrees: f64,
}

impl SearchSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            min_results: default_min_results(),
            price_tolerance: default_price_tolerance(),
            radius_multiplier: default_radius_multiplier(),
            query_timeout_ms: default_query_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl(),
            geo_cell_degrees: default_geo_cell_degrees(),
        }
    }
}

/// Retry backoff strategy for index writes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Lookahead horizon for price ranges and availability summaries (days)
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    /// Attempts per index write, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// How the delay grows between attempts
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Longest acceptable lag between a catalog change and the index (seconds)
    #[serde(default = "default_staleness_window")]
    pub staleness_window_secs: u64,

    /// Units rebuilt concurrently during a full rebuild
    #[serde(default = "default_rebuild_concurrency")]
    pub rebuild_concurrency: usize,

    /// Period of the background stale-unit sweep (seconds, 0 disables it)
    #[serde(default = "default_self_heal_interval")]
    pub self_heal_interval_secs: u64,

    /// JSON seed file for the catalog
    pub catalog_path: Option<PathBuf>,
}

impl IndexingConfig {
    /// Delay slept after the given failed attempt (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms;
        let millis = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential => {
                base.saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
            }
        };
        Duration::from_millis(millis)
    }

    /// Total time spent sleeping if every attempt fails
    pub fn retry_schedule_total(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .sum()
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff: BackoffStrategy::default(),
            staleness_window_secs: default_staleness_window(),
            rebuild_concurrency: default_rebuild_concurrency(),
            self_heal_interval_secs: default_self_heal_interval(),
            catalog_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_key_prefix() -> String {
    "ssi".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_min_results() -> usize {
    1
}

fn default_price_tolerance() -> f64 {
    0.5
}

fn default_radius_multiplier() -> f64 {
    2.0
}

fn default_query_timeout_ms() -> u64 {
    2000
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_geo_cell_degrees() -> f64 {
    0.5
}

fn default_horizon_days() -> u32 {
    365
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_staleness_window() -> u64 {
    30
}

fn default_rebuild_concurrency() -> usize {
    8
}

fn default_self_heal_interval() -> u64 {
    900 // 15 minutes
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
