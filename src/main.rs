use stay_search_index::{
    api::{build_router, AppState},
    catalog::{CatalogSource, InMemoryCatalog},
    config::Config,
    index::{IndexingService, SecondaryIndexManager},
    search::SearchService,
    state::create_store,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration before logging so the level can come from it
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "stay_search_index={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting stay search index v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = stay_search_index::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Initialize storage backend
    tracing::info!("Index store backend: {:?}", config.state.backend);
    let store = create_store(&config.state).await?;
    let index = Arc::new(SecondaryIndexManager::new(
        store,
        config.search.geo_cell_degrees,
    ));

    // Catalog
    let catalog = match &config.indexing.catalog_path {
        Some(path) => {
            let catalog = InMemoryCatalog::load_json(path).await?;
            tracing::info!(path = %path.display(), units = catalog.unit_count(), "Catalog seed loaded");
            catalog
        }
        None => {
            tracing::warn!("No catalog seed configured; starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };
    let catalog: Arc<dyn CatalogSource> = Arc::new(catalog);

    let indexing = Arc::new(IndexingService::new(
        catalog,
        index.clone(),
        config.indexing.clone(),
    ));
    let search = Arc::new(SearchService::new(index, config.search.clone()));

    // Bring the index in line with the catalog, then keep it there
    let job_id = indexing.start_full_rebuild();
    tracing::info!(job_id = %job_id, "Initial rebuild scheduled");
    if indexing.spawn_self_heal().is_some() {
        tracing::info!(
            interval_secs = config.indexing.self_heal_interval_secs,
            "Self-heal sweep started"
        );
    }

    let app = build_router(AppState::new(search, indexing)).layer(TimeoutLayer::new(
        Duration::from_secs(config.server.request_timeout_secs),
    ));

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Search: POST http://{}/v1/search", http_addr);
    tracing::info!("   Metrics: http://{}/metrics", http_addr);

    axum::serve(http_listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
