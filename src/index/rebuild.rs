//! Incremental reindexing, full rebuilds and self-healing.

use crate::catalog::{CatalogSource, UnitRef};
use crate::config::IndexingConfig;
use crate::error::{AppError, Result};
use crate::index::builder::DocumentBuilder;
use crate::index::document::IndexDocument;
use crate::index::secondary::{SecondaryIndexManager, UpsertOutcome};
use crate::metrics::{FAILED_UNITS, INDEX_WRITES_TOTAL, INDEX_WRITE_FAILURES_TOTAL, REBUILD_UNITS_TOTAL};
use crate::models::{EventAction, IndexEvent};
use crate::state::StoreStats;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Result of reindexing one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReindexOutcome {
    Indexed { key: String, version: u64, changed: bool },
    /// The unit is inactive or gone and its document was deleted
    Removed { key: String },
    /// Nothing to index and nothing to delete
    Absent { key: String },
    /// The snapshot could not be turned into a document; any old document was deleted
    BuildFailed { key: String, reason: String },
}

/// A unit whose last index update failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedUnit {
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Outcome of handling one event
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventReport {
    pub event: String,
    pub outcomes: Vec<ReindexOutcome>,
    pub failed_units: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// Progress of a full rebuild
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebuildJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_units: usize,
    pub processed: usize,
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
    pub orphans_removed: usize,
    pub error: Option<String>,
}

impl RebuildJob {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            total_units: 0,
            processed: 0,
            written: 0,
            unchanged: 0,
            removed: 0,
            failed: 0,
            orphans_removed: 0,
            error: None,
        }
    }

    fn record(&mut self, outcome: &std::result::Result<ReindexOutcome, AppError>) {
        self.processed += 1;
        match outcome {
            Ok(ReindexOutcome::Indexed { changed: true, .. }) => self.written += 1,
            Ok(ReindexOutcome::Indexed { changed: false, .. }) => self.unchanged += 1,
            Ok(ReindexOutcome::Removed { .. }) | Ok(ReindexOutcome::Absent { .. }) => {
                self.removed += 1
            }
            Ok(ReindexOutcome::BuildFailed { .. }) | Err(_) => self.failed += 1,
        }
    }
}

/// A unit whose document lags the catalog beyond the staleness window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaleUnit {
    pub property_id: Uuid,
    pub unit_id: Uuid,
    pub catalog_updated_at: DateTime<Utc>,
    /// `None` when the unit has no document at all
    pub indexed_updated_at: Option<DateTime<Utc>>,
}

/// Index-side statistics for the admin surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStats {
    pub store: StoreStats,
    pub generation: u64,
    pub failed_units: Vec<FailedUnit>,
    pub last_rebuild: Option<RebuildJob>,
}

/// Finished rebuild jobs kept for status queries
const RETAINED_JOBS: usize = 32;

/// Keeps the index in step with the catalog
pub struct IndexingService {
    catalog: Arc<dyn CatalogSource>,
    index: Arc<SecondaryIndexManager>,
    builder: DocumentBuilder,
    config: IndexingConfig,
    jobs: DashMap<Uuid, RebuildJob>,
    /// Serializes the running-job check with the insert of a new job
    rebuild_start: Mutex<()>,
    failed_units: DashMap<Uuid, FailedUnit>,
    last_rebuild: RwLock<Option<RebuildJob>>,
}

impl IndexingService {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        index: Arc<SecondaryIndexManager>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            catalog,
            index,
            builder: DocumentBuilder::new(config.horizon_days),
            config,
            jobs: DashMap::new(),
            rebuild_start: Mutex::new(()),
            failed_units: DashMap::new(),
            last_rebuild: RwLock::new(None),
        }
    }

    pub fn index(&self) -> &Arc<SecondaryIndexManager> {
        &self.index
    }

    /// Rebuild one unit's document from a fresh snapshot (single attempt)
    pub async fn reindex_unit(&self, property_id: Uuid, unit_id: Uuid) -> Result<ReindexOutcome> {
        let key = IndexDocument::key_for(property_id, unit_id);
        let snapshot = self.catalog.load_snapshot(&unit_id).await?;

        let snapshot = match snapshot {
            Some(snapshot) if snapshot.unit.is_active => snapshot,
            _ => {
                let removed = self.index.delete(&key).await?;
                self.clear_failure(&unit_id);
                return Ok(if removed {
                    ReindexOutcome::Removed { key }
                } else {
                    ReindexOutcome::Absent { key }
                });
            }
        };

        // A unit moved to another property leaves its old document behind
        if snapshot.unit.property_id != property_id {
            self.index.delete(&key).await?;
        }

        match self.builder.build(&snapshot, Utc::now().date_naive(), Utc::now()) {
            Ok(document) => {
                let key = document.key.clone();
                let outcome = self.index.upsert(document).await?;
                self.clear_failure(&unit_id);
                Ok(ReindexOutcome::Indexed {
                    key,
                    version: outcome.version(),
                    changed: matches!(outcome, UpsertOutcome::Written { .. }),
                })
            }
            Err(err) => {
                let key = IndexDocument::key_for(snapshot.unit.property_id, unit_id);
                self.index.delete(&key).await?;
                INDEX_WRITES_TOTAL.with_label_values(&["build_error"]).inc();
                tracing::warn!(
                    property_id = %snapshot.unit.property_id,
                    unit_id = %unit_id,
                    error = %err,
                    "Unit cannot be indexed until its catalog data is fixed"
                );
                self.record_failure(snapshot.unit.property_id, unit_id, err.to_string(), 1);
                Ok(ReindexOutcome::BuildFailed {
                    key,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Delete a unit's document regardless of the catalog
    pub async fn remove_unit(&self, property_id: Uuid, unit_id: Uuid) -> Result<ReindexOutcome> {
        let key = IndexDocument::key_for(property_id, unit_id);
        let removed = self.index.delete(&key).await?;
        self.clear_failure(&unit_id);
        Ok(if removed {
            ReindexOutcome::Removed { key }
        } else {
            ReindexOutcome::Absent { key }
        })
    }

    /// Run `operation` with bounded retries and backoff
    async fn with_retries<T, F, Fut>(&self, mut operation: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let delay = self.config.backoff_delay(attempt);
                    tracing::debug!(attempt, ?delay, error = %err, "Index update failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return (Err(err), attempt),
            }
        }
    }

    /// Reindex (or remove) with retries; terminal failures are recorded, not returned
    async fn apply_with_retries(
        &self,
        property_id: Uuid,
        unit_id: Uuid,
        action: EventAction,
        label: &str,
    ) -> std::result::Result<ReindexOutcome, AppError> {
        let (result, attempts) = self
            .with_retries(|| async move {
                match action {
                    EventAction::Reindex => self.reindex_unit(property_id, unit_id).await,
                    EventAction::Remove => self.remove_unit(property_id, unit_id).await,
                }
            })
            .await;

        if let Err(err) = &result {
            INDEX_WRITE_FAILURES_TOTAL.with_label_values(&[label]).inc();
            tracing::error!(
                property_id = %property_id,
                unit_id = %unit_id,
                attempts,
                error = %err,
                "CRITICAL: index update failed after all retries; index is inconsistent until the unit is rebuilt"
            );
            self.record_failure(property_id, unit_id, err.to_string(), attempts);
        }
        result
    }

    /// Translate an entity-change event into targeted index updates
    pub async fn handle_event(&self, event: &IndexEvent) -> Result<EventReport> {
        let property_id = event.property_id();
        let label = event.to_string();
        let units: Vec<Uuid> = match event.unit_id() {
            Some(unit_id) => vec![unit_id],
            None => {
                let mut ids: BTreeSet<Uuid> = self
                    .catalog
                    .units_of_property(&property_id)
                    .await?
                    .into_iter()
                    .collect();
                // Documents of units the catalog no longer lists
                for key in self.index.property_documents(&property_id).await? {
                    if let Some((_, unit_id)) = IndexDocument::parse_key(&key) {
                        ids.insert(unit_id);
                    }
                }
                ids.into_iter().collect()
            }
        };

        tracing::info!(event = %label, property_id = %property_id, units = units.len(), "Handling index event");

        let mut report = EventReport {
            event: label.clone(),
            ..Default::default()
        };
        for unit_id in units {
            match self
                .apply_with_retries(property_id, unit_id, event.action(), &label)
                .await
            {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(_) => report.failed_units.push(unit_id),
            }
        }
        Ok(report)
    }

    /// Start a background rebuild of every unit; returns the running job if one exists
    pub fn start_full_rebuild(self: &Arc<Self>) -> Uuid {
        let _guard = self.rebuild_start.lock();
        let running = self
            .jobs
            .iter()
            .find(|job| job.status == JobStatus::Running)
            .map(|job| job.id);
        if let Some(job_id) = running {
            tracing::info!(job_id = %job_id, "Full rebuild already running");
            return job_id;
        }

        let job_id = Uuid::new_v4();
        self.jobs.insert(job_id, RebuildJob::new(job_id));

        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.rebuild_all(job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "Full rebuild failed");
            }
        });

        job_id
    }

    pub fn job(&self, job_id: &Uuid) -> Option<RebuildJob> {
        self.jobs.get(job_id).map(|job| job.clone())
    }

    /// Rebuild every active unit, then delete documents the catalog no longer backs
    pub async fn rebuild_all(&self, job_id: Uuid) -> Result<RebuildJob> {
        self.jobs
            .entry(job_id)
            .or_insert_with(|| RebuildJob::new(job_id));

        let result = self.run_rebuild(job_id).await;

        let mut job = self
            .jobs
            .get(&job_id)
            .map(|job| job.clone())
            .unwrap_or_else(|| RebuildJob::new(job_id));
        job.finished_at = Some(Utc::now());
        match &result {
            Ok(()) => job.status = JobStatus::Completed,
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        self.jobs.insert(job_id, job.clone());
        *self.last_rebuild.write() = Some(job.clone());
        self.prune_jobs();

        tracing::info!(
            job_id = %job_id,
            status = ?job.status,
            processed = job.processed,
            written = job.written,
            failed = job.failed,
            orphans_removed = job.orphans_removed,
            "Full rebuild finished"
        );
        result.map(|_| job)
    }

    /// Drop the oldest finished jobs beyond the retention limit
    fn prune_jobs(&self) {
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .jobs
            .iter()
            .filter_map(|job| job.finished_at.map(|at| (at, job.id)))
            .collect();
        if finished.len() <= RETAINED_JOBS {
            return;
        }
        finished.sort();
        let excess = finished.len() - RETAINED_JOBS;
        for (_, job_id) in finished.into_iter().take(excess) {
            self.jobs.remove(&job_id);
        }
    }

    /// Whether the catalog still backs a document the rebuild did not list.
    /// Units created after the listing was taken are kept.
    async fn still_backed(&self, key: &str) -> Result<bool> {
        let Some((property_id, unit_id)) = IndexDocument::parse_key(key) else {
            return Ok(false);
        };
        Ok(matches!(
            self.catalog.load_snapshot(&unit_id).await?,
            Some(snapshot) if snapshot.unit.is_active && snapshot.unit.property_id == property_id
        ))
    }

    async fn run_rebuild(&self, job_id: Uuid) -> Result<()> {
        let units = self.catalog.active_units().await?;
        let expected: BTreeSet<String> = units
            .iter()
            .map(|unit| IndexDocument::key_for(unit.property_id, unit.unit_id))
            .collect();
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.total_units = units.len();
        }
        tracing::info!(job_id = %job_id, units = units.len(), "Full rebuild started");

        let concurrency = self.config.rebuild_concurrency.max(1);
        let mut results = stream::iter(units)
            .map(|unit| async move {
                self.apply_with_retries(unit.property_id, unit.unit_id, EventAction::Reindex, "rebuild")
                    .await
            })
            .buffer_unordered(concurrency);

        while let Some(outcome) = results.next().await {
            let label = match &outcome {
                Ok(ReindexOutcome::Indexed { .. }) => "indexed",
                Ok(ReindexOutcome::Removed { .. }) | Ok(ReindexOutcome::Absent { .. }) => "skipped",
                Ok(ReindexOutcome::BuildFailed { .. }) | Err(_) => "failed",
            };
            REBUILD_UNITS_TOTAL.with_label_values(&[label]).inc();
            if let Some(mut job) = self.jobs.get_mut(&job_id) {
                job.record(&outcome);
            }
        }

        let mut orphans = 0;
        for key in self.index.store().document_keys().await? {
            if expected.contains(&key) || self.still_backed(&key).await? {
                continue;
            }
            if self.index.delete(&key).await? {
                orphans += 1;
            }
        }
        REBUILD_UNITS_TOTAL
            .with_label_values(&["removed"])
            .inc_by(orphans as f64);
        if let Some(mut job) = self.jobs.get_mut(&job_id) {
            job.orphans_removed = orphans;
        }
        Ok(())
    }

    /// Units whose document is missing or older than the catalog by more than
    /// the staleness window
    pub async fn find_stale_units(&self) -> Result<Vec<StaleUnit>> {
        let window = chrono::Duration::from_std(self.config.staleness_window())
            .map_err(|e| AppError::Configuration(format!("Invalid staleness window: {}", e)))?;
        let units = self.catalog.active_units().await?;
        let keys: Vec<String> = units
            .iter()
            .map(|unit| IndexDocument::key_for(unit.property_id, unit.unit_id))
            .collect();
        let documents = self.index.store().get_documents(&keys).await?;

        Ok(units
            .into_iter()
            .zip(documents)
            .filter_map(|(unit, document): (UnitRef, Option<IndexDocument>)| {
                let indexed = document.map(|doc| doc.metadata.last_updated);
                let stale = match indexed {
                    Some(indexed) => unit.updated_at - indexed > window,
                    None => true,
                };
                stale.then_some(StaleUnit {
                    property_id: unit.property_id,
                    unit_id: unit.unit_id,
                    catalog_updated_at: unit.updated_at,
                    indexed_updated_at: indexed,
                })
            })
            .collect())
    }

    /// Reindex stale and previously failed units; returns how many were retried
    pub async fn self_heal(&self) -> Result<usize> {
        let mut targets: BTreeSet<(Uuid, Uuid)> = self
            .find_stale_units()
            .await?
            .into_iter()
            .map(|stale| (stale.property_id, stale.unit_id))
            .collect();
        targets.extend(
            self.failed_units
                .iter()
                .map(|failed| (failed.property_id, failed.unit_id)),
        );

        if targets.is_empty() {
            return Ok(0);
        }
        tracing::info!(units = targets.len(), "Self-heal reindexing units");

        for (property_id, unit_id) in &targets {
            let _ = self
                .apply_with_retries(*property_id, *unit_id, EventAction::Reindex, "self_heal")
                .await;
        }
        Ok(targets.len())
    }

    /// Periodic self-heal; `None` when the interval is zero
    pub fn spawn_self_heal(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.self_heal_interval_secs == 0 {
            return None;
        }
        let period = Duration::from_secs(self.config.self_heal_interval_secs);
        let service = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = service.self_heal().await {
                    tracing::warn!(error = %e, "Self-heal sweep failed");
                }
            }
        }))
    }

    pub fn failed_units(&self) -> Vec<FailedUnit> {
        let mut failed: Vec<FailedUnit> = self.failed_units.iter().map(|f| f.clone()).collect();
        failed.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        failed
    }

    fn record_failure(&self, property_id: Uuid, unit_id: Uuid, reason: String, attempts: u32) {
        self.failed_units.insert(
            unit_id,
            FailedUnit {
                property_id,
                unit_id,
                reason,
                attempts,
                failed_at: Utc::now(),
            },
        );
        FAILED_UNITS.set(self.failed_units.len() as f64);
    }

    fn clear_failure(&self, unit_id: &Uuid) {
        if self.failed_units.remove(unit_id).is_some() {
            FAILED_UNITS.set(self.failed_units.len() as f64);
        }
    }

    pub async fn flush(&self) -> Result<()> {
        self.index.store().flush().await
    }

    pub async fn statistics(&self) -> Result<IndexingStats> {
        Ok(IndexingStats {
            store: self.index.store().stats().await?,
            generation: self.index.generation(),
            failed_units: self.failed_units(),
            last_rebuild: self.last_rebuild.read().clone(),
        })
    }
}
