pub mod store;
pub mod cache;
pub mod sled_store;
pub mod redis_store;
pub mod factory;

pub use store::*;
pub use cache::*;
pub use sled_store::SledStore;
pub use redis_store::RedisStore;
pub use factory::{create_in_memory_store, create_store};

use crate::error::Result;
use crate::index::IndexDocument;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Storage primitives behind the search index
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Get a document by key
    async fn get_document(&self, key: &str) -> Result<Option<IndexDocument>>;

    /// Get several documents; the result is aligned with `keys`
    async fn get_documents(&self, keys: &[String]) -> Result<Vec<Option<IndexDocument>>>;

    /// Members of a set
    async fn members(&self, set: &str) -> Result<BTreeSet<String>>;

    /// Intersection of several sets; an empty list yields an empty result
    async fn intersect(&self, sets: &[String]) -> Result<BTreeSet<String>>;

    /// Members of any of the given sets
    async fn union(&self, sets: &[String]) -> Result<BTreeSet<String>>;

    /// Number of members in a set
    async fn cardinality(&self, set: &str) -> Result<usize>;

    /// Members of a sorted set with `min <= score <= max`
    async fn range_by_score(&self, zset: &str, min: f64, max: f64) -> Result<BTreeSet<String>>;

    /// Apply a batch atomically if the stored version still matches
    async fn apply(&self, batch: &WriteBatch) -> Result<ApplyOutcome>;

    /// Keys of every stored document
    async fn document_keys(&self) -> Result<Vec<String>>;

    /// Persist pending writes and compact where the backend supports it
    async fn flush(&self) -> Result<()>;

    /// Document count and per-dimension structure sizes
    async fn stats(&self) -> Result<StoreStats>;

    /// Backend name for diagnostics
    fn backend(&self) -> &'static str;
}

/// All changes belonging to one document write or delete.
///
/// Every set and sorted-set change uses the document key as member.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub key: String,
    /// Version the writer read; `None` means the document must not exist
    pub expected_version: Option<u64>,
    /// Replacement document; `None` deletes
    pub document: Option<IndexDocument>,
    pub set_removes: Vec<String>,
    pub set_adds: Vec<String>,
    pub score_removes: Vec<String>,
    pub score_adds: Vec<(String, f64)>,
}

impl WriteBatch {
    pub fn new_version(&self) -> Option<u64> {
        self.document.as_ref().map(|doc| doc.metadata.version)
    }
}

/// Result of a conditional batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Another writer got there first; nothing was written
    Conflict { current: Option<u64> },
}

/// Size of one index dimension
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DimensionSize {
    /// Distinct structures, e.g. one set per city
    pub structures: usize,
    /// Memberships across those structures
    pub entries: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencyStats {
    pub reads: u64,
    pub writes: u64,
    pub avg_read_ms: f64,
    pub avg_write_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreStats {
    pub backend: String,
    pub documents: usize,
    pub dimensions: BTreeMap<String, DimensionSize>,
    pub latency: LatencyStats,
}

/// Running read/write latency totals shared by the backends
#[derive(Debug, Default)]
pub struct LatencyTracker {
    reads: AtomicU64,
    read_micros: AtomicU64,
    writes: AtomicU64,
    write_micros: AtomicU64,
}

impl LatencyTracker {
    pub fn record_read(&self, started: Instant) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.read_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, started: Instant) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencyStats {
        let reads = self.reads.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let avg = |micros: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                micros as f64 / count as f64 / 1000.0
            }
        };
        LatencyStats {
            reads,
            writes,
            avg_read_ms: avg(self.read_micros.load(Ordering::Relaxed), reads),
            avg_write_ms: avg(self.write_micros.load(Ordering::Relaxed), writes),
        }
    }
}

/// Fold a structure name and its size into per-dimension totals
pub(crate) fn tally(dimensions: &mut BTreeMap<String, DimensionSize>, name: &str, entries: usize) {
    let size = dimensions
        .entry(crate::index::keys::dimension(name).to_string())
        .or_default();
    size.structures += 1;
    size.entries += entries;
}
