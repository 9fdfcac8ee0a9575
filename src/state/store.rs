use crate::error::Result;
use crate::index::IndexDocument;
use crate::state::{
    tally, ApplyOutcome, IndexStore, LatencyTracker, StoreStats, WriteBatch,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

/// Total order over scores so they can key a B-tree
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(previous) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(previous), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn remove(&mut self, member: &str) {
        if let Some(previous) = self.scores.remove(member) {
            self.ordered.remove(&(Score(previous), member.to_string()));
        }
    }

    fn range(&self, min: f64, max: f64) -> BTreeSet<String> {
        self.ordered
            .range((Bound::Included((Score(min), String::new())), Bound::Unbounded))
            .take_while(|(score, _)| score.0 <= max)
            .map(|(_, member)| member.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<String, IndexDocument>,
    sets: HashMap<String, BTreeSet<String>>,
    sorted: HashMap<String, SortedSet>,
}

/// In-memory index store (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    latency: Arc<LatencyTracker>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn get_document(&self, key: &str) -> Result<Option<IndexDocument>> {
        let started = Instant::now();
        let document = self.inner.read().documents.get(key).cloned();
        self.latency.record_read(started);
        Ok(document)
    }

    async fn get_documents(&self, keys: &[String]) -> Result<Vec<Option<IndexDocument>>> {
        let started = Instant::now();
        let documents = {
            let inner = self.inner.read();
            keys.iter()
                .map(|key| inner.documents.get(key).cloned())
                .collect()
        };
        self.latency.record_read(started);
        Ok(documents)
    }

    async fn members(&self, set: &str) -> Result<BTreeSet<String>> {
        Ok(self.inner.read().sets.get(set).cloned().unwrap_or_default())
    }

    async fn intersect(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        let started = Instant::now();
        let inner = self.inner.read();
        let mut resolved: Vec<&BTreeSet<String>> = Vec::with_capacity(sets.len());
        for name in sets {
            match inner.sets.get(name) {
                Some(set) => resolved.push(set),
                None => return Ok(BTreeSet::new()),
            }
        }
        resolved.sort_by_key(|set| set.len());

        let result = match resolved.split_first() {
            Some((smallest, rest)) => smallest
                .iter()
                .filter(|member| rest.iter().all(|set| set.contains(*member)))
                .cloned()
                .collect(),
            None => BTreeSet::new(),
        };
        self.latency.record_read(started);
        Ok(result)
    }

    async fn union(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        let inner = self.inner.read();
        Ok(sets
            .iter()
            .filter_map(|name| inner.sets.get(name))
            .flat_map(|set| set.iter().cloned())
            .collect())
    }

    async fn cardinality(&self, set: &str) -> Result<usize> {
        Ok(self.inner.read().sets.get(set).map_or(0, BTreeSet::len))
    }

    async fn range_by_score(&self, zset: &str, min: f64, max: f64) -> Result<BTreeSet<String>> {
        let started = Instant::now();
        let result = self
            .inner
            .read()
            .sorted
            .get(zset)
            .map(|sorted| sorted.range(min, max))
            .unwrap_or_default();
        self.latency.record_read(started);
        Ok(result)
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<ApplyOutcome> {
        let started = Instant::now();
        let mut inner = self.inner.write();

        let current = inner
            .documents
            .get(&batch.key)
            .map(|doc| doc.metadata.version);
        if current != batch.expected_version {
            return Ok(ApplyOutcome::Conflict { current });
        }

        let member = batch.key.as_str();
        for name in &batch.set_removes {
            let now_empty = match inner.sets.get_mut(name) {
                Some(set) => {
                    set.remove(member);
                    set.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.sets.remove(name);
            }
        }
        for name in &batch.set_adds {
            inner
                .sets
                .entry(name.clone())
                .or_default()
                .insert(member.to_string());
        }
        for name in &batch.score_removes {
            let now_empty = match inner.sorted.get_mut(name) {
                Some(sorted) => {
                    sorted.remove(member);
                    sorted.scores.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.sorted.remove(name);
            }
        }
        for (name, score) in &batch.score_adds {
            inner
                .sorted
                .entry(name.clone())
                .or_default()
                .insert(member, *score);
        }

        match &batch.document {
            Some(document) => {
                inner.documents.insert(batch.key.clone(), document.clone());
            }
            None => {
                inner.documents.remove(&batch.key);
            }
        }
        drop(inner);

        self.latency.record_write(started);
        tracing::debug!(key = %batch.key, "Batch applied");
        Ok(ApplyOutcome::Applied)
    }

    async fn document_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.inner.read().documents.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.sets.shrink_to_fit();
        inner.sorted.shrink_to_fit();
        inner.documents.shrink_to_fit();
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read();
        let mut dimensions = BTreeMap::new();
        for (name, set) in &inner.sets {
            tally(&mut dimensions, name, set.len());
        }
        for (name, sorted) in &inner.sorted {
            tally(&mut dimensions, name, sorted.scores.len());
        }
        Ok(StoreStats {
            backend: self.backend().to_string(),
            documents: inner.documents.len(),
            dimensions,
            latency: self.latency.snapshot(),
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(key: &str, expected: Option<u64>) -> WriteBatch {
        WriteBatch {
            key: key.to_string(),
            expected_version: expected,
            document: None,
            set_adds: vec!["city:aden".to_string(), "all".to_string()],
            score_adds: vec![("price_min".to_string(), 100.0)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_apply_maintains_sets_and_scores() {
        let store = InMemoryStore::new();
        assert_eq!(store.apply(&batch("a", None)).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.apply(&batch("b", None)).await.unwrap(), ApplyOutcome::Applied);

        let both = store
            .intersect(&["city:aden".to_string(), "all".to_string()])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(store.range_by_score("price_min", 50.0, 150.0).await.unwrap().len(), 2);
        assert!(store.range_by_score("price_min", 101.0, f64::INFINITY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_intersect_with_missing_set_is_empty() {
        let store = InMemoryStore::new();
        store.apply(&batch("a", None)).await.unwrap();
        let result = store
            .intersect(&["all".to_string(), "city:sanaa".to_string()])
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_a_conflict() {
        let store = InMemoryStore::new();
        let outcome = store.apply(&batch("a", Some(3))).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Conflict { current: None });
        assert_eq!(store.cardinality("all").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_removes_drop_empty_structures() {
        let store = InMemoryStore::new();
        store.apply(&batch("a", None)).await.unwrap();
        let removal = WriteBatch {
            key: "a".to_string(),
            expected_version: None,
            set_removes: vec!["city:aden".to_string(), "all".to_string()],
            score_removes: vec!["price_min".to_string()],
            ..Default::default()
        };
        store.apply(&removal).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert!(stats.dimensions.is_empty());
        assert_eq!(stats.documents, 0);
    }
}
