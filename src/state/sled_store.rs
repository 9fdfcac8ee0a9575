use crate::error::{AppError, Result};
use crate::index::IndexDocument;
use crate::state::{tally, ApplyOutcome, IndexStore, LatencyTracker, StoreStats, WriteBatch};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Db;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const DOC: u8 = b'd';
const VERSION: u8 = b'v';
const SET: u8 = b's';
const SCORE: u8 = b'z';
const ORDERED: u8 = b'o';
const SEP: u8 = 0;

/// Persistent index store using Sled embedded database.
///
/// Everything lives in a single tree so one transaction covers a whole batch.
/// Key layout:
/// - `d\0{key}` document (bincode)
/// - `v\0{key}` version (u64, big endian)
/// - `s\0{set}\0{member}` set membership
/// - `z\0{zset}\0{member}` score of a member
/// - `o\0{zset}\0{sortable score}{member}` score order
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    tree: sled::Tree,
    latency: Arc<LatencyTracker>,
}

impl SledStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| AppError::Storage(format!("Failed to open Sled database: {}", e)))?;

        let tree = db
            .open_tree("index")
            .map_err(|e| AppError::Storage(format!("Failed to open index tree: {}", e)))?;

        tracing::info!("Initialized Sled store at {:?}", path.as_ref());

        Ok(Self {
            db: Arc::new(db),
            tree,
            latency: Arc::new(LatencyTracker::default()),
        })
    }

    fn key(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
        let mut key = vec![tag, SEP];
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                key.push(SEP);
            }
            key.extend_from_slice(part);
        }
        key
    }

    /// Prefix covering every entry of one set or sorted set
    fn structure_prefix(tag: u8, name: &str) -> Vec<u8> {
        let mut prefix = Self::key(tag, &[name.as_bytes()]);
        prefix.push(SEP);
        prefix
    }

    /// Big-endian bytes that sort the same way as the scores
    fn sortable(score: f64) -> [u8; 8] {
        let bits = score.to_bits();
        let flipped = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
        flipped.to_be_bytes()
    }

    fn ordered_key(zset: &str, score: f64, member: &str) -> Vec<u8> {
        let mut key = Self::structure_prefix(ORDERED, zset);
        key.extend_from_slice(&Self::sortable(score));
        key.extend_from_slice(member.as_bytes());
        key
    }

    fn serialize_document(document: &IndexDocument) -> Result<Vec<u8>> {
        bincode::serialize(document)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize document: {}", e)))
    }

    fn deserialize_document(bytes: &[u8]) -> Result<IndexDocument> {
        bincode::deserialize(bytes)
            .map_err(|e| AppError::Serialization(format!("Failed to deserialize document: {}", e)))
    }

    fn read_version(bytes: &[u8]) -> Option<u64> {
        bytes.try_into().ok().map(u64::from_be_bytes)
    }

    fn scan_members(&self, tag: u8, name: &str) -> Result<BTreeSet<String>> {
        let prefix = Self::structure_prefix(tag, name);
        let mut members = BTreeSet::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(|e| AppError::Storage(format!("Failed to scan set: {}", e)))?;
            members.insert(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }
        Ok(members)
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db
            .size_on_disk()
            .map_err(|e| AppError::Storage(format!("Failed to get database size: {}", e)))
    }
}

#[async_trait]
impl IndexStore for SledStore {
    async fn get_document(&self, key: &str) -> Result<Option<IndexDocument>> {
        let started = Instant::now();
        let result = self
            .tree
            .get(Self::key(DOC, &[key.as_bytes()]))
            .map_err(|e| AppError::Storage(format!("Failed to read document: {}", e)))?
            .map(|bytes| Self::deserialize_document(&bytes))
            .transpose();
        self.latency.record_read(started);
        result
    }

    async fn get_documents(&self, keys: &[String]) -> Result<Vec<Option<IndexDocument>>> {
        let started = Instant::now();
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            let document = self
                .tree
                .get(Self::key(DOC, &[key.as_bytes()]))
                .map_err(|e| AppError::Storage(format!("Failed to read document: {}", e)))?
                .map(|bytes| Self::deserialize_document(&bytes))
                .transpose()?;
            documents.push(document);
        }
        self.latency.record_read(started);
        Ok(documents)
    }

    async fn members(&self, set: &str) -> Result<BTreeSet<String>> {
        self.scan_members(SET, set)
    }

    async fn intersect(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        let started = Instant::now();
        let mut result: Option<BTreeSet<String>> = None;
        for name in sets {
            let members = self.scan_members(SET, name)?;
            let next = match result {
                Some(current) => current.intersection(&members).cloned().collect(),
                None => members,
            };
            if next.is_empty() {
                return Ok(next);
            }
            result = Some(next);
        }
        self.latency.record_read(started);
        Ok(result.unwrap_or_default())
    }

    async fn union(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        let mut result = BTreeSet::new();
        for name in sets {
            result.extend(self.scan_members(SET, name)?);
        }
        Ok(result)
    }

    async fn cardinality(&self, set: &str) -> Result<usize> {
        Ok(self.tree.scan_prefix(Self::structure_prefix(SET, set)).count())
    }

    async fn range_by_score(&self, zset: &str, min: f64, max: f64) -> Result<BTreeSet<String>> {
        let started = Instant::now();
        let prefix = Self::structure_prefix(ORDERED, zset);
        let mut lower = prefix.clone();
        lower.extend_from_slice(&Self::sortable(min));
        let mut upper = prefix.clone();
        upper.extend_from_slice(&Self::sortable(max));
        // Members are UTF-8 so 0xFF sorts after every member of the max score
        upper.push(0xFF);

        let mut members = BTreeSet::new();
        for entry in self.tree.range(lower..upper) {
            let (key, _) = entry.map_err(|e| AppError::Storage(format!("Failed to scan scores: {}", e)))?;
            let member = &key[prefix.len() + 8..];
            members.insert(String::from_utf8_lossy(member).into_owned());
        }
        self.latency.record_read(started);
        Ok(members)
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<ApplyOutcome> {
        let started = Instant::now();
        let document = batch
            .document
            .as_ref()
            .map(Self::serialize_document)
            .transpose()?;
        let member = batch.key.as_bytes();
        let doc_key = Self::key(DOC, &[member]);
        let version_key = Self::key(VERSION, &[member]);

        let outcome = self.tree.transaction(|tx| {
            let current = tx.get(&version_key)?.and_then(|bytes| Self::read_version(&bytes));
            if current != batch.expected_version {
                return Ok(ApplyOutcome::Conflict { current });
            }

            for name in &batch.set_removes {
                tx.remove(Self::key(SET, &[name.as_bytes(), member]))?;
            }
            for name in &batch.set_adds {
                tx.insert(Self::key(SET, &[name.as_bytes(), member]), &[][..])?;
            }
            for name in &batch.score_removes {
                let score_key = Self::key(SCORE, &[name.as_bytes(), member]);
                if let Some(bytes) = tx.remove(score_key)? {
                    let score = bytes
                        .as_ref()
                        .try_into()
                        .map(f64::from_be_bytes)
                        .map_err(|_| ConflictableTransactionError::Abort(format!("corrupt score in {}", name)))?;
                    tx.remove(Self::ordered_key(name, score, &batch.key))?;
                }
            }
            for (name, score) in &batch.score_adds {
                let score_key = Self::key(SCORE, &[name.as_bytes(), member]);
                if let Some(bytes) = tx.insert(score_key, &score.to_be_bytes()[..])? {
                    if let Ok(raw) = <[u8; 8]>::try_from(bytes.as_ref()) {
                        tx.remove(Self::ordered_key(name, f64::from_be_bytes(raw), &batch.key))?;
                    }
                }
                tx.insert(Self::ordered_key(name, *score, &batch.key), &[][..])?;
            }

            match (&document, batch.new_version()) {
                (Some(bytes), Some(version)) => {
                    tx.insert(doc_key.as_slice(), bytes.as_slice())?;
                    tx.insert(version_key.as_slice(), &version.to_be_bytes()[..])?;
                }
                _ => {
                    tx.remove(doc_key.as_slice())?;
                    tx.remove(version_key.as_slice())?;
                }
            }
            Ok(ApplyOutcome::Applied)
        });

        let outcome = outcome.map_err(|e: TransactionError<String>| match e {
            TransactionError::Abort(msg) => AppError::Storage(msg),
            TransactionError::Storage(err) => AppError::Storage(format!("Transaction failed: {}", err)),
        })?;

        if outcome == ApplyOutcome::Applied {
            self.latency.record_write(started);
            tracing::debug!(key = %batch.key, "Batch applied");
        }
        Ok(outcome)
    }

    async fn document_keys(&self) -> Result<Vec<String>> {
        let prefix = [DOC, SEP];
        let mut keys = Vec::new();
        for entry in self.tree.scan_prefix(prefix) {
            let (key, _) = entry.map_err(|e| AppError::Storage(format!("Failed to scan documents: {}", e)))?;
            keys.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tag in [SET, SCORE] {
            for entry in self.tree.scan_prefix([tag, SEP]) {
                let (key, _) = entry.map_err(|e| AppError::Storage(format!("Failed to scan index: {}", e)))?;
                let body = &key[2..];
                let name_len = body.iter().position(|b| *b == SEP).unwrap_or(body.len());
                let name = String::from_utf8_lossy(&body[..name_len]).into_owned();
                *counts.entry(name).or_default() += 1;
            }
        }

        let mut dimensions = BTreeMap::new();
        for (name, entries) in &counts {
            tally(&mut dimensions, name, *entries);
        }

        Ok(StoreStats {
            backend: self.backend().to_string(),
            documents: self.tree.scan_prefix([DOC, SEP]).count(),
            dimensions,
            latency: self.latency.snapshot(),
        })
    }

    fn backend(&self) -> &'static str {
        "sled"
    }
}
