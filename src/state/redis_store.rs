use crate::error::{AppError, Result};
use crate::index::IndexDocument;
use crate::state::{tally, ApplyOutcome, IndexStore, LatencyTracker, StoreStats, WriteBatch};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Conditional batch apply.
///
/// KEYS: document, version, then set removes, set adds, score removes, score adds.
/// ARGV: expected version ('' = absent), new version ('' = delete), document JSON,
/// member, the four key counts, then one score per score add.
const APPLY_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[2])
if ARGV[1] == '' then
  if current then return {0, current} end
elseif current ~= ARGV[1] then
  return {0, current or ''}
end
local member = ARGV[4]
local n_srem, n_sadd = tonumber(ARGV[5]), tonumber(ARGV[6])
local n_zrem, n_zadd = tonumber(ARGV[7]), tonumber(ARGV[8])
local k = 3
for _ = 1, n_srem do redis.call('SREM', KEYS[k], member); k = k + 1 end
for _ = 1, n_sadd do redis.call('SADD', KEYS[k], member); k = k + 1 end
for _ = 1, n_zrem do redis.call('ZREM', KEYS[k], member); k = k + 1 end
local a = 9
for _ = 1, n_zadd do redis.call('ZADD', KEYS[k], ARGV[a], member); k = k + 1; a = a + 1 end
if ARGV[2] == '' then
  redis.call('DEL', KEYS[1], KEYS[2])
else
  redis.call('SET', KEYS[1], ARGV[3])
  redis.call('SET', KEYS[2], ARGV[2])
end
return {1, ARGV[2]}
"#;

/// Redis-based index store
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
    apply_script: Arc<Script>,
    latency: Arc<LatencyTracker>,
}

impl RedisStore {
    /// Create a new Redis store
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::new_with_prefix(redis_url, "ssi").await
    }

    /// Create a new Redis store with custom key prefix
    pub async fn new_with_prefix(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Configuration(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        // Test connection
        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| AppError::Storage(format!("Redis connection test failed: {}", e)))?;

        tracing::info!("Initialized Redis store with prefix '{}'", prefix);

        Ok(Self {
            connection,
            key_prefix: prefix.to_string(),
            apply_script: Arc::new(Script::new(APPLY_SCRIPT)),
            latency: Arc::new(LatencyTracker::default()),
        })
    }

    fn document_key(&self, key: &str) -> String {
        format!("{}:doc:{}", self.key_prefix, key)
    }

    fn version_key(&self, key: &str) -> String {
        format!("{}:ver:{}", self.key_prefix, key)
    }

    fn set_key(&self, name: &str) -> String {
        format!("{}:set:{}", self.key_prefix, name)
    }

    fn zset_key(&self, name: &str) -> String {
        format!("{}:z:{}", self.key_prefix, name)
    }

    fn score_bound(score: f64) -> String {
        if score == f64::INFINITY {
            "+inf".to_string()
        } else if score == f64::NEG_INFINITY {
            "-inf".to_string()
        } else {
            score.to_string()
        }
    }

    fn deserialize_document(json: &str) -> Result<IndexDocument> {
        serde_json::from_str(json)
            .map_err(|e| AppError::Serialization(format!("Failed to deserialize document: {}", e)))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut iter: redis::AsyncIter<String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to scan keys: {}", e)))?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[async_trait]
impl IndexStore for RedisStore {
    async fn get_document(&self, key: &str) -> Result<Option<IndexDocument>> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let json: Option<String> = conn
            .get(self.document_key(key))
            .await
            .map_err(|e| AppError::Storage(format!("Failed to get document: {}", e)))?;
        self.latency.record_read(started);
        json.as_deref().map(Self::deserialize_document).transpose()
    }

    async fn get_documents(&self, keys: &[String]) -> Result<Vec<Option<IndexDocument>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let redis_keys: Vec<String> = keys.iter().map(|key| self.document_key(key)).collect();
        let mut conn = self.connection.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&redis_keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to get documents: {}", e)))?;
        self.latency.record_read(started);

        values
            .iter()
            .map(|json| json.as_deref().map(Self::deserialize_document).transpose())
            .collect()
    }

    async fn members(&self, set: &str) -> Result<BTreeSet<String>> {
        let mut conn = self.connection.clone();
        conn.smembers(self.set_key(set))
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read set: {}", e)))
    }

    async fn intersect(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        if sets.is_empty() {
            return Ok(BTreeSet::new());
        }
        let started = Instant::now();
        let keys: Vec<String> = sets.iter().map(|name| self.set_key(name)).collect();
        let mut conn = self.connection.clone();
        let result: BTreeSet<String> = conn
            .sinter(keys)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to intersect sets: {}", e)))?;
        self.latency.record_read(started);
        Ok(result)
    }

    async fn union(&self, sets: &[String]) -> Result<BTreeSet<String>> {
        if sets.is_empty() {
            return Ok(BTreeSet::new());
        }
        let keys: Vec<String> = sets.iter().map(|name| self.set_key(name)).collect();
        let mut conn = self.connection.clone();
        conn.sunion(keys)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to union sets: {}", e)))
    }

    async fn cardinality(&self, set: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        conn.scard(self.set_key(set))
            .await
            .map_err(|e| AppError::Storage(format!("Failed to count set: {}", e)))
    }

    async fn range_by_score(&self, zset: &str, min: f64, max: f64) -> Result<BTreeSet<String>> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .zrangebyscore(self.zset_key(zset), Self::score_bound(min), Self::score_bound(max))
            .await
            .map_err(|e| AppError::Storage(format!("Failed to range sorted set: {}", e)))?;
        self.latency.record_read(started);
        Ok(members.into_iter().collect())
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<ApplyOutcome> {
        let started = Instant::now();
        let json = batch
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?
            .unwrap_or_default();
        let expected = batch
            .expected_version
            .map(|v| v.to_string())
            .unwrap_or_default();
        let new_version = batch
            .new_version()
            .map(|v| v.to_string())
            .unwrap_or_default();

        let mut invocation = self.apply_script.prepare_invoke();
        invocation
            .key(self.document_key(&batch.key))
            .key(self.version_key(&batch.key));
        for name in &batch.set_removes {
            invocation.key(self.set_key(name));
        }
        for name in &batch.set_adds {
            invocation.key(self.set_key(name));
        }
        for name in &batch.score_removes {
            invocation.key(self.zset_key(name));
        }
        for (name, _) in &batch.score_adds {
            invocation.key(self.zset_key(name));
        }
        invocation
            .arg(expected)
            .arg(new_version)
            .arg(json)
            .arg(&batch.key)
            .arg(batch.set_removes.len())
            .arg(batch.set_adds.len())
            .arg(batch.score_removes.len())
            .arg(batch.score_adds.len());
        for (_, score) in &batch.score_adds {
            invocation.arg(*score);
        }

        let mut conn = self.connection.clone();
        let (applied, current): (i64, String) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to apply batch: {}", e)))?;

        if applied == 1 {
            self.latency.record_write(started);
            tracing::debug!(key = %batch.key, "Batch applied");
            Ok(ApplyOutcome::Applied)
        } else {
            Ok(ApplyOutcome::Conflict {
                current: current.parse().ok(),
            })
        }
    }

    async fn document_keys(&self) -> Result<Vec<String>> {
        let prefix = self.document_key("");
        let mut keys: Vec<String> = self
            .scan_keys(&format!("{}*", prefix))
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("BGREWRITEAOF")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to compact Redis log: {}", e)))?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut conn = self.connection.clone();
        let mut dimensions = BTreeMap::new();

        let set_prefix = self.set_key("");
        for key in self.scan_keys(&format!("{}*", set_prefix)).await? {
            let entries: usize = conn
                .scard(&key)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to count set: {}", e)))?;
            tally(&mut dimensions, &key[set_prefix.len()..], entries);
        }

        let zset_prefix = self.zset_key("");
        for key in self.scan_keys(&format!("{}*", zset_prefix)).await? {
            let entries: usize = conn
                .zcard(&key)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to count sorted set: {}", e)))?;
            tally(&mut dimensions, &key[zset_prefix.len()..], entries);
        }

        let documents = self.document_keys().await?.len();
        Ok(StoreStats {
            backend: self.backend().to_string(),
            documents,
            dimensions,
            latency: self.latency.snapshot(),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
