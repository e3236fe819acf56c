//! Response cache with TTL expiry and size-bounded eviction.
//!
//! A single in-memory map keyed by a content hash, plus specialized helpers
//! for embeddings and retrieval contexts. All operations are synchronous and
//! non-yielding; the periodic expiry sweep is driven externally (see the
//! façade lifecycle).
//!
//! Concurrent identical in-flight requests are NOT deduplicated: two
//! simultaneous callers for the same uncached key will both compute and both
//! write, the second overwriting the first. This is a documented property of
//! the cache, not a defect to work around here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Configuration for the response cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries kept in memory.
    pub memory_cache_size: usize,
    /// Default TTL for cached responses, in milliseconds.
    pub memory_cache_ttl_ms: u64,
    /// Whether the embedding helper cache is enabled.
    pub embedding_cache_enabled: bool,
    /// Whether the RAG-context helper cache is enabled.
    pub rag_cache_enabled: bool,
    /// TTL for cached RAG contexts, in milliseconds.
    pub rag_cache_ttl_ms: u64,
    /// How often the expiry sweep runs, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: 1000,
            memory_cache_ttl_ms: 60_000,
            embedding_cache_enabled: true,
            rag_cache_enabled: true,
            rag_cache_ttl_ms: 3_600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error)]
pub enum CacheConfigError {
    /// Invalid cache size (must be > 0).
    #[error("Invalid cache size: must be greater than 0")]
    InvalidCacheSize,

    /// Invalid TTL (must be > 0).
    #[error("Invalid TTL: must be greater than 0")]
    InvalidTtl,

    /// Invalid sweep interval (must be > 0).
    #[error("Invalid sweep interval: must be greater than 0")]
    InvalidSweepInterval,
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.memory_cache_size == 0 {
            return Err(CacheConfigError::InvalidCacheSize);
        }
        if self.memory_cache_ttl_ms == 0 || self.rag_cache_ttl_ms == 0 {
            return Err(CacheConfigError::InvalidTtl);
        }
        if self.sweep_interval_ms == 0 {
            return Err(CacheConfigError::InvalidSweepInterval);
        }
        Ok(())
    }

    /// Default response TTL as a Duration.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.memory_cache_ttl_ms)
    }

    /// Sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// The fields that make a request cacheable. Identical requests hash to
/// identical keys; any differing field produces a different key.
#[derive(Debug, Serialize)]
pub struct CacheKeyParts<'a> {
    /// The entry id the request targets.
    pub model: &'a str,
    /// The task kind, as a string.
    pub task: &'a str,
    /// The request input.
    pub input: &'a Value,
    /// Sampling temperature, if set.
    pub temperature: Option<f32>,
    /// Max output tokens, if set.
    pub max_tokens: Option<u32>,
}

/// One cached value with its lifecycle metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    expires_at: Instant,
    access_count: u64,
    last_accessed: Instant,
}

/// Cache statistics for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Current number of entries.
    pub size: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Access-derived hit-rate approximation: entries ever accessed divided
    /// by total access count. This is NOT a true hit/miss ratio: misses
    /// never touch an entry, so they are invisible to this figure.
    pub hit_rate: f64,
    /// Total evictions (expiry or capacity) since creation.
    pub evictions: u64,
}

/// In-memory response cache.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    evictions: RwLock<u64>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("size", &self.entries.read().expect("cache lock poisoned").len())
            .field("capacity", &self.config.memory_cache_size)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Creates a cache with the given configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, CacheConfigError> {
        config.validate()?;
        Ok(Self { entries: RwLock::new(HashMap::new()), config, evictions: RwLock::new(0) })
    }

    /// Builds the cache key for a request: a human-readable `model:task:`
    /// prefix followed by the SHA-256 of the canonical JSON serialization of
    /// all key parts.
    #[must_use]
    pub fn generate_key(parts: &CacheKeyParts<'_>) -> String {
        let canonical = serde_json::to_string(parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}:{}:{digest}", parts.model, parts.task)
    }

    /// Looks up a key. Expired entries are evicted lazily here; a hit bumps
    /// the entry's access count and recency.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };

        if expired {
            entries.remove(key);
            drop(entries);
            *self.evictions.write().expect("evictions lock poisoned") += 1;
            debug!(key, "Cache entry expired on read");
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = Instant::now();
        debug!(key, "Cache hit");
        Some(entry.value.clone())
    }

    /// Inserts a value under the key with the given TTL (default TTL when
    /// `None`). At capacity, the oldest 10% of entries by `last_accessed`
    /// are evicted first.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let now = Instant::now();

        let mut entries = self.entries.write().expect("cache lock poisoned");
        if !entries.contains_key(&key) && entries.len() >= self.config.memory_cache_size {
            let evicted = Self::evict_oldest(&mut entries, self.config.memory_cache_size);
            drop(entries);
            *self.evictions.write().expect("evictions lock poisoned") += evicted;
            info!(evicted, "Cache at capacity, evicted least-recently-accessed entries");
            entries = self.entries.write().expect("cache lock poisoned");
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
                access_count: 0,
                last_accessed: now,
            },
        );
    }

    /// Evicts ~10% of capacity by oldest `last_accessed`; returns the count.
    fn evict_oldest(entries: &mut HashMap<String, CacheEntry>, capacity: usize) -> u64 {
        let to_evict = (capacity / 10).max(1);
        let mut by_recency: Vec<(String, Instant)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_accessed))
            .collect();
        by_recency.sort_by_key(|(_, last_accessed)| *last_accessed);
        let mut evicted = 0;
        for (key, _) in by_recency.into_iter().take(to_evict) {
            entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    /// Removes all expired entries regardless of access; returns the count.
    /// Called by the periodic sweep.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        drop(entries);
        if purged > 0 {
            *self.evictions.write().expect("evictions lock poisoned") += purged as u64;
            debug!(purged, "Expiry sweep purged entries");
        }
        purged
    }

    /// Caches an embedding vector for a source text (7-day TTL).
    pub fn cache_embedding(&self, text: &str, vector: &[f32]) {
        if !self.config.embedding_cache_enabled {
            return;
        }
        let key = Self::embedding_key(text);
        self.set(key, serde_json::json!(vector), Some(Duration::from_secs(7 * 24 * 3600)));
    }

    /// Looks up a cached embedding for a source text.
    #[must_use]
    pub fn get_cached_embedding(&self, text: &str) -> Option<Vec<f32>> {
        if !self.config.embedding_cache_enabled {
            return None;
        }
        let value = self.get(&Self::embedding_key(text))?;
        serde_json::from_value(value).ok()
    }

    /// Caches a retrieval context for a query (configured RAG TTL).
    pub fn cache_rag_context(&self, query: &str, context: Value) {
        if !self.config.rag_cache_enabled {
            return;
        }
        let key = Self::rag_key(query);
        self.set(key, context, Some(Duration::from_millis(self.config.rag_cache_ttl_ms)));
    }

    /// Looks up a cached retrieval context for a query.
    #[must_use]
    pub fn get_cached_rag_context(&self, query: &str) -> Option<Value> {
        if !self.config.rag_cache_enabled {
            return None;
        }
        self.get(&Self::rag_key(query))
    }

    fn embedding_key(text: &str) -> String {
        format!("emb:{}", truncated_hash(text))
    }

    fn rag_key(query: &str) -> String {
        format!("rag:{}", truncated_hash(query))
    }

    /// Current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().expect("cache lock poisoned");
        let accessed = entries.values().filter(|entry| entry.access_count > 0).count();
        let total_accesses: u64 = entries.values().map(|entry| entry.access_count).sum();
        let hit_rate = if total_accesses == 0 {
            0.0
        } else {
            accessed as f64 / total_accesses as f64
        };
        CacheStats {
            size: entries.len(),
            capacity: self.config.memory_cache_size,
            hit_rate,
            evictions: *self.evictions.read().expect("evictions lock poisoned"),
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let cleared = entries.len();
        entries.clear();
        info!(cleared, "Cleared response cache");
    }

    /// The cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Age of the oldest entry, for diagnostics.
    #[must_use]
    pub fn oldest_entry_age(&self) -> Option<Duration> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.values().map(|entry| entry.created_at.elapsed()).max()
    }
}

/// First 16 hex chars of the SHA-256 of `text`.
fn truncated_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
