//! Externally owned prediction cache
//!
//! Entries are keyed by a SHA-256 fingerprint of the numeric feature vector
//! that produced them and expire after an explicit TTL. The cache never reads
//! the clock itself; callers pass `now` so the core stays deterministic.
//!
//! Features:
//! - Deterministic feature fingerprinting
//! - Per-entry TTL with explicit purge
//! - Hit/miss/eviction metrics

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_seconds: i64,
    /// Upper bound on stored entries; inserting into a full cache drops expired
    /// entries first, then the oldest ones
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 3600,
            max_entries: 10_000,
        }
    }
}

/// Hex SHA-256 digest of a tagged feature vector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the tag followed by the bit pattern of every value
    pub fn from_features(tag: &str, features: &[f64]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        hasher.update((features.len() as u64).to_le_bytes());
        for value in features {
            hasher.update(value.to_bits().to_le_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache statistics and metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub total_lookups: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    /// Get hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        if self.total_lookups == 0 {
            return 0.0;
        }
        (self.cache_hits as f64 / self.total_lookups as f64) * 100.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<Fingerprint, CacheEntry<V>>,
    metrics: CacheMetrics,
}

/// TTL cache shared by reference between prediction calls
#[derive(Debug)]
pub struct PredictionCache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> PredictionCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_config(&CacheConfig {
            ttl_seconds: ttl.num_seconds(),
            ..CacheConfig::default()
        })
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            }),
            ttl: Duration::seconds(config.ttl_seconds),
            max_entries: config.max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // A panic while holding the lock leaves the map consistent, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        now - entry.cached_at < self.ttl
    }

    /// Cached value if present and younger than the TTL
    pub fn get(&self, key: &Fingerprint, now: DateTime<Utc>) -> Option<V> {
        let mut state = self.lock();
        state.metrics.total_lookups += 1;

        let fresh = state
            .entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.value.clone());

        match fresh {
            Some(value) => {
                state.metrics.cache_hits += 1;
                debug!(key = key.as_str(), "Prediction cache hit");
                Some(value)
            }
            None => {
                state.metrics.cache_misses += 1;
                if state.entries.remove(key).is_some() {
                    state.metrics.evictions += 1;
                }
                None
            }
        }
    }

    /// Store a value, evicting expired and then the oldest entries to stay within `max_entries`
    pub fn insert(&self, key: Fingerprint, value: V, now: DateTime<Utc>) {
        let mut state = self.lock();
        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            let ttl = self.ttl;
            let before = state.entries.len();
            state.entries.retain(|_, entry| now - entry.cached_at < ttl);
            let evicted = (before - state.entries.len()) as u64;
            state.metrics.evictions += evicted;

            while state.entries.len() >= self.max_entries.max(1) {
                let Some(oldest) = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.cached_at)
                    .map(|(key, _)| key.clone())
                else {
                    break;
                };
                state.entries.remove(&oldest);
                state.metrics.evictions += 1;
                debug!(key = oldest.as_str(), "Evicted oldest prediction cache entry");
            }
        }
        state.entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: now,
            },
        );
    }

    /// Return the cached value or compute, store and return a fresh one
    pub fn get_or_try_insert_with<E>(
        &self,
        key: Fingerprint,
        now: DateTime<Utc>,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key, now) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone(), now);
        Ok(value)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let ttl = self.ttl;
        let before = state.entries.len();
        state.entries.retain(|_, entry| now - entry.cached_at < ttl);
        let removed = before - state.entries.len();
        state.metrics.evictions += removed as u64;
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.lock().metrics.clone()
    }
}
