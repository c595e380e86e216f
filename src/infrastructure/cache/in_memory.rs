//! In-memory store implementation using moka

use std::future::ready;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::ops::compute::{CompResult, Op};

use crate::domain::cache::{CacheEntry, Store, parse_counter};
use crate::domain::DomainError;

/// Configuration for the in-memory store
#[derive(Debug, Clone, Default)]
pub struct InMemoryStoreConfig {
    /// Maximum number of entries; unbounded when `None`
    pub max_capacity: Option<u64>,
}

impl InMemoryStoreConfig {
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }
}

/// Thread-safe in-memory store backed by a moka map.
///
/// Entries carry their own expiry and are purged lazily on the next access;
/// expired entries nobody reads again stay in memory until then. `add` and
/// `increment` run as a single compute step per key, so they are atomic
/// with respect to other callers of this store.
#[derive(Debug)]
pub struct InMemoryStore {
    cache: MokaCache<String, CacheEntry>,
    config: InMemoryStoreConfig,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(InMemoryStoreConfig::default())
    }

    pub fn with_config(config: InMemoryStoreConfig) -> Self {
        let mut builder = MokaCache::builder();

        if let Some(capacity) = config.max_capacity {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
            config,
        }
    }

    pub fn config(&self) -> &InMemoryStoreConfig {
        &self.config
    }

    /// Number of entries held, including expired entries not yet purged
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes `key` only if it is still expired when the removal runs
    async fn purge_expired(&self, key: &str) {
        self.cache
            .entry_by_ref(key)
            .and_compute_with(|maybe_entry| {
                let op = match maybe_entry {
                    Some(entry) if entry.value().is_expired() => Op::Remove,
                    _ => Op::Nop,
                };
                ready(op)
            })
            .await;
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn driver(&self) -> &'static str {
        "memory"
    }

    fn supports_atomic_add(&self) -> bool {
        true
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        match self.cache.get(key).await {
            Some(entry) => {
                if entry.is_expired() {
                    self.purge_expired(key).await;
                    return Ok(None);
                }

                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    async fn put_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        self.cache
            .insert(key.to_string(), CacheEntry::new(value, ttl))
            .await;
        Ok(true)
    }

    async fn add_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let entry = CacheEntry::new(value, ttl);

        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|maybe_entry| {
                let op = match maybe_entry {
                    Some(existing) if !existing.value().is_expired() => Op::Nop,
                    _ => Op::Put(entry),
                };
                ready(op)
            })
            .await;

        Ok(matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        ))
    }

    async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        let removed = self.cache.remove(key).await;
        Ok(removed.is_some_and(|entry| !entry.is_expired()))
    }

    async fn flush(&self) -> Result<bool, DomainError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(true)
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|maybe_entry| {
                let next = match maybe_entry.map(|entry| entry.into_value()) {
                    Some(current) if !current.is_expired() => {
                        let value = parse_counter(&current.value).saturating_add(by);
                        current.with_value(value.to_string())
                    }
                    _ => CacheEntry::forever(by.to_string()),
                };
                ready(Op::Put(next))
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                Ok(parse_counter(&entry.into_value().value))
            }
            _ => Err(DomainError::cache(format!(
                "Failed to increment key '{}'",
                key
            ))),
        }
    }
}
