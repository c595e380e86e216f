//! Prefixed cache repository with pluggable serialization and events

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::cache::{
    CacheEvent, CacheEventKind, JsonSerializer, Serializer, Store, from_value, prefixed_key,
    to_value,
};
use crate::domain::DomainError;

use super::events::EventBus;

/// Typed access to a store under a key prefix.
///
/// Values pass through the configured [`Serializer`], except integers,
/// which are stored as plain decimal text so `increment` and `decrement`
/// keep working on them whatever the serializer. A stored value that fails
/// to decode is treated as a miss. Every operation fires a [`CacheEvent`]
/// carrying the caller's (unprefixed) key.
#[derive(Clone)]
pub struct CacheRepository {
    store: Arc<dyn Store>,
    prefix: Option<String>,
    serializer: Arc<dyn Serializer>,
    events: Arc<EventBus>,
}

impl fmt::Debug for CacheRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRepository")
            .field("store", &self.store)
            .field("prefix", &self.prefix)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

impl CacheRepository {
    /// Creates an unprefixed JSON repository with its own event bus
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            prefix: None,
            serializer: Arc::new(JsonSerializer),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Key as stored in the backend
    pub fn item_key(&self, key: &str) -> String {
        prefixed_key(self.prefix.as_deref(), key)
    }

    fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<String, DomainError> {
        match to_value(value)? {
            Value::Number(number) if number.is_i64() => Ok(number.to_string()),
            other => self.serializer.encode(&other),
        }
    }

    fn decode<V: DeserializeOwned>(&self, key: &str, raw: &str) -> Option<V> {
        let decoded = match raw.parse::<i64>() {
            Ok(counter) => Ok(Value::from(counter)),
            Err(_) => self.serializer.decode(raw),
        };

        match decoded.and_then(from_value::<V>) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, serializer = self.serializer.name(), error = %e, "Undecodable cache value, treating as miss");
                None
            }
        }
    }

    fn fire(&self, event: CacheEvent) {
        self.events.fire(&event);
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, DomainError> {
        let raw = self.store.get_raw(&self.item_key(key)).await?;

        let decoded = raw
            .as_deref()
            .and_then(|raw| self.decode::<V>(key, raw).map(|value| (raw, value)));

        match decoded {
            Some((raw, value)) => {
                debug!(key, "Cache hit");
                self.fire(CacheEvent::new(CacheEventKind::Hit, key).with_value(raw));
                Ok(Some(value))
            }
            None => {
                debug!(key, "Cache miss");
                self.fire(CacheEvent::new(CacheEventKind::Missed, key));
                Ok(None)
            }
        }
    }

    pub async fn get_or<V: DeserializeOwned>(&self, key: &str, default: V) -> Result<V, DomainError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    pub async fn put<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let raw = self.encode(value)?;
        let stored = self.store.put_raw(&self.item_key(key), &raw, ttl).await?;

        let kind = if stored {
            CacheEventKind::Written
        } else {
            CacheEventKind::WriteFailed
        };
        self.fire(CacheEvent::new(kind, key).with_value(raw).with_ttl(ttl));

        Ok(stored)
    }

    pub async fn forever<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<bool, DomainError> {
        self.put(key, value, None).await
    }

    /// Stores `value` only if `key` is absent
    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let raw = self.encode(value)?;
        let added = self.store.add_raw(&self.item_key(key), &raw, ttl).await?;

        if added {
            self.fire(
                CacheEvent::new(CacheEventKind::Written, key)
                    .with_value(raw)
                    .with_ttl(ttl),
            );
        }

        Ok(added)
    }

    pub async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        let removed = self.store.forget(&self.item_key(key)).await?;

        if removed {
            self.fire(CacheEvent::new(CacheEventKind::Forgotten, key));
        }

        Ok(removed)
    }

    /// Flushes the whole underlying store, not just this prefix
    pub async fn flush(&self) -> Result<bool, DomainError> {
        let flushed = self.store.flush().await?;

        if flushed {
            self.fire(CacheEvent::new(CacheEventKind::Flushed, "*"));
        }

        Ok(flushed)
    }

    pub async fn has(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get::<Value>(key).await?.is_some())
    }

    pub async fn missing(&self, key: &str) -> Result<bool, DomainError> {
        Ok(!self.has(key).await?)
    }

    pub async fn pull<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, DomainError> {
        let value = self.get(key).await?;

        if value.is_some() {
            self.forget(key).await?;
        }

        Ok(value)
    }

    pub async fn many<V: DeserializeOwned>(&self, keys: &[&str]) -> Result<Vec<Option<V>>, DomainError> {
        let mut values = Vec::with_capacity(keys.len());

        for key in keys {
            values.push(self.get(key).await?);
        }

        Ok(values)
    }

    pub async fn put_many<V: Serialize>(
        &self,
        items: &[(&str, V)],
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let mut all_stored = true;

        for (key, value) in items {
            all_stored &= self.put(key, value, ttl).await?;
        }

        Ok(all_stored)
    }

    /// Returns the cached value, or computes, stores and returns it.
    ///
    /// Concurrent misses each run `compute`.
    pub async fn remember<V, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V, DomainError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, DomainError>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = compute().await?;
        self.put(key, &value, ttl).await?;
        Ok(value)
    }

    pub async fn remember_forever<V, F, Fut>(&self, key: &str, compute: F) -> Result<V, DomainError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, DomainError>>,
    {
        self.remember(key, None, compute).await
    }

    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        let value = self.store.increment(&self.item_key(key), by).await?;
        self.fire(CacheEvent::new(CacheEventKind::Incremented, key).with_value(value.to_string()));
        Ok(value)
    }

    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        let value = self.store.decrement(&self.item_key(key), by).await?;
        self.fire(CacheEvent::new(CacheEventKind::Decremented, key).with_value(value.to_string()));
        Ok(value)
    }
}
