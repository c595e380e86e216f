//! Store contract shared by every cache backend

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::DomainError;

/// Key/value store primitives with optional per-entry TTL.
///
/// Values are opaque strings; [`StoreExt`] layers typed JSON access on top.
/// Backends report I/O failures on writes as `Ok(false)` and on reads as a
/// miss, so callers must check the returned flags.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    /// Driver name, e.g. `memory` or `file`
    fn driver(&self) -> &'static str;

    /// Returns true when [`Store::add_raw`] is an atomic check-then-set
    fn supports_atomic_add(&self) -> bool {
        false
    }

    /// Gets a raw value; expired entries are purged and reported as missing
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Stores a raw value; `ttl == None` stores it forever
    async fn put_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError>;

    /// Removes a key, returning whether it existed
    async fn forget(&self, key: &str) -> Result<bool, DomainError>;

    /// Removes every entry owned by this store
    async fn flush(&self) -> Result<bool, DomainError>;

    /// Adds `by` to the stored integer and returns the new value.
    ///
    /// A missing or non-numeric current value counts as 0. The entry's
    /// expiry is left as it was.
    async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError>;

    async fn decrement(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        let delta = by.checked_neg().ok_or_else(|| {
            DomainError::validation(format!("Cannot decrement '{}' by {}", key, by))
        })?;
        self.increment(key, delta).await
    }

    /// Stores a value only if the key is absent.
    ///
    /// The default is a `get` followed by a `put` and is not atomic; backends
    /// that can do better override it and report so via
    /// [`Store::supports_atomic_add`].
    async fn add_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        if self.get_raw(key).await?.is_some() {
            return Ok(false);
        }

        self.put_raw(key, value, ttl).await
    }

    async fn has(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.get_raw(key).await?.is_some())
    }

    async fn missing(&self, key: &str) -> Result<bool, DomainError> {
        Ok(!self.has(key).await?)
    }

    /// Gets several raw values, preserving the order of `keys`
    async fn many_raw(&self, keys: &[&str]) -> Result<Vec<Option<String>>, DomainError> {
        let mut values = Vec::with_capacity(keys.len());

        for key in keys {
            values.push(self.get_raw(key).await?);
        }

        Ok(values)
    }

    /// Stores several raw values; returns false if any write failed
    async fn put_many_raw(
        &self,
        items: &[(&str, &str)],
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let mut all_stored = true;

        for (key, value) in items {
            all_stored &= self.put_raw(key, value, ttl).await?;
        }

        Ok(all_stored)
    }

    /// Gets a raw value and removes it
    async fn pull_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let value = self.get_raw(key).await?;

        if value.is_some() {
            self.forget(key).await?;
        }

        Ok(value)
    }
}

/// Parses a stored value as a counter; anything non-numeric counts as 0
pub fn parse_counter(raw: &str) -> i64 {
    let trimmed = raw.trim().trim_matches('"');

    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as i64))
        .unwrap_or(0)
}

pub(crate) fn encode_json<V: Serialize + ?Sized>(value: &V) -> Result<String, DomainError> {
    serde_json::to_string(value)
        .map_err(|e| DomainError::serialization(format!("Failed to serialize cache value: {}", e)))
}

pub(crate) fn decode_json<V: DeserializeOwned>(raw: &str) -> Result<V, DomainError> {
    serde_json::from_str(raw).map_err(|e| {
        DomainError::serialization(format!("Failed to deserialize cache value: {}", e))
    })
}

/// Typed JSON operations derived from the [`Store`] primitives
pub trait StoreExt: Store {
    /// Gets a typed value from the store
    fn get<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Option<V>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => Ok(Some(decode_json(&raw)?)),
                None => Ok(None),
            }
        }
    }

    /// Gets a typed value, falling back to `default` on a miss
    fn get_or<'a, V>(
        &'a self,
        key: &'a str,
        default: V,
    ) -> impl Future<Output = Result<V, DomainError>> + Send
    where
        V: DeserializeOwned + Send + 'a,
    {
        async move { Ok(self.get(key).await?.unwrap_or(default)) }
    }

    /// Stores a typed value
    fn put<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool, DomainError>> + Send
    where
        V: Serialize + Send + Sync + ?Sized,
    {
        async move {
            let raw = encode_json(value)?;
            self.put_raw(key, &raw, ttl).await
        }
    }

    /// Stores a typed value with no expiry
    fn forever<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
    ) -> impl Future<Output = Result<bool, DomainError>> + Send
    where
        V: Serialize + Send + Sync + ?Sized,
    {
        self.put(key, value, None)
    }

    /// Stores a typed value only if the key is absent
    fn add<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool, DomainError>> + Send
    where
        V: Serialize + Send + Sync + ?Sized,
    {
        async move {
            let raw = encode_json(value)?;
            self.add_raw(key, &raw, ttl).await
        }
    }

    /// Gets a typed value and removes it
    fn pull<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl Future<Output = Result<Option<V>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.pull_raw(key).await? {
                Some(raw) => Ok(Some(decode_json(&raw)?)),
                None => Ok(None),
            }
        }
    }

    /// Gets several typed values, preserving the order of `keys`
    fn many<'a, V>(
        &'a self,
        keys: &'a [&'a str],
    ) -> impl Future<Output = Result<Vec<Option<V>>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            self.many_raw(keys)
                .await?
                .into_iter()
                .map(|raw| raw.map(|raw| decode_json(&raw)).transpose())
                .collect()
        }
    }

    /// Stores several typed values with a shared TTL
    fn put_many<'a, V>(
        &'a self,
        items: &'a [(&'a str, &'a V)],
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<bool, DomainError>> + Send
    where
        V: Serialize + Send + Sync,
    {
        async move {
            let encoded = items
                .iter()
                .map(|(key, value)| Ok((*key, encode_json(*value)?)))
                .collect::<Result<Vec<_>, DomainError>>()?;
            let borrowed: Vec<(&str, &str)> = encoded
                .iter()
                .map(|(key, raw)| (*key, raw.as_str()))
                .collect();

            self.put_many_raw(&borrowed, ttl).await
        }
    }

    /// Returns the cached value, or computes, stores and returns it.
    ///
    /// Concurrent misses each run `compute`; use the manager's `flexible`
    /// when recomputation must happen at most once.
    fn remember<'a, V, F, Fut>(
        &'a self,
        key: &'a str,
        ttl: Option<Duration>,
        compute: F,
    ) -> impl Future<Output = Result<V, DomainError>> + Send
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'a,
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<V, DomainError>> + Send + 'a,
    {
        async move {
            if let Some(value) = self.get(key).await? {
                return Ok(value);
            }

            let value = compute().await?;
            self.put(key, &value, ttl).await?;
            Ok(value)
        }
    }

    /// Returns the cached value, or stores `value` and returns it
    fn get_or_put<'a, V>(
        &'a self,
        key: &'a str,
        value: V,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<V, DomainError>> + Send
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'a,
    {
        self.remember(key, ttl, move || async move { Ok(value) })
    }
}

// Blanket implementation for all types implementing Store
impl<T: Store + ?Sized> StoreExt for T {}
