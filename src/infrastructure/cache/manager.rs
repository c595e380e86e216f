//! Named store registry and the cache entry point for collaborators

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::config::{CacheSettings, LockSettings};
use crate::domain::cache::{
    CacheEvent, CacheEventKind, JsonSerializer, Serializer, Store, TagSet, prefixed_key,
};
use crate::domain::DomainError;

use super::batch::AtomicBatch;
use super::events::EventBus;
use super::factory::StoreFactory;
use super::lock::CacheLock;
use super::repository::CacheRepository;
use super::tagged::TaggedCache;

/// Registry of named stores with a default.
///
/// Constructed explicitly and shared as `Arc<CacheManager>`; proxy methods
/// act on the default store through a repository that carries the global
/// prefix, the serializer and the shared event bus.
pub struct CacheManager {
    stores: HashMap<String, Arc<dyn Store>>,
    default_store: String,
    prefix: Option<String>,
    serializer: Arc<dyn Serializer>,
    events: Arc<EventBus>,
    lock_settings: LockSettings,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("stores", &self.store_names())
            .field("default_store", &self.default_store)
            .field("prefix", &self.prefix)
            .field("serializer", &self.serializer.name())
            .field("events", &self.events)
            .field("lock_settings", &self.lock_settings)
            .finish()
    }
}

impl CacheManager {
    /// Creates a manager whose default store is `store`, registered as `name`
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        let name = name.into();
        let mut stores = HashMap::new();
        stores.insert(name.clone(), store);

        Self {
            stores,
            default_store: name,
            prefix: None,
            serializer: Arc::new(JsonSerializer),
            events: Arc::new(EventBus::new()),
            lock_settings: LockSettings::default(),
        }
    }

    /// Builds every configured store and validates the default name
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self, DomainError> {
        let factory = StoreFactory::new();
        let mut stores = HashMap::with_capacity(settings.stores.len());

        for (name, descriptor) in &settings.stores {
            let store = factory.create(descriptor).await.map_err(|e| {
                DomainError::configuration(format!("Failed to build cache store '{}': {}", name, e))
            })?;
            stores.insert(name.clone(), store);
        }

        if !stores.contains_key(&settings.default) {
            return Err(DomainError::configuration(format!(
                "Default cache store '{}' is not configured",
                settings.default
            )));
        }

        info!(
            default = %settings.default,
            stores = stores.len(),
            serializer = settings.serializer.build().name(),
            "Cache manager initialized"
        );

        Ok(Self {
            stores,
            default_store: settings.default.clone(),
            prefix: settings.prefix.clone().filter(|prefix| !prefix.is_empty()),
            serializer: settings.serializer.build(),
            events: Arc::new(EventBus::new()),
            lock_settings: settings.lock.clone(),
        })
    }

    /// Registers or replaces the store called `name`
    pub fn with_store(mut self, name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        self.stores.insert(name.into(), store);
        self
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

    pub fn with_lock_settings(mut self, lock_settings: LockSettings) -> Self {
        self.lock_settings = lock_settings;
        self
    }

    pub fn default_store_name(&self) -> &str {
        &self.default_store
    }

    /// Registered store names, sorted
    pub fn store_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Resolves `name`, or the default store when `None`
    pub fn store(&self, name: Option<&str>) -> Result<Arc<dyn Store>, DomainError> {
        let name = name.unwrap_or(&self.default_store);

        self.stores.get(name).cloned().ok_or_else(|| {
            DomainError::configuration(format!("Cache store '{}' is not defined", name))
        })
    }

    /// Repository over a store; `prefix` replaces the global prefix when given
    pub fn repository(
        &self,
        prefix: Option<&str>,
        store_name: Option<&str>,
    ) -> Result<CacheRepository, DomainError> {
        let repository = CacheRepository::new(self.store(store_name)?)
            .with_serializer(self.serializer.clone())
            .with_events(self.events.clone());

        Ok(match prefix.or(self.prefix.as_deref()) {
            Some(prefix) => repository.with_prefix(prefix),
            None => repository,
        })
    }

    fn default_repository(&self) -> Result<CacheRepository, DomainError> {
        self.repository(None, None)
    }

    /// Registers an event listener
    pub fn listen<F>(&self, kind: CacheEventKind, listener: F)
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.listen(kind, listener);
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, DomainError> {
        self.default_repository()?.get(key).await
    }

    pub async fn get_or<V: DeserializeOwned>(&self, key: &str, default: V) -> Result<V, DomainError> {
        self.default_repository()?.get_or(key, default).await
    }

    pub async fn put<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        self.default_repository()?.put(key, value, ttl).await
    }

    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        self.default_repository()?.add(key, value, ttl).await
    }

    pub async fn forever<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<bool, DomainError> {
        self.default_repository()?.forever(key, value).await
    }

    pub async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        self.default_repository()?.forget(key).await
    }

    pub async fn flush(&self) -> Result<bool, DomainError> {
        self.default_repository()?.flush().await
    }

    pub async fn has(&self, key: &str) -> Result<bool, DomainError> {
        self.default_repository()?.has(key).await
    }

    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.default_repository()?.increment(key, by).await
    }

    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.default_repository()?.decrement(key, by).await
    }

    /// Get-or-compute without stampede protection; see [`CacheManager::flexible`]
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
        self.default_repository()?.remember(key, ttl, compute).await
    }

    /// Tagged view over the default store
    pub fn tags<I, S>(&self, tags: I) -> Result<TaggedCache, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(TaggedCache::new(self.default_repository()?, TagSet::new(tags)))
    }

    /// Lock called `key` on the named or default store.
    ///
    /// `lease` bounds how long the lock may be held and defaults to the
    /// configured lease; the wait timeout is given to `acquire` or `block`.
    pub fn lock(
        &self,
        key: &str,
        lease: Option<Duration>,
        store_name: Option<&str>,
    ) -> Result<CacheLock, DomainError> {
        let store = self.store(store_name)?;

        Ok(
            CacheLock::new(store, prefixed_key(self.prefix.as_deref(), key))
                .with_lease(lease.unwrap_or_else(|| self.lock_settings.lease()))
                .with_poll_interval(self.lock_settings.poll_interval()),
        )
    }

    /// Empty batch over the named or default store
    pub fn atomic(&self, store_name: Option<&str>) -> Result<AtomicBatch, DomainError> {
        Ok(AtomicBatch::new(self.repository(None, store_name)?))
    }

    /// Get-or-compute that runs `compute` at most once per key among callers
    /// that obtain the lock.
    ///
    /// A miss takes the lock `lock:{key}`, checks the cache again, and only
    /// then computes and stores. `lock_timeout` of `None` waits for the lock
    /// indefinitely. A caller that gives up waiting checks the cache one
    /// last time and fails with [`DomainError::LockTimeout`] if it is still
    /// empty. The lock is released on every exit path.
    pub async fn flexible<V, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
        lock_timeout: Option<Duration>,
    ) -> Result<V, DomainError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, DomainError>>,
    {
        let repository = self.default_repository()?;

        if let Some(value) = repository.get(key).await? {
            return Ok(value);
        }

        let lock = self.lock(key, None, None)?;
        let guarded = &repository;

        let outcome = lock
            .block(lock_timeout, move || async move {
                if let Some(value) = guarded.get(key).await? {
                    debug!(key, "Populated while waiting for lock");
                    return Ok(value);
                }

                let value = compute().await?;
                guarded.put(key, &value, ttl).await?;
                Ok::<V, DomainError>(value)
            })
            .await;

        match outcome {
            Err(e) if e.is_lock_timeout() => match repository.get(key).await? {
                Some(value) => Ok(value),
                None => Err(e),
            },
            other => other,
        }
    }
}
