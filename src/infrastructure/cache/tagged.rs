//! Tag-namespaced view over a repository

use std::future::Future;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::domain::cache::TagSet;
use crate::domain::DomainError;

use super::repository::CacheRepository;

/// Cache view whose keys live under the namespace of a tag set.
///
/// `["b", "a"]` and `["a", "b"]` address the same entries. There is no
/// index from tags to keys, so [`TaggedCache::flush`] cannot clear
/// anything; entries under a tag set go away by expiry or `forget`.
#[derive(Debug, Clone)]
pub struct TaggedCache {
    repository: CacheRepository,
    tags: TagSet,
}

impl TaggedCache {
    pub fn new(repository: CacheRepository, tags: TagSet) -> Self {
        Self { repository, tags }
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn tagged_key(&self, key: &str) -> String {
        self.tags.item_key(key)
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, DomainError> {
        self.repository.get(&self.tagged_key(key)).await
    }

    pub async fn get_or<V: DeserializeOwned>(&self, key: &str, default: V) -> Result<V, DomainError> {
        self.repository.get_or(&self.tagged_key(key), default).await
    }

    pub async fn put<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        self.repository.put(&self.tagged_key(key), value, ttl).await
    }

    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        self.repository.add(&self.tagged_key(key), value, ttl).await
    }

    pub async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        self.repository.forget(&self.tagged_key(key)).await
    }

    pub async fn has(&self, key: &str) -> Result<bool, DomainError> {
        self.repository.has(&self.tagged_key(key)).await
    }

    pub async fn pull<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, DomainError> {
        self.repository.pull(&self.tagged_key(key)).await
    }

    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.repository.increment(&self.tagged_key(key), by).await
    }

    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        self.repository.decrement(&self.tagged_key(key), by).await
    }

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
        self.repository
            .remember(&self.tagged_key(key), ttl, compute)
            .await
    }

    /// Placeholder: always returns `Ok(false)` and leaves the store as is
    pub async fn flush(&self) -> Result<bool, DomainError> {
        warn!(
            namespace = %self.tags.namespace(),
            "Tagged flush is not supported, nothing was removed"
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::cache::Store;
    use crate::infrastructure::cache::InMemoryStore;

    fn tagged(store: &Arc<InMemoryStore>, tags: &[&str]) -> TaggedCache {
        TaggedCache::new(
            CacheRepository::new(store.clone()),
            tags.iter().copied().collect(),
        )
    }

    #[tokio::test]
    async fn test_tag_order_does_not_matter() {
        let store = Arc::new(InMemoryStore::new());

        tagged(&store, &["b", "a"])
            .put("user:1", &"v", None)
            .await
            .unwrap();

        let value: Option<String> = tagged(&store, &["a", "b"]).get("user:1").await.unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_different_tag_sets_are_isolated() {
        let store = Arc::new(InMemoryStore::new());

        tagged(&store, &["a"]).put("k", &1, None).await.unwrap();

        assert!(!tagged(&store, &["a", "b"]).has("k").await.unwrap());
        assert!(store.missing("k").await.unwrap());
        assert!(store.has(&TagSet::new(["a"]).item_key("k")).await.unwrap());
    }

    #[tokio::test]
    async fn test_separators_in_tags_address_distinct_entries() {
        let store = Arc::new(InMemoryStore::new());

        tagged(&store, &["a|b"]).put("k", &"joined", None).await.unwrap();
        let split: Option<String> = tagged(&store, &["a", "b"]).get("k").await.unwrap();
        assert!(split.is_none());

        tagged(&store, &["x:y"]).put("k", &"colon tag", None).await.unwrap();
        let shifted: Option<String> = tagged(&store, &["x"]).get("y:k").await.unwrap();
        assert!(shifted.is_none());

        let joined: Option<String> = tagged(&store, &["a|b"]).get("k").await.unwrap();
        assert_eq!(joined.as_deref(), Some("joined"));
    }

    #[tokio::test]
    async fn test_plain_keys_do_not_reach_tagged_entries() {
        let store = Arc::new(InMemoryStore::new());
        let plain = CacheRepository::new(store.clone());

        plain.put("tag:a|b:k", &"plain", None).await.unwrap();
        plain.put("tag:a:b:k", &"plain", None).await.unwrap();

        let value: Option<String> = tagged(&store, &["a", "b"]).get("k").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_forget_and_counters() {
        let store = Arc::new(InMemoryStore::new());
        let cache = tagged(&store, &["stats"]);

        assert_eq!(cache.increment("hits", 1).await.unwrap(), 1);
        assert_eq!(cache.decrement("hits", 3).await.unwrap(), -2);
        assert!(cache.forget("hits").await.unwrap());
        assert_eq!(cache.get_or("hits", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remember_under_tags() {
        let store = Arc::new(InMemoryStore::new());
        let cache = tagged(&store, &["reports"]);

        let value = cache
            .remember("monthly", None, || async { Ok(vec![1, 2, 3]) })
            .await
            .unwrap();

        assert_eq!(value, vec![1, 2, 3]);
        assert_eq!(cache.pull::<Vec<i32>>("monthly").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_flush_clears_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let cache = tagged(&store, &["a"]);
        cache.put("k", &1, None).await.unwrap();

        assert!(!cache.flush().await.unwrap());
        assert!(cache.has("k").await.unwrap());
    }
}
