//! Stores that hold nothing

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::cache::Store;
use crate::domain::DomainError;

/// Store that misses every read and refuses every write
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    fn driver(&self) -> &'static str {
        "null"
    }

    async fn get_raw(&self, _key: &str) -> Result<Option<String>, DomainError> {
        Ok(None)
    }

    async fn put_raw(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        Ok(false)
    }

    async fn forget(&self, _key: &str) -> Result<bool, DomainError> {
        Ok(false)
    }

    async fn flush(&self) -> Result<bool, DomainError> {
        Ok(true)
    }

    async fn increment(&self, _key: &str, by: i64) -> Result<i64, DomainError> {
        Ok(by)
    }
}

/// Decorator that switches a store off without touching the wrapped instance.
///
/// Every operation behaves like [`NullStore`]; the inner store keeps its
/// data and can be taken back with [`DisabledStore::into_inner`].
#[derive(Debug, Clone)]
pub struct DisabledStore {
    inner: Arc<dyn Store>,
}

impl DisabledStore {
    pub fn wrap(inner: Arc<dyn Store>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn Store> {
        &self.inner
    }

    pub fn into_inner(self) -> Arc<dyn Store> {
        self.inner
    }
}

#[async_trait]
impl Store for DisabledStore {
    fn driver(&self) -> &'static str {
        self.inner.driver()
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        NullStore.get_raw(key).await
    }

    async fn put_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        NullStore.put_raw(key, value, ttl).await
    }

    async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        NullStore.forget(key).await
    }

    async fn flush(&self) -> Result<bool, DomainError> {
        NullStore.flush().await
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        NullStore.increment(key, by).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::StoreExt;
    use crate::infrastructure::cache::InMemoryStore;

    #[tokio::test]
    async fn test_null_store_holds_nothing() {
        let store = NullStore;

        assert!(!store.put("key", &"value", None).await.unwrap());
        assert!(store.missing("key").await.unwrap());
        assert!(!store.add("key", &"value", None).await.unwrap());
        assert!(store.flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_store_leaves_inner_untouched() {
        let inner: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        inner.put("key", &"original", None).await.unwrap();

        let disabled = DisabledStore::wrap(inner.clone());
        assert!(disabled.missing("key").await.unwrap());
        assert!(!disabled.put("key", &"changed", None).await.unwrap());
        assert!(!disabled.forget("key").await.unwrap());

        let restored = disabled.into_inner();
        let value: Option<String> = restored.get("key").await.unwrap();
        assert_eq!(value.as_deref(), Some("original"));
    }
}
