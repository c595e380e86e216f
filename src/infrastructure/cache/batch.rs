//! Buffered, ordered cache mutations

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::cache::to_value;
use crate::domain::DomainError;

use super::repository::CacheRepository;

#[derive(Debug, Clone, PartialEq)]
enum BatchOp {
    Put {
        key: String,
        value: Value,
        ttl: Option<Duration>,
    },
    Forget {
        key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct BatchBuffer {
    state: BatchState,
    operations: Vec<BatchOp>,
}

/// Mutations applied to a repository in insertion order on `commit`.
///
/// Not transactional: a backend error partway through `commit` stops the
/// batch and leaves the earlier writes in place. Commit takes no lock on
/// the store, so it can interleave with unrelated direct writes.
#[derive(Debug)]
pub struct AtomicBatch {
    repository: CacheRepository,
    // State and operations change together so an append never races a commit
    buffer: Mutex<BatchBuffer>,
}

impl AtomicBatch {
    pub fn new(repository: CacheRepository) -> Self {
        Self {
            repository,
            buffer: Mutex::new(BatchBuffer {
                state: BatchState::Pending,
                operations: Vec::new(),
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, BatchBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BatchState {
        self.buffer().state
    }

    /// Number of buffered operations
    pub fn len(&self) -> usize {
        self.buffer().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, op: BatchOp) -> Result<(), DomainError> {
        let mut buffer = self.buffer();
        if buffer.state != BatchState::Pending {
            return Err(DomainError::cache(format!(
                "Cannot add to a batch in state {:?}",
                buffer.state
            )));
        }

        buffer.operations.push(op);
        Ok(())
    }

    pub fn put<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<(), DomainError> {
        self.push(BatchOp::Put {
            key: key.to_string(),
            value: to_value(value)?,
            ttl,
        })
    }

    pub fn forget(&self, key: &str) -> Result<(), DomainError> {
        self.push(BatchOp::Forget {
            key: key.to_string(),
        })
    }

    /// Applies the buffered operations in order.
    ///
    /// Returns `Ok(true)` when every write was stored and `Ok(false)` when
    /// a backend refused one, or when the batch was already committed or
    /// rolled back.
    pub async fn commit(&self) -> Result<bool, DomainError> {
        let operations = {
            let mut buffer = self.buffer();
            if buffer.state != BatchState::Pending {
                warn!(state = ?buffer.state, "Batch already finished, ignoring commit");
                return Ok(false);
            }
            buffer.state = BatchState::Committed;
            std::mem::take(&mut buffer.operations)
        };

        let count = operations.len();
        let mut all_stored = true;

        for op in operations {
            match op {
                BatchOp::Put { key, value, ttl } => {
                    all_stored &= self.repository.put(&key, &value, ttl).await?;
                }
                BatchOp::Forget { key } => {
                    self.repository.forget(&key).await?;
                }
            }
        }

        debug!(count, all_stored, "Batch committed");
        Ok(all_stored)
    }

    /// Discards the buffered operations, returning how many were dropped
    pub fn rollback(&self) -> usize {
        let mut buffer = self.buffer();
        if buffer.state != BatchState::Pending {
            return 0;
        }
        buffer.state = BatchState::RolledBack;

        let discarded = std::mem::take(&mut buffer.operations).len();
        debug!(discarded, "Batch rolled back");
        discarded
    }

    /// Fills the batch with `f`, committing when it returns `Ok` and rolling
    /// back when it returns `Err` or panics.
    pub async fn scope<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce(&Self) -> Result<T, DomainError>,
    {
        match catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(Ok(value)) => {
                if !self.commit().await? {
                    warn!("Batch committed with failed writes");
                }
                Ok(value)
            }
            Ok(Err(e)) => {
                self.rollback();
                Err(e)
            }
            Err(panic) => {
                self.rollback();
                resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::cache::{MockStore, Store, StoreCall};
    use crate::infrastructure::cache::NullStore;

    fn batch_over(store: &Arc<MockStore>) -> AtomicBatch {
        AtomicBatch::new(CacheRepository::new(store.clone()))
    }

    #[tokio::test]
    async fn test_empty_commit_succeeds() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);

        assert!(batch.is_empty());
        assert!(batch.commit().await.unwrap());
        assert_eq!(batch.state(), BatchState::Committed);
    }

    #[tokio::test]
    async fn test_second_commit_fails() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);
        batch.put("a", &1, None).unwrap();

        assert!(batch.commit().await.unwrap());
        assert!(!batch.commit().await.unwrap());
        assert_eq!(store.calls(), vec![StoreCall::Put("a".to_string())]);
    }

    #[tokio::test]
    async fn test_commit_applies_in_insertion_order() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);

        batch.put("a", &1, None).unwrap();
        batch.forget("a").unwrap();
        batch.put("b", &"two", Some(Duration::from_secs(60))).unwrap();
        assert_eq!(batch.len(), 3);

        assert!(batch.commit().await.unwrap());

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Put("a".to_string()),
                StoreCall::Forget("a".to_string()),
                StoreCall::Put("b".to_string()),
            ]
        );
        assert!(store.missing("a").await.unwrap());
        assert_eq!(store.get_raw("b").await.unwrap().as_deref(), Some("\"two\""));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_accepted_puts_racing_commit_are_applied() {
        for _ in 0..50 {
            let store = Arc::new(MockStore::new());
            let batch = Arc::new(batch_over(&store));

            let writers: Vec<_> = (0..4)
                .map(|writer| {
                    let batch = batch.clone();
                    tokio::task::spawn_blocking(move || {
                        (0..50)
                            .map(|i| format!("w{}:{}", writer, i))
                            .filter(|key| batch.put(key, &1, None).is_ok())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            batch.commit().await.unwrap();

            for writer in writers {
                for key in writer.await.unwrap() {
                    assert!(store.has(&key).await.unwrap(), "accepted put {} was lost", key);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_rollback_leaves_store_untouched() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);

        batch.put("a", &1, None).unwrap();
        batch.forget("b").unwrap();

        assert_eq!(batch.rollback(), 2);
        assert!(store.calls().is_empty());
        assert_eq!(store.len(), 0);

        assert!(!batch.commit().await.unwrap());
        assert_eq!(batch.rollback(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_undone() {
        let store = Arc::new(MockStore::new().failing_on("b"));
        let batch = batch_over(&store);

        batch.put("a", &1, None).unwrap();
        batch.put("b", &2, None).unwrap();
        batch.put("c", &3, None).unwrap();

        assert!(batch.commit().await.is_err());
        assert_eq!(store.calls(), vec![StoreCall::Put("a".to_string())]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_refused_write_reports_false() {
        let batch = AtomicBatch::new(CacheRepository::new(Arc::new(NullStore)));
        batch.put("a", &1, None).unwrap();

        assert!(!batch.commit().await.unwrap());
    }

    #[tokio::test]
    async fn test_put_after_commit_is_rejected() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);
        batch.commit().await.unwrap();

        assert!(batch.put("a", &1, None).is_err());
    }

    #[tokio::test]
    async fn test_scope_commits_on_ok() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);

        let value = batch
            .scope(|batch| {
                batch.put("a", &1, None)?;
                batch.put("b", &2, None)?;
                Ok("done")
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(store.len(), 2);
        assert_eq!(batch.state(), BatchState::Committed);
    }

    #[tokio::test]
    async fn test_scope_rolls_back_on_error() {
        let store = Arc::new(MockStore::new());
        let batch = batch_over(&store);

        let result: Result<(), _> = batch
            .scope(|batch| {
                batch.put("a", &1, None)?;
                Err(DomainError::validation("bad input"))
            })
            .await;

        assert!(matches!(result, Err(DomainError::Validation { .. })));
        assert_eq!(store.len(), 0);
        assert_eq!(batch.state(), BatchState::RolledBack);
    }

    #[tokio::test]
    async fn test_scope_rolls_back_on_panic() {
        let store = Arc::new(MockStore::new());
        let batch = Arc::new(batch_over(&store));

        let scoped = batch.clone();
        let handle = tokio::spawn(async move {
            scoped
                .scope(|batch| {
                    batch.put("a", &1, None)?;
                    if true {
                        panic!("filling the batch failed");
                    }
                    Ok(())
                })
                .await
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(batch.state(), BatchState::RolledBack);
        assert!(store.calls().is_empty());
    }
}
