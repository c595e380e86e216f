//! Advisory lock stored as an ordinary cache entry

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::cache::Store;
use crate::domain::DomainError;

/// Namespace of every lock record
pub const LOCK_NAMESPACE: &str = "lock";

pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Store key holding the record of the lock called `name`
pub fn lock_key(name: &str) -> String {
    format!("{}:{}", LOCK_NAMESPACE, name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unacquired,
    Acquired,
    /// Terminal
    Released,
}

/// Mutual exclusion built on the store's `add`.
///
/// The record holds a token unique to this instance, so only the instance
/// that wrote it can remove it. The lease is never renewed: a holder that
/// outlives it loses exclusivity silently. Exclusion is only as strong as
/// the store's `add` (see [`Store::supports_atomic_add`]).
#[derive(Debug)]
pub struct CacheLock {
    store: Arc<dyn Store>,
    name: String,
    key: String,
    owner: String,
    lease: Duration,
    poll_interval: Duration,
    state: Mutex<LockState>,
}

impl CacheLock {
    pub fn new(store: Arc<dyn Store>, name: impl Into<String>) -> Self {
        let name = name.into();

        Self {
            store,
            key: lock_key(&name),
            name,
            owner: Uuid::new_v4().to_string(),
            lease: DEFAULT_LEASE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(LockState::Unacquired),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token written to the store while this instance holds the lock
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn state(&self) -> LockState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_acquired(&self) -> bool {
        self.state() == LockState::Acquired
    }

    fn set_state(&self, state: LockState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Tries to take the lock.
    ///
    /// Non-blocking calls make a single attempt. Blocking calls poll until
    /// the lock is free or `timeout` elapses; without a timeout they wait
    /// indefinitely. Returns `Ok(false)` when the lock was not obtained.
    pub async fn acquire(&self, blocking: bool, timeout: Option<Duration>) -> Result<bool, DomainError> {
        match self.state() {
            LockState::Acquired => return Ok(true),
            LockState::Released => {
                return Err(DomainError::lock(format!(
                    "Lock '{}' was already released",
                    self.name
                )));
            }
            LockState::Unacquired => {}
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if self
                .store
                .add_raw(&self.key, &self.owner, Some(self.lease))
                .await?
            {
                self.set_state(LockState::Acquired);
                debug!(lock = %self.name, owner = %self.owner, "Lock acquired");
                return Ok(true);
            }

            if !blocking {
                return Ok(false);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(lock = %self.name, "Gave up waiting for lock");
                        return Ok(false);
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };

            sleep(wait).await;
        }
    }

    /// Releases the lock if this instance still owns the record.
    ///
    /// Returns `Ok(false)` without touching the store when the lock was
    /// never held, or when the lease expired and someone else took it.
    pub async fn release(&self) -> Result<bool, DomainError> {
        if self.state() != LockState::Acquired {
            return Ok(false);
        }

        let current = self.store.get_raw(&self.key).await?;
        self.set_state(LockState::Released);

        if current.as_deref() != Some(self.owner.as_str()) {
            warn!(lock = %self.name, "Lock lease expired before release");
            return Ok(false);
        }

        let released = self.store.forget(&self.key).await?;
        debug!(lock = %self.name, "Lock released");
        Ok(released)
    }

    /// Runs `f` while holding the lock.
    ///
    /// Fails with [`DomainError::LockTimeout`] when the lock cannot be
    /// taken within `timeout`. The lock is released however `f` ends,
    /// including by panic, which is then resumed.
    pub async fn block<T, F, Fut>(&self, timeout: Option<Duration>, f: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        if !self.acquire(true, timeout).await? {
            return Err(DomainError::lock_timeout(&self.name, timeout));
        }

        let outcome = AssertUnwindSafe(async move { f().await })
            .catch_unwind()
            .await;

        if let Err(e) = self.release().await {
            warn!(lock = %self.name, error = %e, "Failed to release lock");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryStore;

    fn store() -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new())
    }

    fn fast_lock(store: &Arc<dyn Store>, name: &str) -> CacheLock {
        CacheLock::new(store.clone(), name).with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_lock_key() {
        assert_eq!(lock_key("report"), "lock:report");
    }

    #[test]
    fn test_owner_tokens_are_per_instance() {
        let store = store();
        let first = CacheLock::new(store.clone(), "job");
        let second = CacheLock::new(store, "job");

        assert_ne!(first.owner(), second.owner());
        assert_eq!(first.key(), second.key());
    }

    #[tokio::test]
    async fn test_two_instances_never_both_hold() {
        let store = store();
        let first = fast_lock(&store, "job");
        let second = fast_lock(&store, "job");

        assert!(first.acquire(false, None).await.unwrap());
        assert!(!second.acquire(false, None).await.unwrap());
        assert_eq!(second.state(), LockState::Unacquired);

        assert!(first.release().await.unwrap());
        assert!(second.acquire(false, None).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_single_winner() {
        let store = store();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lock = fast_lock(&store, "race");
                tokio::spawn(async move { lock.acquire(false, None).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_non_owner_release_is_noop() {
        let store = store();
        let holder = fast_lock(&store, "job").with_lease(Duration::from_millis(30));
        let late = fast_lock(&store, "job");

        assert!(holder.acquire(false, None).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Lease expired, so another instance may take over
        assert!(late.acquire(false, None).await.unwrap());
        assert!(!holder.release().await.unwrap());

        assert_eq!(
            store.get_raw("lock:job").await.unwrap().as_deref(),
            Some(late.owner())
        );
        assert!(late.is_acquired());
    }

    #[tokio::test]
    async fn test_release_without_acquire() {
        let store = store();
        let holder = fast_lock(&store, "job");
        let other = fast_lock(&store, "job");

        assert!(holder.acquire(false, None).await.unwrap());
        assert!(!other.release().await.unwrap());
        assert!(store.has("lock:job").await.unwrap());
    }

    #[tokio::test]
    async fn test_blocking_acquire_times_out() {
        let store = store();
        let holder = fast_lock(&store, "job");
        let waiter = fast_lock(&store, "job");
        assert!(holder.acquire(false, None).await.unwrap());

        let started = std::time::Instant::now();
        let acquired = waiter
            .acquire(true, Some(Duration::from_millis(50)))
            .await
            .unwrap();

        assert!(!acquired);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_blocking_acquire_waits_for_release() {
        let store = store();
        let holder = fast_lock(&store, "job");
        assert!(holder.acquire(false, None).await.unwrap());

        let waiter = fast_lock(&store, "job");
        let waiting = tokio::spawn(async move {
            waiter.acquire(true, Some(Duration::from_secs(5))).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        holder.release().await.unwrap();

        assert!(waiting.await.unwrap());
    }

    #[tokio::test]
    async fn test_released_lock_cannot_be_reacquired() {
        let store = store();
        let lock = fast_lock(&store, "job");

        assert!(lock.acquire(false, None).await.unwrap());
        assert!(lock.release().await.unwrap());
        assert_eq!(lock.state(), LockState::Released);

        let result = lock.acquire(false, None).await;
        assert!(matches!(result, Err(DomainError::Lock { .. })));
    }

    #[tokio::test]
    async fn test_block_runs_and_releases() {
        let store = store();
        let lock = fast_lock(&store, "job");

        let value = lock.block(None, || async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert!(store.missing("lock:job").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_times_out_when_held() {
        let store = store();
        let holder = fast_lock(&store, "job");
        assert!(holder.acquire(false, None).await.unwrap());

        let result = fast_lock(&store, "job")
            .block(Some(Duration::from_millis(20)), || async { Ok(()) })
            .await;

        assert!(result.unwrap_err().is_lock_timeout());
    }

    #[tokio::test]
    async fn test_block_releases_on_error() {
        let store = store();
        let lock = fast_lock(&store, "job");

        let result: Result<(), _> = lock
            .block(None, || async { Err(DomainError::internal("failed")) })
            .await;

        assert!(matches!(result, Err(DomainError::Internal { .. })));
        assert!(store.missing("lock:job").await.unwrap());
    }

    #[tokio::test]
    async fn test_block_releases_on_panic() {
        let store = store();
        let lock = fast_lock(&store, "job");

        let handle = tokio::spawn(async move {
            lock.block(None, || async {
                if true {
                    panic!("critical section failed");
                }
                Ok(())
            })
            .await
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert!(store.missing("lock:job").await.unwrap());
    }
}
