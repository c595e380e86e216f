//! Listener registry for cache events

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::domain::cache::{CacheEvent, CacheEventKind};

/// Callback invoked for every event of the kind it was registered for
pub type Listener = Arc<dyn Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync>;

/// Maps event kinds to listeners.
///
/// Delivery is synchronous and best-effort: a listener that returns an
/// error or panics is logged and skipped, and the cache operation that
/// fired the event is never affected.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<CacheEventKind, Vec<Listener>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = listeners
            .iter()
            .map(|(kind, listeners)| (*kind, listeners.len()))
            .collect();

        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events of `kind`
    pub fn listen<F>(&self, kind: CacheEventKind, listener: F)
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn has_listeners(&self, kind: CacheEventKind) -> bool {
        self.listener_count(kind) > 0
    }

    pub fn listener_count(&self, kind: CacheEventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to its listeners, returning how many succeeded
    pub fn fire(&self, event: &CacheEvent) -> usize {
        // Listeners run outside the lock so they may register others
        let listeners = match self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind)
        {
            Some(listeners) => listeners.clone(),
            None => return 0,
        };

        let mut delivered = 0;

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(kind = %event.kind, key = %event.key, error = %e, "Cache event listener failed");
                }
                Err(_) => {
                    warn!(kind = %event.kind, key = %event.key, "Cache event listener panicked");
                }
            }
        }

        delivered
    }
}
