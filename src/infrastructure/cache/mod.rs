//! Cache infrastructure - Store backends and the services built on them

mod batch;
mod events;
mod factory;
mod file;
mod in_memory;
mod lock;
mod manager;
mod null;
mod redis;
mod repository;
mod tagged;

pub use batch::{AtomicBatch, BatchState};
pub use events::{EventBus, Listener};
pub use factory::{CacheDriver, StoreDescriptor, StoreFactory};
pub use file::{FileStore, FileStoreConfig};
pub use in_memory::{InMemoryStore, InMemoryStoreConfig};
pub use lock::{CacheLock, DEFAULT_LEASE, DEFAULT_POLL_INTERVAL, LOCK_NAMESPACE, LockState, lock_key};
pub use manager::CacheManager;
pub use null::{DisabledStore, NullStore};
pub use redis::{RedisStore, RedisStoreConfig};
pub use repository::CacheRepository;
pub use tagged::TaggedCache;
