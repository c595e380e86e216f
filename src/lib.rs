//! PMP Cache
//!
//! A caching subsystem with interchangeable backends:
//! - In-memory, file, Redis and null stores behind one `Store` contract
//! - A `CacheManager` registry with proxies, events and tagged views
//! - Store-backed advisory locks and stampede-protected `flexible` fetches
//! - Buffered batches and a prefixed repository with pluggable serializers

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use domain::DomainError;
pub use infrastructure::cache::CacheManager;
