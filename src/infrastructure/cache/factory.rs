//! Store factory for runtime driver selection

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::cache::Store;
use crate::domain::DomainError;

use super::file::{FileStore, FileStoreConfig};
use super::in_memory::{InMemoryStore, InMemoryStoreConfig};
use super::null::NullStore;
use super::redis::{RedisStore, RedisStoreConfig};

const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;

/// Supported store drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheDriver {
    /// In-memory store using moka
    #[default]
    Memory,
    /// One file per key under a directory
    File,
    /// Redis
    Redis,
    /// Discards everything
    Null,
}

impl std::fmt::Display for CacheDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheDriver::Memory => write!(f, "memory"),
            CacheDriver::File => write!(f, "file"),
            CacheDriver::Redis => write!(f, "redis"),
            CacheDriver::Null => write!(f, "null"),
        }
    }
}

impl std::str::FromStr for CacheDriver {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in_memory" | "in-memory" | "array" => Ok(CacheDriver::Memory),
            "file" => Ok(CacheDriver::File),
            "redis" | "remote-kv" => Ok(CacheDriver::Redis),
            "null" | "none" => Ok(CacheDriver::Null),
            _ => Err(DomainError::configuration(format!(
                "Unknown cache driver: {}. Valid drivers: memory, file, redis, null",
                s
            ))),
        }
    }
}

/// Configuration of a single named store
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreDescriptor {
    /// Driver name, resolved when the store is built
    pub driver: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
    pub database: Option<u32>,
    /// Key prefix applied by the backend
    pub prefix: Option<String>,
    /// Directory for the file driver
    pub path: Option<PathBuf>,
    /// Driver-specific settings (`max_capacity` for memory, `extension` for file)
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl StoreDescriptor {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    pub fn memory() -> Self {
        Self::new("memory")
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new("file")
        }
    }

    pub fn redis(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::new("redis")
        }
    }

    pub fn null() -> Self {
        Self::new("null")
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    /// Parses the driver name
    pub fn driver(&self) -> Result<CacheDriver, DomainError> {
        self.driver.parse()
    }

    fn option_u64(&self, name: &str) -> Result<Option<u64>, DomainError> {
        match self.options.get(name) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                DomainError::configuration(format!(
                    "Option '{}' must be a non-negative integer",
                    name
                ))
            }),
        }
    }

    fn option_str(&self, name: &str) -> Result<Option<&str>, DomainError> {
        match self.options.get(name) {
            None => Ok(None),
            Some(value) => value.as_str().map(Some).ok_or_else(|| {
                DomainError::configuration(format!("Option '{}' must be a string", name))
            }),
        }
    }
}

/// Factory for creating stores from descriptors
#[derive(Debug, Default)]
pub struct StoreFactory;

impl StoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// Builds the store described by `descriptor`
    pub async fn create(&self, descriptor: &StoreDescriptor) -> Result<Arc<dyn Store>, DomainError> {
        let driver = descriptor.driver()?;
        debug!(%driver, "Creating cache store");

        match driver {
            CacheDriver::Memory => {
                let mut config = InMemoryStoreConfig::default();

                if let Some(capacity) = descriptor.option_u64("max_capacity")? {
                    config = config.with_max_capacity(capacity);
                }

                Ok(Arc::new(InMemoryStore::with_config(config)))
            }
            CacheDriver::File => {
                let path = descriptor.path.clone().ok_or_else(|| {
                    DomainError::configuration("A path is required for the file cache driver")
                })?;

                let mut config = FileStoreConfig::new(path);

                if let Some(extension) = descriptor.option_str("extension")? {
                    config = config.with_extension(extension);
                }

                Ok(Arc::new(FileStore::new(config)))
            }
            CacheDriver::Redis => {
                let mut config = RedisStoreConfig::from_parts(
                    descriptor.host.as_deref().unwrap_or(DEFAULT_REDIS_HOST),
                    descriptor.port.unwrap_or(DEFAULT_REDIS_PORT),
                    descriptor.password.as_deref(),
                    descriptor.database,
                );

                if let Some(prefix) = &descriptor.prefix {
                    config = config.with_key_prefix(prefix.clone());
                }

                Ok(Arc::new(RedisStore::new(config).await?))
            }
            CacheDriver::Null => Ok(Arc::new(NullStore)),
        }
    }
}
