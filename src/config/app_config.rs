use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::cache::SerializerKind;
use crate::infrastructure::cache::StoreDescriptor;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Cache manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Name of the default store
    pub default: String,
    /// Prefix applied to every key written through the manager
    pub prefix: Option<String>,
    pub serializer: SerializerKind,
    pub stores: HashMap<String, StoreDescriptor>,
    pub lock: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Maximum time a lock is held before it expires on its own
    pub lease_secs: u64,
    /// Delay between attempts while waiting for a lock
    pub poll_interval_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        let mut stores = HashMap::new();
        stores.insert("memory".to_string(), StoreDescriptor::memory());
        stores.insert("file".to_string(), StoreDescriptor::file("storage/cache"));

        Self {
            default: "memory".to_string(),
            prefix: None,
            serializer: SerializerKind::default(),
            stores,
            lock: LockSettings::default(),
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_secs: 30,
            poll_interval_ms: 100,
        }
    }
}

impl LockSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
