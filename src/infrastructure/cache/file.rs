//! File-backed store implementation

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::cache::{CacheEntry, Store, parse_counter};
use crate::domain::DomainError;

/// Configuration for the file store
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory holding the cache files
    pub path: PathBuf,
    /// File extension identifying files owned by the store
    pub extension: String,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storage/cache"),
            extension: "cache".to_string(),
        }
    }
}

impl FileStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// Store keeping one JSON-encoded [`CacheEntry`] per file.
///
/// The file name is the SHA-256 of the key, so arbitrary keys map to safe
/// names. Single writes replace the file atomically via rename, but
/// `increment` is a read-modify-write with no cross-process lock and
/// `flush` can race with writers that are still in flight.
#[derive(Debug, Clone)]
pub struct FileStore {
    config: FileStoreConfig,
}

impl FileStore {
    pub fn new(config: FileStoreConfig) -> Self {
        Self { config }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::new(FileStoreConfig::new(path))
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.config
            .path
            .join(format!("{}.{}", hash, self.config.extension))
    }

    fn owns(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == self.config.extension.as_str())
    }

    /// Reads a live entry, deleting the file if it is expired or unreadable
    async fn read_entry(&self, path: &Path) -> Option<CacheEntry> {
        let contents = match fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache file");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding corrupt cache file");
                self.remove_file(path).await;
                return None;
            }
        };

        if entry.is_expired() {
            debug!(path = %path.display(), "Removing expired cache file");
            self.remove_file(path).await;
            return None;
        }

        Some(entry)
    }

    async fn write_entry(&self, path: &Path, entry: &CacheEntry) -> std::io::Result<()> {
        let contents = serde_json::to_vec(entry)?;
        fs::create_dir_all(&self.config.path).await?;

        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&temp_path, contents).await?;

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                false
            }
        }
    }
}

#[async_trait]
impl Store for FileStore {
    fn driver(&self) -> &'static str {
        "file"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let path = self.path_for(key);
        Ok(self.read_entry(&path).await.map(|entry| entry.value))
    }

    async fn put_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let path = self.path_for(key);

        match self.write_entry(&path, &CacheEntry::new(value, ttl)).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Failed to write cache file");
                Ok(false)
            }
        }
    }

    async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.remove_file(&self.path_for(key)).await)
    }

    async fn flush(&self) -> Result<bool, DomainError> {
        let mut dir = match fs::read_dir(&self.config.path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => {
                warn!(path = %self.config.path.display(), error = %e, "Failed to list cache directory");
                return Ok(false);
            }
        };

        let mut all_removed = true;

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read cache directory entry");
                    all_removed = false;
                    break;
                }
            };

            let path = entry.path();

            if self.owns(&path) && !self.remove_file(&path).await && path.exists() {
                all_removed = false;
            }
        }

        Ok(all_removed)
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        let path = self.path_for(key);

        let next = match self.read_entry(&path).await {
            Some(current) => {
                let value = parse_counter(&current.value).saturating_add(by);
                current.with_value(value.to_string())
            }
            None => CacheEntry::forever(by.to_string()),
        };

        self.write_entry(&path, &next).await.map_err(|e| {
            DomainError::storage(format!("Failed to increment key '{}': {}", key, e))
        })?;

        Ok(parse_counter(&next.value))
    }
}
