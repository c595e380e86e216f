//! Redis store implementation

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{
    AsyncCommands, Client, ConnectionAddr, ConnectionInfo, IntoConnectionInfo,
    RedisConnectionInfo, Script,
};
use tracing::warn;

use crate::domain::cache::{Store, parse_counter, prefixed_key};
use crate::domain::DomainError;

const MAX_INCREMENT_ATTEMPTS: usize = 8;

/// Replaces KEYS[1] with ARGV[2] only while it still holds ARGV[1]
const COMPARE_AND_SET_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
    return 1
end
return 0
"#;

/// Configuration for the Redis store
#[derive(Clone)]
pub struct RedisStoreConfig {
    /// Address, database and credentials
    pub connection: ConnectionInfo,
    /// Key prefix for namespacing
    pub key_prefix: Option<String>,
}

impl fmt::Debug for RedisStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStoreConfig")
            .field("addr", &self.connection.addr)
            .field("database", &self.connection.redis.db)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self::from_parts("127.0.0.1", 6379, None, None)
    }
}

impl RedisStoreConfig {
    /// Parses a connection URL such as `redis://127.0.0.1:6379/0`
    pub fn from_url(url: &str) -> Result<Self, DomainError> {
        let connection = url.into_connection_info().map_err(|e| {
            DomainError::configuration(format!("Invalid Redis connection URL: {}", e))
        })?;

        Ok(Self {
            connection,
            key_prefix: None,
        })
    }

    /// Builds the connection from its parts; the password is passed as is
    pub fn from_parts(
        host: &str,
        port: u16,
        password: Option<&str>,
        database: Option<u32>,
    ) -> Self {
        let connection = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                db: i64::from(database.unwrap_or(0)),
                password: password.filter(|p| !p.is_empty()).map(String::from),
                ..Default::default()
            },
        };

        Self {
            connection,
            key_prefix: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}

/// Redis store.
///
/// `add` maps to `SET NX`, so locks built on this store get a true atomic
/// check-then-set. Connection failures on reads are reported as misses and
/// on writes as `false`.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("connection", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    pub async fn new(config: RedisStoreConfig) -> Result<Self, DomainError> {
        let client = Client::open(config.connection.clone()).map_err(|e| {
            DomainError::configuration(format!("Invalid Redis connection: {}", e))
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| DomainError::cache(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { connection, config })
    }

    fn prefix_key(&self, key: &str) -> String {
        prefixed_key(self.config.key_prefix.as_deref(), key)
    }

    /// Counter value after adding `by` to a value INCRBY refused
    fn next_counter(current: &str, by: i64) -> i64 {
        parse_counter(current).saturating_add(by)
    }

    fn set_command(key: &str, value: &str, ttl: Option<Duration>) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);

        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }

        cmd
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, redis::RedisError> {
        let mut conn = self.connection.clone();
        let mut cursor = 0u64;
        let mut total_deleted = 0usize;

        loop {
            let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                total_deleted += deleted;
            }

            cursor = new_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(total_deleted)
    }
}

#[async_trait]
impl Store for RedisStore {
    fn driver(&self) -> &'static str {
        "redis"
    }

    fn supports_atomic_add(&self) -> bool {
        true
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        let mut conn = self.connection.clone();

        let result: redis::RedisResult<Option<String>> = conn.get(self.prefix_key(key)).await;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(key, error = %e, "Redis read failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn put_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        match Self::set_command(&self.prefix_key(key), value, ttl)
            .query_async::<()>(&mut conn)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(key, error = %e, "Redis write failed");
                Ok(false)
            }
        }
    }

    async fn add_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        // Redis replies "OK" when the key was set and nil when it existed
        let mut cmd = Self::set_command(&self.prefix_key(key), value, ttl);
        cmd.arg("NX");

        match cmd.query_async::<Option<String>>(&mut conn).await {
            Ok(reply) => Ok(reply.is_some()),
            Err(e) => {
                warn!(key, error = %e, "Redis SET NX failed");
                Ok(false)
            }
        }
    }

    async fn forget(&self, key: &str) -> Result<bool, DomainError> {
        let mut conn = self.connection.clone();

        let result: redis::RedisResult<i64> = conn.del(self.prefix_key(key)).await;

        match result {
            Ok(deleted) => Ok(deleted > 0),
            Err(e) => {
                warn!(key, error = %e, "Redis delete failed");
                Ok(false)
            }
        }
    }

    async fn flush(&self) -> Result<bool, DomainError> {
        // Without a prefix the store owns the whole database
        let result = match &self.config.key_prefix {
            Some(_) => self.delete_matching(&self.prefix_key("*")).await.map(|_| ()),
            None => {
                let mut conn = self.connection.clone();
                redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await
            }
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Redis flush failed");
                Ok(false)
            }
        }
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, DomainError> {
        let prefixed = self.prefix_key(key);
        let mut conn = self.connection.clone();
        let swap = Script::new(COMPARE_AND_SET_SCRIPT);
        let failed =
            |e: redis::RedisError| DomainError::cache(format!("Failed to increment key '{}': {}", key, e));

        for _ in 0..MAX_INCREMENT_ATTEMPTS {
            let result: redis::RedisResult<i64> = conn.incr(&prefixed, by).await;

            match result {
                Ok(value) => return Ok(value),
                // INCRBY refuses non-integer values and overflow
                Err(e) if e.kind() == redis::ErrorKind::ResponseError => {}
                Err(e) => return Err(failed(e)),
            }

            let current: redis::RedisResult<Option<String>> = conn.get(&prefixed).await;
            let Some(current) = current.map_err(failed)? else {
                continue;
            };

            let next = Self::next_counter(&current, by);
            let swapped: redis::RedisResult<i64> = swap
                .key(&prefixed)
                .arg(&current)
                .arg(next)
                .invoke_async(&mut conn)
                .await;

            if swapped.map_err(failed)? == 1 {
                return Ok(next);
            }
        }

        Err(DomainError::cache(format!(
            "Failed to increment key '{}': value changed during every attempt",
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::StoreExt;

    // These tests require a running Redis instance:
    // cargo test -- --ignored

    fn get_test_config() -> RedisStoreConfig {
        RedisStoreConfig::from_url("redis://127.0.0.1:6379")
            .unwrap()
            .with_key_prefix("pmp-cache-test")
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_put_and_get() {
        let store = RedisStore::new(get_test_config()).await.unwrap();

        store
            .put("key1", &"value1", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        let result: Option<String> = store.get("key1").await.unwrap();
        assert_eq!(result, Some("value1".to_string()));

        store.forget("key1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_increment() {
        let store = RedisStore::new(get_test_config()).await.unwrap();
        store.forget("counter").await.unwrap();

        assert_eq!(store.increment("counter", 1).await.unwrap(), 1);
        assert_eq!(store.increment("counter", 5).await.unwrap(), 6);
        assert_eq!(store.decrement("counter", 2).await.unwrap(), 4);

        store.forget("counter").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_add() {
        let store = RedisStore::new(get_test_config()).await.unwrap();
        store.forget("nx_key").await.unwrap();

        assert!(store.add("nx_key", &"value1", None).await.unwrap());
        assert!(!store.add("nx_key", &"value2", None).await.unwrap());

        store.forget("nx_key").await.unwrap();
    }

    #[test]
    fn test_config_from_parts() {
        let config = RedisStoreConfig::from_parts("cache.local", 6380, Some("secret"), Some(2));
        assert_eq!(
            config.connection.addr,
            ConnectionAddr::Tcp("cache.local".to_string(), 6380)
        );
        assert_eq!(config.connection.redis.db, 2);
        assert_eq!(config.connection.redis.password.as_deref(), Some("secret"));

        let config = RedisStoreConfig::from_parts("localhost", 6379, None, None);
        assert_eq!(config.connection.redis.db, 0);
        assert!(config.connection.redis.password.is_none());
    }

    #[test]
    fn test_config_from_parts_keeps_reserved_password_characters() {
        let password = "p@ss:w/rd?#%";
        let config = RedisStoreConfig::from_parts("cache.local", 6380, Some(password), Some(3));

        assert_eq!(config.connection.redis.password.as_deref(), Some(password));
        assert_eq!(
            config.connection.addr,
            ConnectionAddr::Tcp("cache.local".to_string(), 6380)
        );
        assert_eq!(config.connection.redis.db, 3);
        assert!(!format!("{:?}", config).contains(password));
    }

    #[test]
    fn test_config_from_url() {
        let config = RedisStoreConfig::from_url("redis://:secret@cache.local:6380/2").unwrap();
        assert_eq!(config.connection.redis.db, 2);
        assert_eq!(config.connection.redis.password.as_deref(), Some("secret"));

        assert!(matches!(
            RedisStoreConfig::from_url("not a url"),
            Err(DomainError::Configuration { .. })
        ));
    }

    #[test]
    fn test_next_counter_matches_other_stores() {
        assert_eq!(RedisStore::next_counter("2.5", 1), 3);
        assert_eq!(RedisStore::next_counter("\"7\"", 1), 8);
        assert_eq!(RedisStore::next_counter("{\"name\":\"a\"}", 4), 4);
        assert_eq!(RedisStore::next_counter(&i64::MAX.to_string(), 1), i64::MAX);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_increment_non_integer_value() {
        let store = RedisStore::new(get_test_config()).await.unwrap();

        store.put("float_counter", &2.5, None).await.unwrap();
        assert_eq!(store.increment("float_counter", 1).await.unwrap(), 3);

        store.put("quoted_counter", &"7", None).await.unwrap();
        assert_eq!(store.increment("quoted_counter", 1).await.unwrap(), 8);

        store.forget("float_counter").await.unwrap();
        store.forget("quoted_counter").await.unwrap();
    }

    #[test]
    fn test_set_command_with_ttl() {
        let cmd = RedisStore::set_command("k", "v", Some(Duration::from_secs(2)));
        let packed = String::from_utf8(cmd.get_packed_command()).unwrap();

        assert!(packed.contains("SET"));
        assert!(packed.contains("PX"));
        assert!(packed.contains("2000"));
    }
}
