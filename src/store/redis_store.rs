//! Redis-backed cache store.
//!
//! Shares replay and rate-limit state between every gate process pointed at the
//! same Redis instance.
//!
//! ## Atomicity
//!
//! - `add` is a single `SET key value NX PX ttl`
//! - `incr` runs a Lua script that increments and, on creation, sets the expiry
//!   in the same server-side step, so a new window cannot be created without a TTL
//!
//! Connections are multiplexed through `redis::aio::ConnectionManager`, which
//! reconnects transparently after a dropped connection.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use tracing::{debug, warn};

use crate::error::StoreError;

use super::{CacheStore, Counter};

/// Increment, set the window expiry on creation, report count and remaining TTL.
const INCR_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every key (default: "helssa-gate:").
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "helssa-gate:".to_string(),
        }
    }
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    incr_script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn unavailable(e: RedisError) -> StoreError {
    warn!(error = %e, "Redis operation failed");
    StoreError::Unavailable {
        message: e.to_string(),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisStore {
    /// Connect to Redis with the default key prefix.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(unavailable)?;
        let connection = ConnectionManager::new(client).await.map_err(unavailable)?;
        debug!(prefix = %config.key_prefix, "Connected to Redis store");

        Ok(Self {
            connection,
            config,
            incr_script: Script::new(INCR_WITH_TTL),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        conn.get(self.key(key)).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let mut conn = self.connection.clone();
        let (count, ttl_ms): (u64, i64) = self
            .incr_script
            .key(self.key(key))
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(Counter {
            count,
            ttl_remaining: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.key(key)).await.map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests need a Redis server at redis://127.0.0.1/.
    // Run with: cargo test redis_store -- --ignored

    async fn store(test_name: &str) -> RedisStore {
        RedisStore::connect_with_config(
            "redis://127.0.0.1/",
            RedisStoreConfig {
                key_prefix: format!("helssa-gate-test:{}:{}:", test_name, uuid::Uuid::new_v4()),
            },
        )
        .await
        .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_add_is_set_if_absent() {
        let store = store("add").await;
        assert!(store.add("n", "1", Duration::from_secs(30)).await.unwrap());
        assert!(!store.add("n", "1", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_incr_sets_window_once() {
        let store = store("incr").await;
        let first = store.incr("c", Duration::from_secs(60)).await.unwrap();
        let second = store.incr("c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.ttl_remaining <= Duration::from_secs(60));
        assert!(second.ttl_remaining > Duration::ZERO);
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_set_and_delete() {
        let store = store("set").await;
        store.set("k", "v", Duration::from_secs(30)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
