//! Shared cache abstraction.
//!
//! Replay and rate-limit state lives in a cache shared by every gate worker.
//! Components receive the store explicitly as `Arc<dyn CacheStore>`; each
//! operation is a single atomic round-trip on the backend.
//!
//! - [`MemoryStore`]: process-local, for tests and single-process deployments
//! - [`RedisStore`]: shared across processes and hosts
//! - [`BoundedStore`]: wraps any store and bounds every call with a timeout

mod bounded;
mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::bounded::BoundedStore;
pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// State of a counter right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment.
    pub count: u64,
    /// Time until the counter expires.
    pub ttl_remaining: Duration,
}

/// Key/value cache with the atomic primitives the gate relies on.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `value` under `key` only if the key is absent.
    ///
    /// Returns `true` when the value was stored, `false` when the key already existed.
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Read the value under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increment the counter under `key`.
    ///
    /// A missing key is created at 1 with lifetime `ttl` in the same atomic step;
    /// an existing key keeps its original expiry.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError>;

    /// Remove `key` if present.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
