//! Timeout-bounded store adapter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::error;

use crate::error::StoreError;

use super::{CacheStore, Counter};

/// Wraps a store so that no call can stall request handling.
///
/// A call exceeding `op_timeout` fails with [`StoreError::Timeout`]; callers
/// treat that like any other store failure and reject the request.
pub struct BoundedStore {
    inner: Arc<dyn CacheStore>,
    op_timeout: Duration,
}

impl BoundedStore {
    /// Wrap `inner`, bounding each operation by `op_timeout`.
    pub fn new(inner: Arc<dyn CacheStore>, op_timeout: Duration) -> Self {
        Self { inner, op_timeout }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.op_timeout.as_millis()).unwrap_or(u64::MAX);
                error!(op, timeout_ms, "Store operation timed out");
                Err(StoreError::Timeout { timeout_ms })
            }
        }
    }
}

#[async_trait]
impl CacheStore for BoundedStore {
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.bounded("add", self.inner.add(key, value, ttl)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.bounded("set", self.inner.set(key, value, ttl)).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        self.bounded("incr", self.inner.incr(key, ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bounded("delete", self.inner.delete(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// Store whose calls never complete in time.
    struct StalledStore;

    #[async_trait]
    impl CacheStore for StalledStore {
        async fn add(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
        async fn incr(&self, _: &str, ttl: Duration) -> Result<Counter, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Counter {
                count: 1,
                ttl_remaining: ttl,
            })
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_passes_through_fast_calls() {
        let store = BoundedStore::new(Arc::new(MemoryStore::new()), Duration::from_millis(250));
        assert!(store.add("k", "v", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let store = BoundedStore::new(Arc::new(StalledStore), Duration::from_millis(20));
        assert_eq!(
            store.add("k", "v", Duration::from_secs(1)).await,
            Err(StoreError::Timeout { timeout_ms: 20 })
        );
        assert!(matches!(
            store.incr("k", Duration::from_secs(1)).await,
            Err(StoreError::Timeout { .. })
        ));
    }
}
