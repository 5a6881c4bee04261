//! In-memory cache store with TTL-based expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

use super::{CacheStore, Counter};

struct Entry {
    value: String,
    expires_at: Duration,
}

/// Thread-safe in-memory store.
///
/// Every operation runs under one mutex, so `add` and `incr` are atomic with
/// respect to each other. Expired entries are dropped lazily on access and by
/// [`MemoryStore::cleanup`].
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store that reads time from the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // Recover from mutex poisoning
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live entries (for monitoring).
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock().values().filter(|e| e.expires_at > now).count()
    }

    /// Check if the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        self.lock().retain(|_, entry| entry.expires_at > now);
    }

    /// Start a background cleanup task.
    ///
    /// Spawns a tokio task that periodically drops expired entries.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                store.cleanup();
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();

        if matches!(entries.get(key), Some(entry) if entry.expires_at > now) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let entries = self.lock();
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock();

        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                let current: u64 = entry.value.parse().map_err(|_| StoreError::Corrupt {
                    key: key.to_string(),
                })?;
                let count = current.saturating_add(1);
                entry.value = count.to_string();
                Ok(Counter {
                    count,
                    ttl_remaining: entry.expires_at - now,
                })
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(Counter {
                    count: 1,
                    ttl_remaining: ttl,
                })
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}
