//! Fixed-window rate limiting.
//!
//! Each `(identifier, window)` pair owns a counter in the shared store. The
//! first request creates the counter with the window as its TTL; when the TTL
//! expires the window resets.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::StoreError;
use crate::store::CacheStore;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Configured limit.
    pub limit: u64,
    /// Seconds until the window resets (at least 1).
    pub retry_after: u64,
}

/// Shared-store fixed-window rate limiter.
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Count a request from `identifier` and decide whether it is within `limit`.
    ///
    /// The counter is incremented even when the request is rejected, so a
    /// client that keeps hammering stays blocked until the window ends.
    pub async fn allow(
        &self,
        identifier: &str,
        limit: u64,
        window_seconds: u64,
    ) -> Result<RateDecision, StoreError> {
        let key = format!("rate:{}:{}", identifier, window_seconds);
        let counter = self
            .store
            .incr(&key, Duration::from_secs(window_seconds))
            .await?;

        let ttl = counter.ttl_remaining;
        let retry_after = (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1);
        let decision = RateDecision {
            allowed: counter.count <= limit,
            count: counter.count,
            limit,
            retry_after,
        };

        if !decision.allowed {
            debug!(
                identifier,
                count = decision.count,
                limit,
                "Rate limit exceeded"
            );
        }
        Ok(decision)
    }
}
