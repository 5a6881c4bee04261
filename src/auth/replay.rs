//! Nonce tracking for replay attack prevention.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{AuthErrorKind, GateError, StoreError};
use crate::store::CacheStore;

/// Default lifetime of a nonce record.
pub const DEFAULT_NONCE_TTL_SECONDS: u64 = 600;

const MAX_NONCE_LEN: usize = 256;

/// Enforces at-most-once use of a nonce within a scope.
///
/// Records live in the shared store under `nonce:{scope}:{nonce}`. Scope is
/// normally the request path, so the same nonce sent to two endpoints does not
/// collide.
pub struct ReplayGuard {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ReplayGuard {
    /// Create a guard whose records expire after `ttl`.
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Default record lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Validate nonce syntax: 1-256 printable ASCII characters without `|`, `:`
    /// or whitespace.
    pub fn validate_nonce(nonce: &str) -> Result<(), GateError> {
        let well_formed = !nonce.is_empty()
            && nonce.len() <= MAX_NONCE_LEN
            && nonce
                .bytes()
                .all(|b| b.is_ascii_graphic() && b != b'|' && b != b':');
        if well_formed {
            Ok(())
        } else {
            Err(GateError::auth(AuthErrorKind::MalformedNonce))
        }
    }

    fn key(scope: &str, nonce: &str) -> String {
        format!("nonce:{}:{}", scope, nonce)
    }

    /// Atomically test and mark a nonce.
    ///
    /// Returns `true` if the nonce was fresh and is now marked, `false` if it
    /// was already used (the stored record is left untouched).
    pub async fn check_and_mark(
        &self,
        scope: &str,
        nonce: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let fresh = self.store.add(&Self::key(scope, nonce), "1", ttl).await?;
        if !fresh {
            debug!(scope, "Nonce replay detected");
        }
        Ok(fresh)
    }

    /// Whether a nonce is currently recorded, without marking it.
    pub async fn is_used(&self, scope: &str, nonce: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&Self::key(scope, nonce)).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn guard() -> (ReplayGuard, ManualClock) {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        (
            ReplayGuard::new(store, Duration::from_secs(DEFAULT_NONCE_TTL_SECONDS)),
            clock,
        )
    }

    #[tokio::test]
    async fn test_new_nonce_accepted_once() {
        let (guard, _) = guard();
        let ttl = guard.ttl();
        assert!(guard.check_and_mark("/api/a", "nonce1", ttl).await.unwrap());
        assert!(!guard.check_and_mark("/api/a", "nonce1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_scope_separates_nonces() {
        let (guard, _) = guard();
        let ttl = guard.ttl();
        assert!(guard.check_and_mark("/api/a", "n", ttl).await.unwrap());
        assert!(guard.check_and_mark("/api/b", "n", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_nonce_accepted_again() {
        let (guard, clock) = guard();
        assert!(guard
            .check_and_mark("/api/a", "n", Duration::from_secs(10))
            .await
            .unwrap());

        clock.advance(Duration::from_secs(11));
        assert!(!guard.is_used("/api/a", "n").await.unwrap());
        assert!(guard
            .check_and_mark("/api/a", "n", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_is_used_does_not_mark() {
        let (guard, _) = guard();
        assert!(!guard.is_used("/api/a", "n").await.unwrap());
        assert!(!guard.is_used("/api/a", "n").await.unwrap());
        assert!(guard.check_and_mark("/api/a", "n", guard.ttl()).await.unwrap());
        assert!(guard.is_used("/api/a", "n").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_exactly_one_fresh() {
        let (guard, _) = guard();
        let guard = Arc::new(guard);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let guard = Arc::clone(&guard);
                tokio::spawn(async move {
                    guard
                        .check_and_mark("/api/a", "shared", Duration::from_secs(60))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut fresh = 0;
        for handle in handles {
            if handle.await.unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[test]
    fn test_validate_nonce() {
        assert!(ReplayGuard::validate_nonce("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(ReplayGuard::validate_nonce("q1w2e3+/=").is_ok());
        for bad in ["", "a b", "a|b", "a:b", "tab\there"] {
            assert!(ReplayGuard::validate_nonce(bad).is_err(), "{bad:?}");
        }
        assert!(ReplayGuard::validate_nonce(&"x".repeat(257)).is_err());
    }
}
