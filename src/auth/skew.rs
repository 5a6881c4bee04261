//! Timestamp window enforcement.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{AuthErrorKind, GateError};

/// Default maximum distance between a request timestamp and server time.
pub const DEFAULT_MAX_SKEW_SECONDS: u64 = 300;

/// Rejects requests whose claimed timestamp is too far from server time.
///
/// Both directions count: a timestamp far in the future is rejected like a
/// stale one. The boundary is inclusive, a skew of exactly `max_skew` passes.
pub struct SkewValidator {
    max_skew: u64,
    clock: Arc<dyn Clock>,
}

impl SkewValidator {
    pub fn new(max_skew: u64, clock: Arc<dyn Clock>) -> Self {
        Self { max_skew, clock }
    }

    /// Parse a timestamp header value (integer Unix seconds).
    pub fn parse_timestamp(raw: &str) -> Result<i64, GateError> {
        raw.trim().parse::<i64>().map_err(|_| {
            GateError::auth(AuthErrorKind::MalformedTimestamp {
                value: raw.chars().take(32).collect(),
            })
        })
    }

    /// Whether `timestamp` lies within the window around `now`.
    pub fn is_valid(&self, now: i64, timestamp: i64) -> bool {
        Self::skew(now, timestamp) <= self.max_skew
    }

    /// Check `timestamp` against the current clock.
    pub fn check(&self, timestamp: i64) -> Result<(), GateError> {
        let now = self.clock.unix_seconds();
        if self.is_valid(now, timestamp) {
            return Ok(());
        }
        Err(GateError::auth(AuthErrorKind::TimestampSkew {
            skew_seconds: Self::skew(now, timestamp),
        }))
    }

    fn skew(now: i64, timestamp: i64) -> u64 {
        (i128::from(now) - i128::from(timestamp))
            .unsigned_abs()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_700_000_000;

    fn validator() -> SkewValidator {
        SkewValidator::new(
            DEFAULT_MAX_SKEW_SECONDS,
            Arc::new(ManualClock::at_unix(NOW as u64)),
        )
    }

    #[test]
    fn test_boundary_past() {
        let v = validator();
        assert!(v.is_valid(NOW, NOW - 300));
        assert!(!v.is_valid(NOW, NOW - 301));
    }

    #[test]
    fn test_boundary_future() {
        let v = validator();
        assert!(v.is_valid(NOW, NOW + 300));
        assert!(!v.is_valid(NOW, NOW + 301));
    }

    #[test]
    fn test_check_reports_skew() {
        let err = validator().check(NOW - 1000).unwrap_err();
        assert!(matches!(
            err,
            GateError::Auth {
                kind: AuthErrorKind::TimestampSkew { skew_seconds: 1000 }
            }
        ));
        assert!(validator().check(NOW).is_ok());
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let v = validator();
        assert!(!v.is_valid(i64::MAX, i64::MIN));
        assert!(!v.is_valid(NOW, i64::MIN));
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(SkewValidator::parse_timestamp(" 1700000000 ").unwrap(), NOW);
        for bad in ["", "abc", "17e8", "1700000000.5"] {
            assert!(matches!(
                SkewValidator::parse_timestamp(bad),
                Err(GateError::Auth {
                    kind: AuthErrorKind::MalformedTimestamp { .. }
                })
            ));
        }
    }
}
