//! Gate policy: which paths are protected, which methods they accept, and
//! which rate limit applies to a path.

use std::time::Duration;

use serde::Deserialize;

use crate::auth::{DEFAULT_MAX_SKEW_SECONDS, DEFAULT_NONCE_TTL_SECONDS};

/// Methods accepted on protected paths unless configured otherwise.
pub const DEFAULT_ALLOWED_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// A rate limit for every path starting with `path`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateRule {
    /// Path prefix the rule applies to. An empty prefix matches every path.
    pub path: String,
    /// Requests allowed per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// Default limit plus per-endpoint overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    default: RateRule,
    rules: Vec<RateRule>,
}

impl RateLimitPolicy {
    /// A policy applying `limit` per `window_seconds` to every path.
    pub fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            default: RateRule {
                path: String::new(),
                limit,
                window_seconds,
            },
            rules: Vec::new(),
        }
    }

    /// Add an endpoint rule.
    pub fn with_rule(mut self, rule: RateRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The rule with the longest prefix matching `path`, or the default.
    pub fn rule_for(&self, path: &str) -> &RateRule {
        self.rules
            .iter()
            .filter(|rule| path.starts_with(rule.path.as_str()))
            .max_by_key(|rule| rule.path.len())
            .unwrap_or(&self.default)
    }
}

/// Library-level gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum distance between request timestamp and server time.
    pub max_skew_seconds: u64,
    /// Lifetime of a nonce record.
    pub nonce_ttl: Duration,
    /// Upper-case methods accepted on protected paths.
    pub allowed_methods: Vec<String>,
    /// Path prefixes requiring HMAC authentication.
    pub protected_paths: Vec<String>,
    /// Report which authentication check failed (otherwise one generic code).
    pub detailed_errors: bool,
    /// Rate limiting; `None` disables it.
    pub rate_limit: Option<RateLimitPolicy>,
    /// Idempotency record lifetime; `None` disables response replay.
    pub idempotency_ttl: Option<Duration>,
    /// Lifetime of the in-flight marker for an idempotency key.
    pub idempotency_pending_ttl: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_skew_seconds: DEFAULT_MAX_SKEW_SECONDS,
            nonce_ttl: Duration::from_secs(DEFAULT_NONCE_TTL_SECONDS),
            allowed_methods: DEFAULT_ALLOWED_METHODS.iter().map(|m| m.to_string()).collect(),
            protected_paths: vec!["/api/".to_string()],
            detailed_errors: true,
            rate_limit: Some(RateLimitPolicy::new(60, 60)),
            idempotency_ttl: Some(Duration::from_secs(86_400)),
            idempotency_pending_ttl: Duration::from_secs(DEFAULT_MAX_SKEW_SECONDS),
        }
    }
}

impl GateConfig {
    /// Whether `path` requires authentication.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Whether `method` is accepted on protected paths.
    pub fn method_allowed(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let policy = RateLimitPolicy::new(100, 60)
            .with_rule(RateRule {
                path: "/api/".into(),
                limit: 60,
                window_seconds: 60,
            })
            .with_rule(RateRule {
                path: "/api/webhooks/".into(),
                limit: 10,
                window_seconds: 1,
            });

        assert_eq!(policy.rule_for("/api/webhooks/stripe").limit, 10);
        assert_eq!(policy.rule_for("/api/patients").limit, 60);
        assert_eq!(policy.rule_for("/health").limit, 100);
        assert_eq!(policy.rule_for("/health").path, "");
    }

    #[test]
    fn test_protection_and_methods() {
        let config = GateConfig::default();
        assert!(config.is_protected("/api/soap/notes"));
        assert!(!config.is_protected("/health"));
        assert!(config.method_allowed("post"));
        assert!(config.method_allowed("DELETE"));
        assert!(!config.method_allowed("GET"));
    }
}
