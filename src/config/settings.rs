//! Configuration settings for the HELSSA gate.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    FileSecret, SecretProvider, StaticSecret, DEFAULT_MAX_SKEW_SECONDS, DEFAULT_NONCE_TTL_SECONDS,
};
use crate::error::{ConfigReason, GateError};
use crate::gate::{GateConfig, RateLimitPolicy, RateRule, DEFAULT_ALLOWED_METHODS};

/// Main configuration structure for the gate daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub socket: SocketConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Path to the Unix socket file.
    pub path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// File holding the shared HMAC secret.
    pub secret_path: Option<PathBuf>,
    /// Environment variable holding the shared secret, used when no file is set.
    pub secret_env: Option<String>,
    /// Maximum distance between request timestamp and server time.
    #[serde(default = "default_max_skew")]
    pub max_skew_seconds: u64,
    /// Nonce time-to-live in seconds.
    #[serde(default = "default_nonce_ttl")]
    pub nonce_ttl_seconds: u64,
    /// Methods accepted on protected paths.
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
    /// Path prefixes requiring authentication.
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
    /// Report the specific authentication failure to callers.
    #[serde(default = "default_true")]
    pub detailed_errors: bool,
}

/// Rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests per window for paths without a specific rule.
    #[serde(default = "default_rate_limit")]
    pub limit: u64,
    #[serde(default = "default_rate_window")]
    pub window_seconds: u64,
    /// Per-endpoint overrides; the longest matching prefix wins.
    #[serde(default)]
    pub rules: Vec<RateRule>,
}

/// Shared store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Shared store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Prefix for every Redis key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Upper bound on a single store operation.
    #[serde(default = "default_op_timeout")]
    pub op_timeout_ms: u64,
    /// Sweep interval for expired in-memory entries.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

/// Idempotency-key configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_idempotency_ttl")]
    pub ttl_seconds: u64,
    /// How long a key stays claimed while its first request is in flight.
    #[serde(default = "default_idempotency_pending_ttl")]
    pub pending_ttl_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrent requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path to the audit log file.
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,
}

// Default value functions
fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_skew() -> u64 {
    DEFAULT_MAX_SKEW_SECONDS
}

fn default_nonce_ttl() -> u64 {
    DEFAULT_NONCE_TTL_SECONDS
}

fn default_allowed_methods() -> Vec<String> {
    DEFAULT_ALLOWED_METHODS.iter().map(|m| m.to_string()).collect()
}

fn default_protected_paths() -> Vec<String> {
    vec!["/api/".to_string()]
}

fn default_rate_limit() -> u64 {
    60
}

fn default_rate_window() -> u64 {
    60
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "helssa-gate:".to_string()
}

fn default_op_timeout() -> u64 {
    250
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_idempotency_ttl() -> u64 {
    86_400
}

fn default_idempotency_pending_ttl() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_message_size() -> usize {
    1_048_576 // 1MB
}

fn default_max_concurrent() -> usize {
    100
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("/var/log/helssa/gate-audit.log")
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: default_rate_limit(),
            window_seconds: default_rate_window(),
            rules: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            op_timeout_ms: default_op_timeout(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_idempotency_ttl(),
            pending_ttl_seconds: default_idempotency_pending_ttl(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_concurrent_requests: default_max_concurrent(),
            socket_timeout_seconds: default_socket_timeout(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: default_audit_log_path(),
        }
    }
}

fn config_error(message: String) -> GateError {
    GateError::config(ConfigReason::InvalidSettings, message)
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_toml(&content).map_err(|e| {
            config_error(format!("Invalid config file '{}': {}", path.display(), e))
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, GateError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| config_error(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), GateError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(config_error(format!(
                "Invalid log level '{}'. Valid levels: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(config_error(format!(
                "Invalid log format '{}'. Valid formats: {:?}",
                self.logging.format, valid_formats
            )));
        }

        if !self.socket.permissions.chars().all(|c| c.is_ascii_digit()) {
            return Err(config_error(format!(
                "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                self.socket.permissions
            )));
        }

        let security = &self.security;
        if security.secret_path.is_none() && security.secret_env.is_none() {
            return Err(config_error(
                "One of security.secret_path or security.secret_env must be set".to_string(),
            ));
        }

        if let Some(method) = security
            .allowed_methods
            .iter()
            .find(|m| m.is_empty() || !m.bytes().all(|b| b.is_ascii_alphabetic()))
        {
            return Err(config_error(format!("Invalid HTTP method '{}'", method)));
        }

        for (name, value) in [
            ("security.max_skew_seconds", security.max_skew_seconds),
            ("security.nonce_ttl_seconds", security.nonce_ttl_seconds),
            ("rate_limit.window_seconds", self.rate_limit.window_seconds),
            ("rate_limit.limit", self.rate_limit.limit),
            ("store.op_timeout_ms", self.store.op_timeout_ms),
            ("idempotency.ttl_seconds", self.idempotency.ttl_seconds),
            (
                "idempotency.pending_ttl_seconds",
                self.idempotency.pending_ttl_seconds,
            ),
        ] {
            if value == 0 {
                return Err(config_error(format!("{} must be greater than 0", name)));
            }
        }

        if let Some(rule) = self
            .rate_limit
            .rules
            .iter()
            .find(|r| r.limit == 0 || r.window_seconds == 0)
        {
            return Err(config_error(format!(
                "Rate limit rule for '{}' needs a non-zero limit and window",
                rule.path
            )));
        }

        Ok(())
    }

    /// Library-level gate configuration derived from these settings.
    pub fn gate_config(&self) -> GateConfig {
        let rate_limit = self.rate_limit.enabled.then(|| {
            self.rate_limit.rules.iter().cloned().fold(
                RateLimitPolicy::new(self.rate_limit.limit, self.rate_limit.window_seconds),
                RateLimitPolicy::with_rule,
            )
        });

        GateConfig {
            max_skew_seconds: self.security.max_skew_seconds,
            nonce_ttl: Duration::from_secs(self.security.nonce_ttl_seconds),
            allowed_methods: self
                .security
                .allowed_methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            protected_paths: self.security.protected_paths.clone(),
            detailed_errors: self.security.detailed_errors,
            rate_limit,
            idempotency_ttl: self
                .idempotency
                .enabled
                .then(|| Duration::from_secs(self.idempotency.ttl_seconds)),
            idempotency_pending_ttl: Duration::from_secs(self.idempotency.pending_ttl_seconds),
        }
    }

    /// Where the shared secret comes from. A file takes precedence.
    pub fn secret_provider(&self) -> Arc<dyn SecretProvider> {
        match (&self.security.secret_path, &self.security.secret_env) {
            (Some(path), _) => Arc::new(FileSecret::new(path.clone())),
            (None, Some(var)) => Arc::new(StaticSecret::from_env(var)),
            (None, None) => Arc::new(StaticSecret::missing()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [socket]
        path = "/run/helssa/gate.sock"

        [security]
        secret_env = "HELSSA_HMAC_SECRET"
    "#;

    #[test]
    fn test_default_values() {
        let settings = Settings::from_toml(MINIMAL).unwrap();
        assert_eq!(settings.socket.permissions, "0660");
        assert_eq!(settings.security.max_skew_seconds, 300);
        assert_eq!(settings.security.nonce_ttl_seconds, 600);
        assert_eq!(settings.security.protected_paths, vec!["/api/"]);
        assert!(settings.security.detailed_errors);
        assert_eq!(settings.rate_limit.limit, 60);
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.store.op_timeout_ms, 250);
        assert_eq!(settings.idempotency.ttl_seconds, 86_400);
        assert_eq!(settings.gate_config().idempotency_pending_ttl, Duration::from_secs(300));
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.logging.format, "pretty");
    }

    #[test]
    fn test_full_config() {
        let settings = Settings::from_toml(
            r#"
            [socket]
            path = "/tmp/gate.sock"

            [security]
            secret_path = "/etc/helssa/hmac.key"
            allowed_methods = ["post", "put"]
            detailed_errors = false

            [rate_limit]
            limit = 100
            window_seconds = 30

            [[rate_limit.rules]]
            path = "/api/webhooks/"
            limit = 5
            window_seconds = 1

            [store]
            backend = "redis"
            url = "redis://cache:6379/2"

            [idempotency]
            enabled = false
            "#,
        )
        .unwrap();

        let gate = settings.gate_config();
        assert_eq!(gate.allowed_methods, vec!["POST", "PUT"]);
        assert!(!gate.detailed_errors);
        assert!(gate.idempotency_ttl.is_none());

        let policy = gate.rate_limit.unwrap();
        assert_eq!(policy.rule_for("/api/webhooks/x").limit, 5);
        assert_eq!(policy.rule_for("/api/other").limit, 100);
        assert_eq!(settings.store.backend, StoreBackend::Redis);
    }

    #[test]
    fn test_secret_source_required() {
        let err = Settings::from_toml(
            r#"
            [socket]
            path = "/tmp/gate.sock"
            [security]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("secret_path"));
    }

    #[test]
    fn test_rejects_zero_window() {
        let toml = format!("{}\n[rate_limit]\nwindow_seconds = 0\n", MINIMAL);
        assert!(Settings::from_toml(&toml).is_err());
    }

    #[test]
    fn test_rejects_bad_method_and_log_level() {
        let toml = MINIMAL.replace(
            "secret_env = \"HELSSA_HMAC_SECRET\"",
            "secret_env = \"X\"\nallowed_methods = [\"PO ST\"]",
        );
        assert!(Settings::from_toml(&toml).is_err());

        let toml = format!("{}\n[logging]\nlevel = \"loud\"\n", MINIMAL);
        assert!(Settings::from_toml(&toml).is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let toml = format!("{}\n[store]\nbackend = \"memcached\"\n", MINIMAL);
        assert!(Settings::from_toml(&toml).is_err());
    }

    #[test]
    fn test_rate_limit_disabled() {
        let toml = format!("{}\n[rate_limit]\nenabled = false\n", MINIMAL);
        let settings = Settings::from_toml(&toml).unwrap();
        assert!(settings.gate_config().rate_limit.is_none());
    }
}
