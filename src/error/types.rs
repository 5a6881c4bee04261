//! Error types for the HELSSA gate.

use thiserror::Error;

/// Main error type for the gate.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors, including a missing shared secret.
    #[error("Configuration error: {message}")]
    Config {
        reason: ConfigReason,
        message: String,
    },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Authentication errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// The method is not accepted on a protected path.
    #[error("Method {method} not allowed on protected path")]
    MethodNotAllowed { method: String },

    /// The caller exceeded its request budget for the current window.
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Payload validation errors (only raised after authentication passed).
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A request with the same idempotency key is still being processed.
    #[error("Idempotency key {key} is already in flight")]
    IdempotencyConflict { key: String },

    /// An idempotency key was presented with a request it was not created for.
    #[error("Idempotency key {key} belongs to a different request")]
    IdempotencyMismatch { key: String },

    /// Shared cache failures.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// Failures that must surface as a generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Authentication error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    #[error("Missing required headers: {}", missing.join(", "))]
    MissingHeaders { missing: Vec<String> },

    #[error("Malformed timestamp: {value:?}")]
    MalformedTimestamp { value: String },

    #[error("Timestamp outside allowed window: skew {skew_seconds}s")]
    TimestampSkew { skew_seconds: u64 },

    #[error("Malformed nonce")]
    MalformedNonce,

    #[error("Nonce already used (replay attack detected)")]
    NonceReused,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// What is wrong with the configuration.
///
/// Callers only ever see `SECRET_NOT_CONFIGURED`; the reason goes to the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigReason {
    /// No secret source configured, or the source is empty.
    SecretMissing,
    /// The secret file exists but could not be read.
    SecretUnreadable,
    /// The secret file is readable by group or others.
    InsecurePermissions,
    /// The settings file failed to load or validate.
    InvalidSettings,
}

impl ConfigReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigReason::SecretMissing => "secret_missing",
            ConfigReason::SecretUnreadable => "secret_unreadable",
            ConfigReason::InsecurePermissions => "insecure_permissions",
            ConfigReason::InvalidSettings => "invalid_settings",
        }
    }
}

/// Shared cache errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("store operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("corrupt value under key {key}")]
    Corrupt { key: String },
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

impl GateError {
    /// Shorthand for an authentication failure.
    pub fn auth(kind: AuthErrorKind) -> Self {
        GateError::Auth { kind }
    }

    /// Shorthand for a configuration failure.
    pub fn config(reason: ConfigReason, message: impl Into<String>) -> Self {
        GateError::Config {
            reason,
            message: message.into(),
        }
    }

    /// Log-only detail for configuration failures.
    pub fn config_reason(&self) -> Option<ConfigReason> {
        match self {
            GateError::Config { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// HTTP-style status class reported to the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::Auth { .. } => 401,
            GateError::MethodNotAllowed { .. } => 405,
            GateError::RateLimited { .. } => 429,
            GateError::Validation { .. } | GateError::Protocol { .. } => 400,
            GateError::IdempotencyConflict { .. } => 409,
            GateError::IdempotencyMismatch { .. } => 422,
            GateError::Store(_) => 503,
            GateError::Config { .. }
            | GateError::Socket { .. }
            | GateError::Internal { .. }
            | GateError::Io(_)
            | GateError::Serialization(_) => 500,
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            GateError::Auth { kind } => match kind {
                AuthErrorKind::MissingHeaders { .. } => "MISSING_HEADERS",
                AuthErrorKind::MalformedTimestamp { .. } => "MALFORMED_TIMESTAMP",
                AuthErrorKind::TimestampSkew { .. } => "TIMESTAMP_SKEW",
                AuthErrorKind::MalformedNonce => "MALFORMED_NONCE",
                AuthErrorKind::NonceReused => "NONCE_REUSED",
                AuthErrorKind::InvalidSignature => "INVALID_SIGNATURE",
            },
            GateError::Config { .. } => "SECRET_NOT_CONFIGURED",
            GateError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            GateError::RateLimited { .. } => "RATE_LIMITED",
            GateError::Validation { .. } | GateError::Protocol { .. } => "VALIDATION_ERROR",
            GateError::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            GateError::IdempotencyMismatch { .. } => "IDEMPOTENCY_KEY_REUSED",
            GateError::Store(_) => "STORE_UNAVAILABLE",
            GateError::Socket { .. }
            | GateError::Internal { .. }
            | GateError::Io(_)
            | GateError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Never includes secret material, store addresses or internal state.
    pub fn public_message(&self) -> &'static str {
        match self {
            GateError::Auth { kind } => match kind {
                AuthErrorKind::MissingHeaders { .. } => "Missing authentication headers",
                AuthErrorKind::MalformedTimestamp { .. } => "Invalid timestamp format",
                AuthErrorKind::TimestampSkew { .. } => "Request timestamp outside allowed window",
                AuthErrorKind::MalformedNonce => "Invalid nonce format",
                AuthErrorKind::NonceReused => "Nonce already used",
                AuthErrorKind::InvalidSignature => "Invalid signature",
            },
            GateError::Config { .. } => "Server authentication is not configured",
            GateError::MethodNotAllowed { .. } => "Method not allowed",
            GateError::RateLimited { .. } => "Too many requests",
            GateError::Validation { .. } | GateError::Protocol { .. } => "Invalid request payload",
            GateError::IdempotencyConflict { .. } => {
                "A request with this idempotency key is in progress"
            }
            GateError::IdempotencyMismatch { .. } => {
                "Idempotency key was already used for a different request"
            }
            GateError::Store(_) => "Service temporarily unavailable",
            GateError::Socket { .. }
            | GateError::Internal { .. }
            | GateError::Io(_)
            | GateError::Serialization(_) => "Internal server error",
        }
    }

    /// Whether this is one of the 401-class failures.
    pub fn is_auth(&self) -> bool {
        matches!(self, GateError::Auth { .. })
    }
}

/// Result type alias for gate operations.
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert_eq!(GateError::auth(AuthErrorKind::NonceReused).status_code(), 401);
        assert_eq!(
            GateError::config(ConfigReason::SecretMissing, "no secret").status_code(),
            500
        );
        assert_eq!(GateError::RateLimited { retry_after: 3 }.status_code(), 429);
        assert_eq!(
            GateError::MethodNotAllowed {
                method: "GET".into()
            }
            .status_code(),
            405
        );
        assert_eq!(
            GateError::Store(StoreError::Timeout { timeout_ms: 250 }).status_code(),
            503
        );
    }

    #[test]
    fn test_missing_secret_is_not_an_auth_failure() {
        let err = GateError::config(ConfigReason::SecretMissing, "secret file missing");
        assert!(!err.is_auth());
        assert_eq!(err.error_code(), "SECRET_NOT_CONFIGURED");
    }

    #[test]
    fn test_config_reason_kept_out_of_public_message() {
        let err = GateError::config(ConfigReason::InsecurePermissions, "mode 0644");
        assert_eq!(err.config_reason(), Some(ConfigReason::InsecurePermissions));
        assert_eq!(err.error_code(), "SECRET_NOT_CONFIGURED");
        assert!(!err.public_message().contains("0644"));
        assert_eq!(ConfigReason::InsecurePermissions.as_str(), "insecure_permissions");
        assert_eq!(GateError::RateLimited { retry_after: 1 }.config_reason(), None);
    }

    #[test]
    fn test_public_message_hides_details() {
        let err = GateError::Internal {
            message: "redis://10.0.0.5:6379 refused".into(),
        };
        assert!(!err.public_message().contains("redis"));

        let err = GateError::Store(StoreError::Unavailable {
            message: "connection refused to 10.0.0.5".into(),
        });
        assert!(!err.public_message().contains("10.0.0.5"));
    }

    #[test]
    fn test_missing_headers_display_lists_names() {
        let err = GateError::auth(AuthErrorKind::MissingHeaders {
            missing: vec!["X-Helssa-Nonce".into(), "X-Helssa-Signature".into()],
        });
        let text = err.to_string();
        assert!(text.contains("X-Helssa-Nonce, X-Helssa-Signature"));
    }
}
