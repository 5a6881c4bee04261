//! Response types for the gate protocol.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AuthErrorKind, GateError};

use super::REQUIRED_HEADERS;

/// Code reported for every authentication failure when detailed errors are off.
pub const GENERIC_AUTH_CODE: &str = "AUTH_FAILED";

/// A response from the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request was admitted and handled successfully.
    pub success: bool,

    /// HTTP-style status code.
    pub status: u16,

    /// Unique identifier for this request/response pair.
    pub request_id: Uuid,

    /// Response data on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Rejection details on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,

    /// Set on a stored response returned for a retried `Idempotency-Key`.
    ///
    /// The handler did not run for this request. A caller that executes the
    /// request itself after an `allowed` verdict must not execute it again and
    /// should answer with the result it recorded for the key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

/// Structured rejection body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Machine-readable error code (e.g. "NONCE_REUSED").
    pub code: String,

    /// Human-readable error message.
    pub error: String,

    /// Headers a protected request must carry (missing-header rejections only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_headers: Option<Vec<String>>,

    /// Seconds until the client may retry (rate-limit rejections only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Response {
    /// Create a 200 response carrying `data`.
    pub fn success(request_id: Uuid, data: serde_json::Value) -> Self {
        Self::with_status(200, request_id, Some(data))
    }

    /// Create a successful response with an explicit status.
    pub fn with_status(status: u16, request_id: Uuid, data: Option<serde_json::Value>) -> Self {
        Self {
            success: (200..400).contains(&status),
            status,
            request_id,
            data,
            rejection: None,
            replayed: false,
        }
    }

    /// Build the rejection for `error`.
    ///
    /// With `detailed` off, all authentication failures collapse into one
    /// generic code and message, so callers cannot tell which check failed.
    /// The full error is logged server-side either way.
    pub fn rejected(request_id: Uuid, error: &GateError, detailed: bool) -> Self {
        debug!(
            request_id = %request_id,
            code = error.error_code(),
            error = %error,
            "Rejection (sanitized for client)"
        );

        let (code, message) = if error.is_auth() && !detailed {
            (GENERIC_AUTH_CODE, "Authentication failed")
        } else {
            (error.error_code(), error.public_message())
        };

        let required_headers = match error {
            GateError::Auth {
                kind: AuthErrorKind::MissingHeaders { .. },
            } => Some(REQUIRED_HEADERS.iter().map(|h| h.to_string()).collect()),
            _ => None,
        };

        let retry_after = match error {
            GateError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };

        Self {
            success: false,
            status: error.status_code(),
            request_id,
            data: None,
            rejection: Some(Rejection {
                code: code.to_string(),
                error: message.to_string(),
                required_headers,
                retry_after,
            }),
            replayed: false,
        }
    }

    /// Mark this as a stored response being replayed.
    pub fn into_replayed(mut self) -> Self {
        self.replayed = true;
        self
    }

    /// Rejection code, if this is a rejection.
    pub fn code(&self) -> Option<&str> {
        self.rejection.as_ref().map(|r| r.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let response = Response::success(Uuid::nil(), serde_json::json!({"allowed": true}));
        assert!(response.success);
        assert_eq!(response.status, 200);
        assert!(response.rejection.is_none());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("\"rejection\""));
        assert!(!json.contains("\"replayed\""));
    }

    #[test]
    fn test_replayed_marker_serialized() {
        let response = Response::success(Uuid::nil(), serde_json::json!({"allowed": true}));
        let json = serde_json::to_value(response.into_replayed()).unwrap();
        assert_eq!(json["replayed"], true);

        let parsed: Response = serde_json::from_value(json).unwrap();
        assert!(parsed.replayed);
    }

    #[test]
    fn test_missing_headers_lists_required() {
        let err = GateError::auth(AuthErrorKind::MissingHeaders {
            missing: vec!["X-Helssa-Nonce".into()],
        });
        let response = Response::rejected(Uuid::nil(), &err, true);
        let rejection = response.rejection.unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(rejection.code, "MISSING_HEADERS");
        assert_eq!(rejection.required_headers.unwrap().len(), 3);
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = GateError::RateLimited { retry_after: 17 };
        let response = Response::rejected(Uuid::nil(), &err, true);
        assert_eq!(response.status, 429);
        assert_eq!(response.rejection.unwrap().retry_after, Some(17));
    }

    #[test]
    fn test_generic_auth_errors() {
        let replay_err = GateError::auth(AuthErrorKind::NonceReused);
        let bad_sig_err = GateError::auth(AuthErrorKind::InvalidSignature);
        let replay = Response::rejected(Uuid::nil(), &replay_err, false);
        let bad_sig = Response::rejected(Uuid::nil(), &bad_sig_err, false);
        assert_eq!(replay.rejection, bad_sig.rejection);
        assert_eq!(replay.code(), Some(GENERIC_AUTH_CODE));
    }

    #[test]
    fn test_generic_mode_keeps_non_auth_codes() {
        let err = GateError::RateLimited { retry_after: 1 };
        let response = Response::rejected(Uuid::nil(), &err, false);
        assert_eq!(response.code(), Some("RATE_LIMITED"));
    }

    #[test]
    fn test_internal_error_message_is_generic() {
        let err = GateError::Internal {
            message: "handler exploded at db.rs:42".into(),
        };
        let json = serde_json::to_string(&Response::rejected(Uuid::nil(), &err, true)).unwrap();
        assert!(!json.contains("db.rs"));
        assert!(json.contains("INTERNAL_ERROR"));
    }
}
