//! Audit entry types.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::protocol::{GateRequest, Response};

use super::sanitize::sanitize_headers;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp of the decision.
    pub timestamp: String,
    /// Request identifier, shared with the response.
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    /// Caller identity used for rate limiting.
    pub client_id: String,
    /// Request headers with credential values redacted.
    pub headers: BTreeMap<String, String>,
    /// What the gate decided.
    pub outcome: AuditOutcome,
    /// A stored idempotent response was returned instead of running the handler.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
    /// Processing time in milliseconds.
    pub duration_ms: u64,
}

impl AuditEntry {
    /// Record the outcome of `request`.
    pub fn new(request: &GateRequest, response: &Response, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id: response.request_id,
            method: request.method.to_ascii_uppercase(),
            path: request.path.clone(),
            client_id: request.client_identifier().to_string(),
            headers: sanitize_headers(&request.headers),
            outcome: AuditOutcome::from(response),
            replayed: response.replayed,
            duration_ms,
        }
    }
}

/// Decision recorded for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The request passed the gate.
    Allowed { status: u16 },
    /// The request was turned away.
    Rejected { status: u16, code: String },
}

impl From<&Response> for AuditOutcome {
    fn from(response: &Response) -> Self {
        match &response.rejection {
            Some(rejection) => AuditOutcome::Rejected {
                status: response.status,
                code: rejection.code.clone(),
            },
            None => AuditOutcome::Allowed {
                status: response.status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorKind, GateError};

    #[test]
    fn test_allowed_entry_serialization() {
        let request = GateRequest::new("post", "/api/notes")
            .with_client_id("10.0.0.7")
            .with_header("X-Helssa-Signature", "abcdef");
        let response = Response::success(Uuid::nil(), serde_json::json!({"allowed": true}));

        let entry = AuditEntry::new(&request, &response, 3);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["client_id"], "10.0.0.7");
        assert_eq!(json["outcome"]["decision"], "allowed");
        assert_eq!(json["outcome"]["status"], 200);
        assert_eq!(json["headers"]["X-Helssa-Signature"], "[REDACTED]");
        assert!(json.get("replayed").is_none());
        assert_eq!(json["duration_ms"], 3);
    }

    #[test]
    fn test_rejected_entry_records_code() {
        let request = GateRequest::new("POST", "/api/notes");
        let response = Response::rejected(
            Uuid::nil(),
            &GateError::auth(AuthErrorKind::NonceReused),
            true,
        );

        let entry = AuditEntry::new(&request, &response, 1);
        assert_eq!(
            entry.outcome,
            AuditOutcome::Rejected {
                status: 401,
                code: "NONCE_REUSED".into()
            }
        );
        assert_eq!(entry.client_id, "anonymous");
    }
}
