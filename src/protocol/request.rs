//! Request types for the gate protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::auth::{sign, CanonicalMessage, SharedSecret, SkewValidator};
use crate::error::{AuthErrorKind, GateError};

/// Header carrying the hex HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "X-Helssa-Signature";
/// Header carrying the Unix timestamp (seconds).
pub const TIMESTAMP_HEADER: &str = "X-Helssa-Timestamp";
/// Header carrying the single-use nonce.
pub const NONCE_HEADER: &str = "X-Helssa-Nonce";
/// Optional header enabling response replay for retried requests.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Headers every request to a protected path must carry.
pub const REQUIRED_HEADERS: [&str; 3] = [SIGNATURE_HEADER, TIMESTAMP_HEADER, NONCE_HEADER];

/// Identifier used for rate limiting when the caller supplied none.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// An inbound request as forwarded by the web tier.
///
/// The body travels base64-encoded on the wire so arbitrary bytes survive JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRequest {
    /// HTTP method (e.g. "POST").
    pub method: String,

    /// Request path (e.g. "/api/billing/invoices").
    pub path: String,

    /// Raw query string without the leading `?`.
    #[serde(default)]
    pub query: String,

    /// Request headers. Lookups through [`GateRequest::header`] ignore case.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw request body.
    #[serde(default, with = "body_base64")]
    pub body: Vec<u8>,

    /// Caller identity used for rate limiting (remote address, API client, user).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl GateRequest {
    /// Create a request with no query, headers or body.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: String::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            client_id: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Identifier for rate limiting.
    pub fn client_identifier(&self) -> &str {
        match self.client_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => ANONYMOUS_CLIENT,
        }
    }

    /// Whether the declared content type is JSON.
    pub fn is_json(&self) -> bool {
        self.header("Content-Type").is_some_and(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
    }

    /// Sign this request, setting the timestamp, nonce and signature headers.
    pub fn signed(self, secret: &SharedSecret, timestamp: i64, nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        let message = CanonicalMessage {
            method: &self.method,
            path: &self.path,
            query: &self.query,
            body: &self.body,
            timestamp,
            nonce: &nonce,
        }
        .build();
        let signature = sign(message.as_bytes(), secret);

        self.with_header(TIMESTAMP_HEADER, timestamp.to_string())
            .with_header(NONCE_HEADER, nonce)
            .with_header(SIGNATURE_HEADER, signature)
    }
}

/// The signed view of a request, extracted once its headers are present.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub body: &'a [u8],
    pub timestamp: i64,
    pub nonce: &'a str,
    pub signature: &'a str,
}

impl<'a> SignedRequest<'a> {
    /// Extract the signed attributes of `request`.
    ///
    /// # Errors
    /// - `MissingHeaders` naming every absent or blank authentication header
    /// - `MalformedTimestamp` if the timestamp header is not an integer
    pub fn extract(request: &'a GateRequest) -> Result<Self, GateError> {
        let lookup = move |name: &str| request.header(name).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = REQUIRED_HEADERS
            .iter()
            .filter(|&&name| lookup(name).is_none())
            .map(|name| name.to_string())
            .collect();

        let (Some(signature), Some(timestamp), Some(nonce)) = (
            lookup(SIGNATURE_HEADER),
            lookup(TIMESTAMP_HEADER),
            lookup(NONCE_HEADER),
        ) else {
            return Err(GateError::auth(AuthErrorKind::MissingHeaders { missing }));
        };

        Ok(Self {
            method: &request.method,
            path: &request.path,
            query: &request.query,
            body: &request.body,
            timestamp: SkewValidator::parse_timestamp(timestamp)?,
            nonce: nonce.trim(),
            signature: signature.trim(),
        })
    }

    /// Get the message to sign.
    pub fn signing_message(&self) -> String {
        CanonicalMessage {
            method: self.method,
            path: self.path,
            query: self.query,
            body: self.body,
            timestamp: self.timestamp,
            nonce: self.nonce,
        }
        .build()
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
