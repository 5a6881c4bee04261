//! Header sanitization for audit logging.

use std::collections::BTreeMap;

/// Header name fragments whose values are never written to the audit log.
const SENSITIVE_HEADERS: &[&str] = &[
    "signature",
    "authorization",
    "cookie",
    "secret",
    "token",
    "password",
    "api-key",
];

/// Maximum length for header values before truncation.
const MAX_VALUE_LENGTH: usize = 256;

/// Sanitize request headers for audit logging.
///
/// Values of credential-bearing headers are replaced with `[REDACTED]` and
/// overly long values are truncated.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            let sanitized = if SENSITIVE_HEADERS.iter().any(|&s| lower.contains(s)) {
                "[REDACTED]".to_string()
            } else if value.len() > MAX_VALUE_LENGTH {
                format!("[TRUNCATED - {} bytes]", value.len())
            } else {
                value.clone()
            };
            (name.clone(), sanitized)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_redacts_credentials() {
        let sanitized = sanitize_headers(&headers(&[
            ("X-Helssa-Signature", "deadbeef"),
            ("Authorization", "Bearer xyz"),
            ("Cookie", "session=1"),
            ("X-Api-Key", "k"),
        ]));
        assert!(sanitized.values().all(|v| v == "[REDACTED]"));
    }

    #[test]
    fn test_case_insensitive_names() {
        let sanitized = sanitize_headers(&headers(&[("AUTHORIZATION", "Basic abc")]));
        assert_eq!(sanitized["AUTHORIZATION"], "[REDACTED]");
    }

    #[test]
    fn test_keeps_ordinary_headers() {
        let sanitized = sanitize_headers(&headers(&[
            ("X-Helssa-Nonce", "n-1"),
            ("X-Helssa-Timestamp", "1700000000"),
            ("Idempotency-Key", "order-1"),
        ]));
        assert_eq!(sanitized["X-Helssa-Nonce"], "n-1");
        assert_eq!(sanitized["X-Helssa-Timestamp"], "1700000000");
        assert_eq!(sanitized["Idempotency-Key"], "order-1");
    }

    #[test]
    fn test_truncates_long_values() {
        let long = "x".repeat(1000);
        let sanitized = sanitize_headers(&headers(&[("User-Agent", &long)]));
        assert_eq!(sanitized["User-Agent"], "[TRUNCATED - 1000 bytes]");
    }
}
