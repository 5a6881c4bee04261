//! Canonical message construction.
//!
//! Signer and verifier must build byte-identical messages. Protocol v1 joins
//! the version tag and six length-prefixed fields with `|`:
//!
//! ```text
//! v1|<len>:METHOD|<len>:PATH|<len>:QUERY|<len>:BODY|<len>:TIMESTAMP|<len>:NONCE
//! ```
//!
//! `<len>` is the byte length of the field in decimal. Path, query and body may
//! contain `|` themselves; the prefix pins every field boundary, so no two
//! distinct requests share a message.
//!
//! The body field is always present; a request without a body signs the same
//! message as a request with an empty body.

use std::borrow::Cow;

/// Version tag leading every canonical message.
pub const PROTOCOL_VERSION: &str = "v1";

const DELIMITER: char = '|';

/// Request attributes covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalMessage<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub body: &'a [u8],
    pub timestamp: i64,
    pub nonce: &'a str,
}

impl CanonicalMessage<'_> {
    /// Build the string that gets signed.
    ///
    /// Never fails: a body that is not valid UTF-8 is decoded with replacement
    /// characters rather than rejected.
    pub fn build(&self) -> String {
        let method = self.method.to_ascii_uppercase();
        let query = self.query.strip_prefix('?').unwrap_or(self.query);
        let body: Cow<'_, str> = String::from_utf8_lossy(self.body);
        let timestamp = self.timestamp.to_string();

        let fields = [
            method.as_str(),
            self.path,
            query,
            &*body,
            timestamp.as_str(),
            self.nonce,
        ];

        let mut message = String::with_capacity(
            PROTOCOL_VERSION.len() + fields.iter().map(|f| f.len() + 8).sum::<usize>(),
        );
        message.push_str(PROTOCOL_VERSION);
        for field in fields {
            message.push(DELIMITER);
            push_field(&mut message, field);
        }
        message
    }
}

fn push_field(message: &mut String, field: &str) {
    message.push_str(&field.len().to_string());
    message.push(':');
    message.push_str(field);
}
