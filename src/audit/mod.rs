//! Audit logging module.
//!
//! Every request the gate decides on is recorded as one JSON line: who asked,
//! for what, and whether it was admitted. Header values that could carry
//! credentials are redacted before they reach the file.

mod entry;
mod logger;
mod sanitize;

pub use entry::{AuditEntry, AuditOutcome};
pub use logger::AuditLogger;
pub use sanitize::sanitize_headers;
