//! HELSSA Gate Library
//!
//! HMAC request authentication for the HELSSA API: signed canonical messages,
//! timestamp windows, single-use nonces and per-client rate limits, enforced
//! by a [`gate::Gate`] in front of a protected handler. The binary exposes the
//! gate over a Unix socket to the web tier.

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod protocol;
pub mod socket;
pub mod store;
