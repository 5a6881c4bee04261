//! Authentication module.
//!
//! Canonical message construction, HMAC-SHA256 signing, shared secret loading,
//! timestamp skew validation, nonce replay protection and fixed-window rate
//! limiting.

mod canonical;
mod rate_limit;
mod replay;
mod secret;
mod signature;
mod skew;

pub use canonical::{CanonicalMessage, PROTOCOL_VERSION};
pub use rate_limit::{RateDecision, RateLimiter};
pub use replay::{ReplayGuard, DEFAULT_NONCE_TTL_SECONDS};
pub use secret::{FileSecret, SecretProvider, SharedSecret, StaticSecret};
pub use signature::{sign, verify};
pub use skew::{SkewValidator, DEFAULT_MAX_SKEW_SECONDS};
