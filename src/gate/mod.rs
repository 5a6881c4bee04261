//! Request enforcement: the gate, its policy and the handlers behind it.

mod enforcement;
mod handler;
mod idempotency;
mod policy;

pub use enforcement::{Admission, Gate};
pub use handler::{AdmitHandler, Handler};
pub use idempotency::{IdempotencyCache, IdempotencyClaim, IdempotencySlot};
pub use policy::{GateConfig, RateLimitPolicy, RateRule, DEFAULT_ALLOWED_METHODS};
