//! Wire protocol module.
//!
//! Defines the request envelope the web tier forwards, the gate's response, and
//! the message framing used on the Unix socket.
//!
//! ## Wire Format
//!
//! Messages are length-prefixed JSON:
//! ```text
//! [4 bytes: length (big-endian u32)][JSON payload]
//! ```

mod request;
mod response;
mod wire;

pub use request::{
    GateRequest, SignedRequest, ANONYMOUS_CLIENT, IDEMPOTENCY_HEADER, NONCE_HEADER,
    REQUIRED_HEADERS, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
pub use response::{Rejection, Response, GENERIC_AUTH_CODE};
pub use wire::{
    read_frame, read_frame_with_timeout, write_frame, write_frame_with_timeout,
    DEFAULT_MAX_FRAME_SIZE,
};
