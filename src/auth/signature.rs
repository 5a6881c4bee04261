//! HMAC-SHA256 signing and verification.

use ring::hmac;

use super::SharedSecret;

/// Sign `message` with `secret`, returning the lower-case hex digest.
pub fn sign(message: &[u8], secret: &SharedSecret) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.expose());
    hex::encode(hmac::sign(&key, message).as_ref())
}

/// Verify a hex-encoded signature over `message`.
///
/// The tag comparison is constant-time. Signatures that are not valid hex, or
/// have the wrong length, simply fail verification.
pub fn verify(message: &[u8], signature: &str, secret: &SharedSecret) -> bool {
    let Ok(tag) = hex::decode(signature.trim()) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.expose());
    hmac::verify(&key, message, &tag).is_ok()
}
