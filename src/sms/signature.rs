//! Inbound webhook signature validation.
//!
//! The provider signs each webhook by concatenating the full request URL
//! with every form parameter (sorted by name, `name` then `value`),
//! computing HMAC-SHA256 under the shared secret, and base64-encoding the
//! digest into the `X-Ridepool-Signature` header. Validation recomputes the
//! digest and compares in constant time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Ridepool-Signature";

fn signed_mac(secret: &str, url: &str, params: &[(String, String)]) -> HmacSha256 {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = url.to_string();
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push_str(value);
    }

    // HMAC accepts any key length, so new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(payload.as_bytes());
    mac
}

/// Computes the expected signature for a webhook request.
pub fn compute(secret: &str, url: &str, params: &[(String, String)]) -> String {
    BASE64.encode(signed_mac(secret, url, params).finalize().into_bytes())
}

/// Validates a webhook signature in constant time.
pub fn validate(secret: &str, signature: &str, url: &str, params: &[(String, String)]) -> bool {
    let digest = match BASE64.decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    signed_mac(secret, url, params).verify_slice(&digest).is_ok()
}
