//! HMAC-SHA256 request signing.
//!
//! When a secret is configured, every delivery carries
//! `X-Wagate-Signature-256: sha256=<hex>` computed over the raw body, so the
//! receiving end can authenticate the sender with [`verify_signature`].

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::warn,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Wagate-Signature-256";

/// Header value for `body`: `sha256=<lowercase hex>`.
pub fn sign(body: &[u8], secret: &str) -> String {
    format!("sha256={}", hex::encode(digest(body, secret)))
}

/// Receiver-side check of a signature header against the raw `body`, in
/// constant time. The forwarder never calls this; it is exported for sinks
/// written in Rust that consume wagate webhooks.
///
/// ```
/// let body = br#"{"event":"connected"}"#;
/// let header = wagate_webhook::sign(body, "s3cret");
/// assert!(wagate_webhook::verify_signature(body, &header, "s3cret"));
/// assert!(!wagate_webhook::verify_signature(body, &header, "other"));
/// ```
pub fn verify_signature(body: &[u8], signature_header: &str, secret: &str) -> bool {
    let Some(expected) = signature_header.strip_prefix("sha256=") else {
        warn!("invalid signature header format (missing sha256= prefix)");
        return false;
    };
    let computed = hex::encode(digest(body, secret));
    constant_time_eq(&computed, expected)
}

fn digest(body: &[u8], secret: &str) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
