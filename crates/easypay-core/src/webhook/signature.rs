//! Webhook payload signing and verification

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::canonical_json;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the outbound signature
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key of any length is valid")
}

/// Sign raw bytes: `"sha256=" + hex(hmac_sha256(secret, bytes))`
pub fn sign_bytes(secret: &str, bytes: &[u8]) -> String {
    let mut hasher = mac(secret);
    hasher.update(bytes);
    let digest = hasher.finalize().into_bytes();
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest))
}

/// Sign a JSON payload over its canonical (key-sorted) form
pub fn sign_payload(secret: &str, payload: &serde_json::Value) -> String {
    sign_bytes(secret, canonical_json(payload).as_bytes())
}

/// Constant-time verification of raw bytes against a signature header value
pub fn verify_bytes(secret: &str, bytes: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut hasher = mac(secret);
    hasher.update(bytes);
    hasher.verify_slice(&expected).is_ok()
}

/// Verify a JSON payload signature
pub fn verify_payload(secret: &str, payload: &serde_json::Value, signature: &str) -> bool {
    verify_bytes(secret, canonical_json(payload).as_bytes(), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_verify_round_trip() {
        let payload = json!({"event_id": "evt_1", "amount": "10.00"});
        let signature = sign_payload("secret", &payload);

        assert!(signature.starts_with("sha256="));
        assert!(verify_payload("secret", &payload, &signature));
    }

    #[test]
    fn test_signature_is_key_order_independent() {
        let a = json!({"amount": "10.00", "currency": "USD"});
        let b = json!({"currency": "USD", "amount": "10.00"});
        assert_eq!(sign_payload("secret", &a), sign_payload("secret", &b));
    }

    #[test]
    fn test_any_payload_mutation_breaks_verification() {
        let payload = json!({"event_id": "evt_1", "amount": "10.00"});
        let signature = sign_payload("secret", &payload);

        let mutated = json!({"event_id": "evt_1", "amount": "10.01"});
        assert!(!verify_payload("secret", &mutated, &signature));
    }

    #[test]
    fn test_byte_flip_breaks_raw_verification() {
        let body = br#"{"event_id":"evt_1"}"#;
        let signature = sign_bytes("secret", body);
        assert!(verify_bytes("secret", body, &signature));

        let mut flipped = body.to_vec();
        flipped[3] ^= 0x01;
        assert!(!verify_bytes("secret", &flipped, &signature));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let payload = json!({"event_id": "evt_1"});
        let signature = sign_payload("secret", &payload);
        assert!(!verify_payload("other", &payload, &signature));
    }

    #[test]
    fn test_malformed_signature_values() {
        let payload = json!({"event_id": "evt_1"});
        assert!(!verify_payload("secret", &payload, ""));
        assert!(!verify_payload("secret", &payload, "sha256=zznothex"));
        assert!(!verify_payload("secret", &payload, "md5=abcdef"));
    }
}
