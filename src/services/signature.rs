//! HMAC-SHA256 signing and verification.
//!
//! Two transport encodings are in use and each API surface keeps its own:
//! - outbound request headers (`X-SIGNATURE`) carry the MAC **base64** encoded;
//! - inbound webhooks (`X-Signature`) carry it **lowercase hex** encoded.
//!
//! Verification always goes through `ring::hmac::verify`, which compares in
//! constant time. The only early exit is a length check on the decoded tag.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::{digest, hmac};

const MAC_LEN: usize = 32;

pub struct SignatureCodec;

impl SignatureCodec {
    pub fn sign(message: &[u8], secret: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::sign(&key, message).as_ref().to_vec()
    }

    pub fn sign_base64(message: &[u8], secret: &[u8]) -> String {
        BASE64.encode(Self::sign(message, secret))
    }

    pub fn sign_hex(message: &[u8], secret: &[u8]) -> String {
        hex::encode(Self::sign(message, secret))
    }

    pub fn verify(message: &[u8], signature: &[u8], secret: &[u8]) -> bool {
        if signature.len() != MAC_LEN {
            return false;
        }
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
        hmac::verify(&key, message, signature).is_ok()
    }

    /// Verifies a hex-encoded signature as sent on webhooks.
    pub fn verify_hex(message: &[u8], signature: &str, secret: &[u8]) -> bool {
        match hex::decode(signature.trim()) {
            Ok(bytes) => Self::verify(message, &bytes, secret),
            Err(_) => false,
        }
    }

    pub fn verify_base64(message: &[u8], signature: &str, secret: &[u8]) -> bool {
        match BASE64.decode(signature.trim()) {
            Ok(bytes) => Self::verify(message, &bytes, secret),
            Err(_) => false,
        }
    }

    /// Signature for the token endpoint: `clientId|timestamp`.
    pub fn token_signature(client_id: &str, timestamp: &str, client_secret: &str) -> String {
        let message = format!("{}|{}", client_id, timestamp);
        Self::sign_base64(message.as_bytes(), client_secret.as_bytes())
    }

    /// Signature for bearer-authenticated service calls:
    /// `METHOD:path:token:hex(sha256(body)):timestamp`.
    pub fn service_signature(
        method: &str,
        path: &str,
        access_token: &str,
        body: &[u8],
        timestamp: &str,
        client_secret: &str,
    ) -> String {
        let body_digest = hex::encode(digest::digest(&digest::SHA256, body));
        let message = format!(
            "{}:{}:{}:{}:{}",
            method.to_ascii_uppercase(),
            path,
            access_token,
            body_digest,
            timestamp
        );
        Self::sign_base64(message.as_bytes(), client_secret.as_bytes())
    }
}
