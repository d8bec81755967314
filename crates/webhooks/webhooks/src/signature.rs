//! HMAC-SHA256 signature generation and verification.
//!
//! Signatures are the lowercase hex HMAC of the exact payload bytes. On the
//! wire they travel in [`SIGNATURE_HEADER`] as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature, in both directions.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Prefix used in the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signs payloads with a shared secret.
pub struct WebhookSigner {
    secret: String,
}

impl WebhookSigner {
    /// Creates a new signer with the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generates the hex signature for the payload.
    pub fn sign(&self, payload: &[u8]) -> String {
        sign(payload, &self.secret)
    }

    /// Generates a full signature header value (`sha256=<hex>`).
    pub fn sign_header(&self, payload: &[u8]) -> String {
        format!("{}{}", SIGNATURE_PREFIX, self.sign(payload))
    }

    /// Verifies a signature, with or without the `sha256=` prefix.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        verify(payload, &self.secret, signature)
    }
}

/// Computes the hex HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature` against `payload`.
///
/// An empty secret means the source is unauthenticated and always verifies.
/// Length mismatches return early; equal-length values are compared in
/// constant time.
pub fn verify(payload: &[u8], secret: &str, signature: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let provided = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);
    let expected = sign(payload, secret);

    if provided.len() != expected.len() {
        return false;
    }

    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let payload = b"{\"type\":\"subtitle.downloaded\"}";
        let signature = sign(payload, "test-secret");

        assert_eq!(signature.len(), 64);
        assert!(verify(payload, "test-secret", &signature));
        assert!(verify(payload, "test-secret", &format!("sha256={signature}")));

        // Wrong payload should fail
        assert!(!verify(b"other", "test-secret", &signature));

        // Wrong secret should fail
        assert!(!verify(payload, "other-secret", &signature));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signature = sign(b"what do ya want for nothing?", "Jefe");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_single_byte_alteration_fails() {
        let payload = b"payload";
        let signature = sign(payload, "secret");

        for idx in 0..signature.len() {
            let mut bytes = signature.clone().into_bytes();
            bytes[idx] = if bytes[idx] == b'0' { b'1' } else { b'0' };
            let altered = String::from_utf8(bytes).unwrap();
            assert!(!verify(payload, "secret", &altered), "index {idx}");
        }
    }

    #[test]
    fn test_length_mismatch() {
        let signature = sign(b"payload", "secret");
        assert!(!verify(b"payload", "secret", &signature[..63]));
        assert!(!verify(b"payload", "secret", &format!("{signature}0")));
        assert!(!verify(b"payload", "secret", ""));
    }

    #[test]
    fn test_empty_secret_always_verifies() {
        assert!(verify(b"payload", "", "garbage"));
        assert!(verify(b"payload", "", ""));
    }

    #[test]
    fn test_signer_header() {
        let signer = WebhookSigner::new("test-secret");
        let header = signer.sign_header(b"payload");

        assert!(header.starts_with("sha256="));
        assert!(signer.verify(b"payload", &header));
    }
}
