//! Webhook signature verification.
//!
//! Senders sign the raw request body with HMAC-SHA256 using the shared
//! secret and send the result in the `signature` header as
//! `sha256=<lowercase hex digest>`.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::Config;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "signature";

/// Prefix in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value for a payload.
///
/// Returns `None` if the key is rejected by the MAC.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => {
            warn!(key_length = secret.len(), "signature_invalid_key");
            return None;
        }
    };
    mac.update(payload);
    Some(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verifies inbound payloads against the shared secret.
///
/// Without a configured secret every payload is rejected.
pub struct SignatureVerifier {
    secret: Option<SecretString>,
}

impl SignatureVerifier {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .hmac_secret
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_owned())),
        )
    }

    /// Whether a secret is available to verify against.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `signature` against the HMAC-SHA256 of `payload`.
    ///
    /// Returns `true` only if the signature is present and byte-for-byte
    /// equal to the expected `sha256=<hex>` value. The comparison runs in
    /// constant time over the full value.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_ref() else {
            warn!("signature_secret_missing");
            return false;
        };

        let Some(signature) = signature else {
            warn!(payload_length = payload.len(), "signature_missing");
            return false;
        };

        let Some(expected) = compute_signature(secret.expose_secret().as_bytes(), payload) else {
            return false;
        };
        let valid: bool = expected.as_bytes().ct_eq(signature.as_bytes()).into();

        if !valid {
            warn!(
                expected_length = expected.len(),
                actual_length = signature.len(),
                has_prefix = signature.starts_with(SIGNATURE_PREFIX),
                payload_length = payload.len(),
                "signature_mismatch"
            );
        }

        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-signing-key";

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(Some(SecretString::from(SECRET.to_string())))
    }

    #[test]
    fn test_compute_signature_format() {
        let signature = compute_signature(SECRET.as_bytes(), b"{\"a\":1}").unwrap();
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), SIGNATURE_PREFIX.len() + 64);
        let digest = &signature[SIGNATURE_PREFIX.len()..];
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_compute_signature_known_vector() {
        // RFC 4231 test case 2
        let signature = compute_signature(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_valid() {
        let payload = b"{\"event\":\"subscription\"}";
        let signature = compute_signature(SECRET.as_bytes(), payload).unwrap();
        assert!(verifier().verify(payload, Some(&signature)));
    }

    #[test]
    fn test_verify_empty_payload() {
        let signature = compute_signature(SECRET.as_bytes(), b"").unwrap();
        assert!(verifier().verify(b"", Some(&signature)));
    }

    #[test]
    fn test_verify_missing_signature() {
        assert!(!verifier().verify(b"payload", None));
        assert!(!verifier().verify(b"", None));
    }

    #[test]
    fn test_verify_any_single_byte_change_fails() {
        let payload = b"payload";
        let signature = compute_signature(SECRET.as_bytes(), payload).unwrap();
        let verifier = verifier();

        for i in 0..signature.len() {
            let mut tampered = signature.clone().into_bytes();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(!verifier.verify(payload, Some(&tampered)), "byte {} accepted", i);
        }
    }

    #[test]
    fn test_verify_length_mismatch() {
        let payload = b"payload";
        let signature = compute_signature(SECRET.as_bytes(), payload).unwrap();
        let verifier = verifier();

        assert!(!verifier.verify(payload, Some(&signature[..signature.len() - 1])));
        assert!(!verifier.verify(payload, Some(&format!("{}0", signature))));
        assert!(!verifier.verify(payload, Some("")));
    }

    #[test]
    fn test_verify_requires_prefix_and_lowercase() {
        let payload = b"payload";
        let signature = compute_signature(SECRET.as_bytes(), payload).unwrap();
        let digest = &signature[SIGNATURE_PREFIX.len()..];
        let verifier = verifier();

        assert!(!verifier.verify(payload, Some(digest)));
        assert!(!verifier.verify(payload, Some(&format!("sha256={}", digest.to_uppercase()))));
        assert!(!verifier.verify(payload, Some(&format!("sha1={}", digest))));
    }

    #[test]
    fn test_verify_secret_used_verbatim() {
        let verifier = SignatureVerifier::new(Some(SecretString::from(" key\n".to_string())));
        let signature = compute_signature(b" key\n", b"p").unwrap();
        assert!(verifier.verify(b"p", Some(&signature)));

        let trimmed = compute_signature(b"key", b"p").unwrap();
        assert!(!verifier.verify(b"p", Some(&trimmed)));
    }

    #[test]
    fn test_verify_wrong_secret() {
        let payload = b"payload";
        let signature = compute_signature(b"another-key", payload).unwrap();
        assert!(!verifier().verify(payload, Some(&signature)));
    }

    #[test]
    fn test_verify_without_secret_rejects_everything() {
        let verifier = SignatureVerifier::new(None);
        assert!(!verifier.is_enabled());

        let signature = compute_signature(b"", b"payload").unwrap();
        assert!(!verifier.verify(b"payload", Some(&signature)));
        assert!(!verifier.verify(b"payload", None));
    }
}
