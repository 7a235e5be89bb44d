//! Heartbeat signatures.
//!
//! Every heartbeat proves possession of the host's private key by signing
//! the exact message `"<signaling_full_id> <sequence_id>"`. The message is
//! hashed with SHA-256 and the 32-byte digest is signed with Ed25519. The
//! signature travels as standard base64.
//!
//! Ed25519 is deterministic: the same key, signaling id and sequence id
//! always yield the same signature, which the known-answer tests below pin.

use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Build the message that gets signed
#[must_use]
pub fn signing_message(signaling_full_id: &str, sequence_id: u64) -> String {
    format!("{signaling_full_id} {sequence_id}")
}

/// Produces heartbeat signatures with an injected private key
#[derive(Clone)]
pub struct SignatureSigner {
    key: SigningKey,
}

impl SignatureSigner {
    /// Wrap a signing key
    #[must_use]
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Public half of the key, as registered with the directory
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign `"<signaling_full_id> <sequence_id>"`, returning base64
    #[must_use]
    pub fn sign(&self, signaling_full_id: &str, sequence_id: u64) -> String {
        let digest = Sha256::digest(signing_message(signaling_full_id, sequence_id).as_bytes());
        STANDARD.encode(self.key.sign(&digest).to_bytes())
    }
}

impl std::fmt::Debug for SignatureSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureSigner").field("key", &"<redacted>").finish()
    }
}

/// Check a heartbeat signature against a host's public key
///
/// Returns `false` for malformed base64 or signatures of the wrong length as
/// well as for genuine mismatches.
#[must_use]
pub fn verify_signature(
    key: &VerifyingKey,
    signaling_full_id: &str,
    sequence_id: u64,
    signature: &str,
) -> bool {
    let Ok(bytes) = STANDARD.decode(signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };

    let digest = Sha256::digest(signing_message(signaling_full_id, sequence_id).as_bytes());
    key.verify(&digest, &signature).is_ok()
}

/// Immutable per-sender identity
///
/// Owned by the engine for its whole lifetime.
#[derive(Debug, Clone)]
pub struct HeartbeatIdentity {
    host_id: String,
    signer: SignatureSigner,
}

impl HeartbeatIdentity {
    /// Bind a host id to its signing key
    pub fn new(host_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self { host_id: host_id.into(), signer: SignatureSigner::new(signing_key) }
    }

    /// Directory-assigned host id
    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Signer holding this host's key
    #[must_use]
    pub fn signer(&self) -> &SignatureSigner {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_ID: &str = "user@example.com/chromoting_ftl_abc123";

    fn test_key() -> SigningKey {
        #[allow(clippy::cast_possible_truncation)]
        let seed: [u8; 32] = std::array::from_fn(|i| i as u8);
        SigningKey::from_bytes(&seed)
    }

    #[test]
    fn message_format() {
        assert_eq!(signing_message(FULL_ID, 456), "user@example.com/chromoting_ftl_abc123 456");
        assert_eq!(signing_message("a", 0), "a 0");
    }

    #[test]
    fn known_answer_vectors() {
        let signer = SignatureSigner::new(test_key());

        assert_eq!(
            signer.sign(FULL_ID, 456),
            "47kNaf6Yyekc4sys0I91qqlH797LUE0+iN/14rxgBLKQNdqx96fPUJAtKc0C49JqP/fBVl6IXngTr2zOr2HjBQ=="
        );
        assert_eq!(
            signer.sign(FULL_ID, 0),
            "+HfUs4NWjiNTpEoTXpGTFVGUlj2su4eoeRfAA74iOeHKlNlyjmiAbgp1cJDfDx420lq26eh3JYRXGbXw21itAQ=="
        );
        assert_eq!(
            signer.sign(FULL_ID, 457),
            "uwq55SnwOwoE+Ca2nIgVziEKGREnkqAlkO+UAwK+oQUHUnP68adJx41ryY4HIk1QAfPPUFNzG90j8q6f47doAA=="
        );
    }

    #[test]
    fn known_public_key() {
        let signer = SignatureSigner::new(test_key());
        let expected: [u8; 32] = [
            0x03, 0xa1, 0x07, 0xbf, 0xf3, 0xce, 0x10, 0xbe, 0x1d, 0x70, 0xdd, 0x18, 0xe7, 0x4b,
            0xc0, 0x99, 0x67, 0xe4, 0xd6, 0x30, 0x9b, 0xa5, 0x0d, 0x5f, 0x1d, 0xdc, 0x86, 0x64,
            0x12, 0x55, 0x31, 0xb8,
        ];
        assert_eq!(signer.verifying_key().to_bytes(), expected);
    }

    #[test]
    fn signatures_are_reproducible() {
        let a = SignatureSigner::new(test_key());
        let b = SignatureSigner::new(test_key());
        assert_eq!(a.sign(FULL_ID, 9), b.sign(FULL_ID, 9));
        assert_ne!(a.sign(FULL_ID, 9), a.sign(FULL_ID, 10));
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let signer = SignatureSigner::new(test_key());
        let key = signer.verifying_key();
        let signature = signer.sign(FULL_ID, 12);

        assert!(verify_signature(&key, FULL_ID, 12, &signature));
        assert!(!verify_signature(&key, FULL_ID, 13, &signature));
        assert!(!verify_signature(&key, "someone@else/ftl", 12, &signature));
        assert!(!verify_signature(&key, FULL_ID, 12, "not base64!"));
        assert!(!verify_signature(&key, FULL_ID, 12, "AAAA"));
    }

    #[test]
    fn debug_redacts_key() {
        let identity = HeartbeatIdentity::new("host-1", test_key());
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("host-1"));
        assert!(rendered.contains("<redacted>"));
    }
}
