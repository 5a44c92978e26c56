//! PKCE (Proof Key for Code Exchange) generation.
//!
//! Only the `S256` challenge method is supported; plain-text PKCE is not.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE challenge method sent in the authorization URL.
pub const PKCE_METHOD: &str = "S256";

/// Number of random bytes in the verifier (256 bits of entropy).
const VERIFIER_BYTES: usize = 32;

/// A PKCE verifier/challenge pair.
///
/// Generated fresh per login attempt and never persisted; the verifier
/// lives only for the duration of one authorization round-trip.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The code verifier (secret, sent during token exchange).
    pub verifier: String,
    /// The code challenge: base64url(SHA-256(verifier)), no padding.
    pub challenge: String,
}

impl PkcePair {
    /// Generate a new verifier/challenge pair.
    ///
    /// The verifier is 32 cryptographically random bytes, base64url
    /// encoded without padding (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; VERIFIER_BYTES];
        rand::thread_rng().fill(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Check that a challenge matches a verifier.
    #[must_use]
    pub fn verify(verifier: &str, challenge: &str) -> bool {
        Self::compute_challenge(verifier) == challenge
    }

    fn compute_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_length() {
        // 32 bytes base64url encoded = 43 characters.
        let pkce = PkcePair::generate();
        assert_eq!(pkce.verifier.len(), 43);
    }

    #[test]
    fn test_verifier_url_safe() {
        let pkce = PkcePair::generate();
        assert!(
            pkce.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "Verifier contains non-URL-safe characters: {}",
            pkce.verifier
        );
    }

    #[test]
    fn test_challenge_is_sha256_of_verifier() {
        let pkce = PkcePair::generate();
        let mut hasher = Sha256::new();
        hasher.update(pkce.verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn test_verify() {
        let pkce = PkcePair::generate();
        assert!(PkcePair::verify(&pkce.verifier, &pkce.challenge));
        assert!(!PkcePair::verify("wrong_verifier", &pkce.challenge));
        assert!(!PkcePair::verify(&pkce.verifier, "wrong_challenge"));
    }

    #[test]
    fn test_unique_generation() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }
}
