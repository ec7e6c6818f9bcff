//! PKCE (Proof Key for Code Exchange, RFC 7636).
//!
//! The verifier travels with the authorization request descriptor so that a
//! code stored for a manual exchange can still be redeemed after a restart.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 32 bytes produce a 43-character verifier, the RFC minimum.
const PKCE_VERIFIER_LENGTH: usize = 32;

/// PKCE challenge method.
pub const PKCE_METHOD: &str = "S256";

/// A PKCE verifier and its S256 challenge.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pkce {
    /// The code verifier, sent during token exchange. Secret.
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent in the authorization URL.
    pub challenge: String,
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("verifier", &"[redacted]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl Pkce {
    /// Generate a new verifier/challenge pair.
    #[must_use]
    pub fn generate() -> Self {
        let random_bytes: [u8; PKCE_VERIFIER_LENGTH] = rand::thread_rng().gen();
        let verifier = URL_SAFE_NO_PAD.encode(random_bytes);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Check that `challenge` was derived from `verifier`.
    #[must_use]
    pub fn verify(verifier: &str, challenge: &str) -> bool {
        Self::compute_challenge(verifier) == challenge
    }

    fn compute_challenge(verifier: &str) -> String {
        let hash = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}
