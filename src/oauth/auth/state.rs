//! Per-redirect secrets.
//!
//! Each browser redirect gets its own [`FlowSecrets`]: the `state` nonce used
//! to correlate and CSRF-check the callback, the OIDC `nonce`, and a PKCE pair.
//! A fresh set must be generated for every redirect attempt.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::pkce::Pkce;

/// Secrets bound to one outstanding redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSecrets {
    /// Random `state` parameter, echoed back by the authorization server.
    pub state: String,
    /// OIDC `nonce`, bound into the ID token.
    pub nonce: String,
    /// PKCE pair for the code exchange.
    pub pkce: Pkce,
}

impl FlowSecrets {
    /// Generate fresh secrets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: generate_state(),
            nonce: generate_state(),
            pkce: Pkce::generate(),
        }
    }

    /// Whether a received `state` matches the one we sent.
    #[must_use]
    pub fn validate_state(&self, received_state: &str) -> bool {
        self.state == received_state
    }
}

impl Default for FlowSecrets {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random state parameter: 16 random bytes, base64url, 22 chars.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_secrets_new() {
        let secrets = FlowSecrets::new();

        assert_eq!(secrets.state.len(), 22);
        assert_eq!(secrets.nonce.len(), 22);
        assert_ne!(secrets.state, secrets.nonce);
        assert!(Pkce::verify(&secrets.pkce.verifier, &secrets.pkce.challenge));
    }

    #[test]
    fn test_flow_secrets_unique() {
        let a = FlowSecrets::new();
        let b = FlowSecrets::default();

        assert_ne!(a.state, b.state);
        assert_ne!(a.pkce.verifier, b.pkce.verifier);
    }

    #[test]
    fn test_validate_state() {
        let secrets = FlowSecrets::new();
        let received = secrets.state.clone();

        assert!(secrets.validate_state(&received));
        assert!(!secrets.validate_state("wrong_state"));
        assert!(!secrets.validate_state(""));
        assert!(!secrets.validate_state(&generate_state()));
    }

    #[test]
    fn test_generate_state_url_safe() {
        let state = generate_state();
        assert_eq!(state.len(), 22);
        assert!(state
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
