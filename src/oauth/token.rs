//! Token endpoint responses and expiry rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::{Error, Result};

/// An access token expiring within this many seconds counts as expired.
pub const EXPIRY_TOLERANCE_SECS: i64 = 60;

/// A successful token endpoint response as it appears on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenEndpointResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// An OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Token response recorded in the authorization state.
///
/// `expires_in` is converted to an absolute instant when the response is
/// received so that freshness can be judged after a reload.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert a wire response received at `received_at`.
    pub fn from_wire(wire: TokenEndpointResponse, received_at: DateTime<Utc>) -> Self {
        Self {
            access_token: wire.access_token.filter(|t| !t.is_empty()),
            access_token_expires_at: wire
                .expires_in
                .map(|secs| received_at + Duration::seconds(secs)),
            refresh_token: wire.refresh_token.filter(|t| !t.is_empty()),
            id_token: wire.id_token.filter(|t| !t.is_empty()),
            token_type: wire.token_type,
            scope: wire.scope,
        }
    }

    /// Parse a successful token endpoint body.
    pub fn from_json(body: &[u8], received_at: DateTime<Utc>) -> Result<Self> {
        if body.is_empty() {
            return Err(Error::EmptyResponse);
        }
        let wire: TokenEndpointResponse = serde_json::from_slice(body)?;
        Ok(Self::from_wire(wire, received_at))
    }

    /// Whether the access token is present and outside the expiry tolerance.
    ///
    /// A token without an expiry is treated as fresh.
    pub fn is_access_token_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.access_token_expires_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expires_at)) => {
                expires_at - Duration::seconds(EXPIRY_TOLERANCE_SECS) > now
            }
        }
    }

    /// Carry the previous refresh token (and ID token) forward when a
    /// refresh response omits them.
    #[must_use]
    pub fn inherit_from(mut self, previous: &TokenResponse) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.id_token.is_none() {
            self.id_token = previous.id_token.clone();
        }
        self
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_deref().map(fingerprint))
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token", &self.refresh_token.as_deref().map(fingerprint))
            .field("id_token", &self.id_token.is_some())
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Short, non-reversible identifier for a token, safe to log.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("sha256:{}", &hex::encode(digest)[..12])
}
