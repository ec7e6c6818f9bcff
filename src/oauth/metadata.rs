//! Discovered service metadata.

use serde::{Deserialize, Serialize};
use url::Url;

use super::{Error, Result};

/// Path appended to the issuer to locate the discovery document.
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// Endpoints published by the authorization server's discovery document.
///
/// Only the fields this crate acts on are kept; everything else in the
/// document is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<Url>,
}

impl ServiceMetadata {
    /// Metadata with only the two mandatory endpoints.
    #[must_use]
    pub fn new(authorization_endpoint: Url, token_endpoint: Url) -> Self {
        Self {
            authorization_endpoint,
            token_endpoint,
            issuer: None,
            registration_endpoint: None,
            end_session_endpoint: None,
            userinfo_endpoint: None,
            revocation_endpoint: None,
        }
    }

    /// Parse a discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDiscoveryDoc`] when the body is not a discovery
    /// document or lacks the authorization or token endpoint.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::no_discovery_doc(format!("invalid discovery document: {e}")))
    }

    /// Location of the discovery document for `issuer`.
    pub fn discovery_url(issuer: &Url) -> Url {
        let mut url = issuer.clone();
        let base = issuer.path().trim_end_matches('/');
        url.set_path(&format!("{base}/{DISCOVERY_PATH}"));
        url.set_query(None);
        url
    }

    /// Copy of this metadata with the authorization endpoint replaced.
    #[must_use]
    pub fn with_authorization_endpoint(&self, endpoint: Url) -> Self {
        Self {
            authorization_endpoint: endpoint,
            ..self.clone()
        }
    }

    /// Copy of this metadata with the end-session endpoint replaced.
    #[must_use]
    pub fn with_end_session_endpoint(&self, endpoint: Url) -> Self {
        Self {
            end_session_endpoint: Some(endpoint),
            ..self.clone()
        }
    }
}
