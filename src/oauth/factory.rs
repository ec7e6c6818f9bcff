//! Request factory.
//!
//! Maps discovered [`ServiceMetadata`] plus static [`AuthConfig`] onto the
//! request descriptors the rest of the crate dispatches. Nothing here
//! performs I/O. A missing endpoint yields `None` rather than an error.

use std::sync::Arc;

use super::auth::{generate_state, AuthConfig, FlowSecrets};
use super::metadata::ServiceMetadata;
use super::request::{AuthorizationRequest, EndSessionRequest, HttpRequest};

/// Builds outbound requests for one discovered provider.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    config: Arc<AuthConfig>,
    metadata: ServiceMetadata,
}

impl RequestFactory {
    pub fn new(config: Arc<AuthConfig>, metadata: ServiceMetadata) -> Self {
        Self { config, metadata }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn metadata(&self) -> &ServiceMetadata {
        &self.metadata
    }

    /// Authorization-code request against the discovered authorization endpoint.
    ///
    /// Every call generates fresh `state`, `nonce` and PKCE values.
    pub fn browser_login_request(&self) -> AuthorizationRequest {
        self.authorization_request(self.metadata.clone())
    }

    /// Login request aimed at the configured profile-management URL.
    ///
    /// Only the authorization endpoint changes; token, issuer, registration
    /// and end-session endpoints are the discovered ones.
    pub fn profile_management_request(&self) -> Option<AuthorizationRequest> {
        let endpoint = self.config.profile_management_url.clone()?;
        Some(self.authorization_request(self.metadata.with_authorization_endpoint(endpoint)))
    }

    /// End-session request, preferring the configured custom logout URL.
    ///
    /// The ID token hint is left empty and `client_id` is added to the
    /// additional parameters.
    pub fn browser_logout_request(&self) -> Option<EndSessionRequest> {
        let endpoint = self
            .config
            .custom_logout_url
            .clone()
            .or_else(|| self.metadata.end_session_endpoint.clone())?;

        let mut additional_parameters = std::collections::BTreeMap::new();
        additional_parameters.insert("client_id".to_string(), self.config.client_id.clone());

        Some(EndSessionRequest {
            end_session_endpoint: endpoint,
            id_token_hint: String::new(),
            post_logout_redirect_uri: self.config.redirect_uri.clone(),
            state: generate_state(),
            additional_parameters,
        })
    }

    /// Form-encoded revocation POST: `token=<token>&client_id=<id>`.
    ///
    /// Uses the configured revocation URL, falling back to the discovered one.
    pub fn revoke_token_request(&self, token: &str) -> Option<HttpRequest> {
        let endpoint = self
            .config
            .revoke_token_url
            .clone()
            .or_else(|| self.metadata.revocation_endpoint.clone())?;

        Some(HttpRequest::form_post(
            endpoint,
            &[("token", token), ("client_id", self.config.client_id.as_str())],
        ))
    }

    /// Bearer GET to the discovered userinfo endpoint.
    pub fn user_info_request(&self, access_token: &str) -> Option<HttpRequest> {
        let endpoint = self.metadata.userinfo_endpoint.clone()?;
        Some(HttpRequest::get(endpoint).with_bearer(access_token))
    }

    fn authorization_request(&self, metadata: ServiceMetadata) -> AuthorizationRequest {
        AuthorizationRequest {
            metadata,
            client_id: self.config.client_id.clone(),
            redirect_uri: self.config.redirect_uri.clone(),
            scopes: self.config.scopes.clone(),
            secrets: FlowSecrets::new(),
            additional_parameters: self.config.additional_parameters(),
        }
    }
}
