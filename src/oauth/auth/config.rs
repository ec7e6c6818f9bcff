//! Static client configuration.
//!
//! [`AuthConfig`] holds everything about the OAuth client that does not come
//! from the discovery document: client id, redirect URI, scopes, extra
//! authorization parameters and the optional endpoint overrides used for
//! profile management, logout and revocation.
//!
//! # Example
//!
//! ```rust
//! use oauth_session::oauth::AuthConfig;
//!
//! let config = AuthConfig::builder()
//!     .issuer("https://login.example.com")
//!     .client_id("my-client-id")
//!     .redirect_uri("http://127.0.0.1:8400/callback")
//!     .prompt("login")
//!     .revoke_token_url("https://login.example.com/oauth2/revoke")
//!     .try_build()
//!     .unwrap();
//!
//! assert_eq!(config.scopes, vec!["openid", "profile"]);
//! assert_eq!(config.additional_parameters().get("prompt").map(String::as_str), Some("login"));
//! ```

use std::collections::BTreeMap;
use url::Url;

use crate::oauth::{Error, Result};

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile"];

/// Storage key for the serialized authorization state.
pub const DEFAULT_AUTH_STATE_KEY: &str = "authState";

/// Storage key for the browser session flag.
pub const DEFAULT_BROWSER_STATE_KEY: &str = "browserState";

/// OAuth client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Issuer URL; discovery is fetched from its well-known location.
    pub issuer: Url,

    /// OAuth client ID.
    pub client_id: String,

    /// Redirect URI registered with the provider.
    pub redirect_uri: Url,

    /// Scopes to request.
    pub scopes: Vec<String>,

    /// `prompt` authorization parameter.
    pub prompt: Option<String>,

    /// `claims` authorization parameter (a JSON document, passed verbatim).
    pub claims: Option<String>,

    /// `acr_values` authorization parameter.
    pub acr_values: Option<String>,

    /// Any other parameters appended to authorization requests.
    pub extra_parameters: BTreeMap<String, String>,

    /// Replaces the authorization endpoint for profile management redirects.
    pub profile_management_url: Option<Url>,

    /// Replaces the discovered end-session endpoint for logout redirects.
    pub custom_logout_url: Option<Url>,

    /// Token revocation endpoint. Falls back to the discovered one.
    pub revoke_token_url: Option<Url>,

    /// Storage key for the serialized authorization state.
    pub auth_state_storage_key: String,

    /// Storage key for the browser session flag.
    pub browser_state_storage_key: String,

    /// Port for the loopback redirect listener; defaults to the redirect URI's port.
    pub callback_port: Option<u16>,
}

impl AuthConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Parameters added to every authorization request.
    ///
    /// `prompt`, `claims` and `acr_values` override same-named entries in
    /// [`Self::extra_parameters`]. Empty values are dropped.
    #[must_use]
    pub fn additional_parameters(&self) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = self
            .extra_parameters
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (name, value) in [
            ("prompt", &self.prompt),
            ("claims", &self.claims),
            ("acr_values", &self.acr_values),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                params.insert(name.to_string(), value.to_string());
            }
        }

        params
    }

    /// Port the loopback listener should bind.
    pub fn get_callback_port(&self) -> Option<u16> {
        self.callback_port.or_else(|| self.redirect_uri.port())
    }
}

/// Builder for [`AuthConfig`].
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    issuer: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    scopes: Vec<String>,
    prompt: Option<String>,
    claims: Option<String>,
    acr_values: Option<String>,
    extra_parameters: BTreeMap<String, String>,
    profile_management_url: Option<String>,
    custom_logout_url: Option<String>,
    revoke_token_url: Option<String>,
    auth_state_storage_key: Option<String>,
    browser_state_storage_key: Option<String>,
    callback_port: Option<u16>,
}

impl AuthConfigBuilder {
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn claims(mut self, claims: impl Into<String>) -> Self {
        self.claims = Some(claims.into());
        self
    }

    #[must_use]
    pub fn acr_values(mut self, acr_values: impl Into<String>) -> Self {
        self.acr_values = Some(acr_values.into());
        self
    }

    #[must_use]
    pub fn extra_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_parameters.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn profile_management_url(mut self, url: impl Into<String>) -> Self {
        self.profile_management_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn custom_logout_url(mut self, url: impl Into<String>) -> Self {
        self.custom_logout_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn revoke_token_url(mut self, url: impl Into<String>) -> Self {
        self.revoke_token_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn auth_state_storage_key(mut self, key: impl Into<String>) -> Self {
        self.auth_state_storage_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn browser_state_storage_key(mut self, key: impl Into<String>) -> Self {
        self.browser_state_storage_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn callback_port(mut self, port: u16) -> Self {
        self.callback_port = Some(port);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `issuer`, `client_id` or `redirect_uri`
    /// is missing, and [`Error::Url`] when any URL fails to parse.
    pub fn try_build(self) -> Result<AuthConfig> {
        let issuer = self
            .issuer
            .ok_or_else(|| Error::config("issuer is required"))?;
        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::config("client_id is required"))?;
        let redirect_uri = self
            .redirect_uri
            .ok_or_else(|| Error::config("redirect_uri is required"))?;

        let scopes = if self.scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect()
        } else {
            self.scopes
        };

        Ok(AuthConfig {
            issuer: Url::parse(&issuer)?,
            client_id,
            redirect_uri: Url::parse(&redirect_uri)?,
            scopes,
            prompt: self.prompt,
            claims: self.claims,
            acr_values: self.acr_values,
            extra_parameters: self.extra_parameters,
            profile_management_url: parse_optional(self.profile_management_url)?,
            custom_logout_url: parse_optional(self.custom_logout_url)?,
            revoke_token_url: parse_optional(self.revoke_token_url)?,
            auth_state_storage_key: self
                .auth_state_storage_key
                .unwrap_or_else(|| DEFAULT_AUTH_STATE_KEY.to_string()),
            browser_state_storage_key: self
                .browser_state_storage_key
                .unwrap_or_else(|| DEFAULT_BROWSER_STATE_KEY.to_string()),
            callback_port: self.callback_port,
        })
    }
}

fn parse_optional(value: Option<String>) -> Result<Option<Url>> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => Ok(Some(Url::parse(&v)?)),
        None => Ok(None),
    }
}
