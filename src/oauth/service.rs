//! Collaborator seams.
//!
//! The [`Authenticator`](super::Authenticator) talks to the outside world
//! only through these traits, so every flow can run against fakes.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use super::awaiter::RedirectCallback;
use super::metadata::ServiceMetadata;
use super::request::{HttpRequest, TokenRequest};
use super::token::TokenResponse;
use super::Result;

/// Response to an [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `Retry-After` in delta-seconds form.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse()
            .ok()
            .map(Duration::from_secs)
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What a browser agent is asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    /// Fully built authorization or end-session URL.
    pub url: Url,
    /// Where the provider will send the browser back to.
    pub redirect_uri: Url,
    /// `state` the redirect must carry.
    pub state: String,
    /// Local port to listen on when it differs from the redirect URI's.
    pub callback_port: Option<u16>,
}

/// Sends plain HTTP requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Any HTTP status is a successful send; only transport failures error.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Talks to the authorization server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Fetch the OpenID discovery document for `issuer`.
    async fn discover_configuration(&self, issuer: &Url) -> Result<ServiceMetadata>;

    /// POST a token request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidGrant`](super::AuthError::InvalidGrant) when the grant is dead
    /// - [`AuthError::OAuth`](super::AuthError::OAuth) for other OAuth error bodies
    /// - [`Error::Api`](super::Error::Api) for non-OAuth HTTP failures
    async fn perform_token_request(&self, request: &TokenRequest) -> Result<TokenResponse>;
}

/// Presents a URL in a browser and reports the redirect back.
///
/// `present` returns once presentation has started. The redirect URL (or
/// the failure) arrives later through `callback`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserAgent: Send + Sync {
    async fn present(&self, request: AgentRequest, callback: RedirectCallback<Url>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, true)]
    #[case(204, true)]
    #[case(302, false)]
    #[case(401, false)]
    #[case(503, false)]
    fn test_is_success(#[case] status: u16, #[case] success: bool) {
        assert_eq!(HttpResponse::new(status, "").is_success(), success);
    }

    #[test]
    fn test_retry_after() {
        let response = HttpResponse::new(429, "").with_header("Retry-After", "30");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(30)));

        let dated = HttpResponse::new(429, "")
            .with_header("retry-after", "Wed, 21 Oct 2026 07:28:00 GMT");
        assert_eq!(dated.retry_after(), None);
    }
}
