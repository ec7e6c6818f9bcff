//! Unified error types for the authorization-state engine.
//!
//! The error system uses two levels:
//!
//! 1. [`Error`] - Top-level errors covering all failure modes
//! 2. [`AuthError`] - Flow and authorization errors nested under `Error::Auth`
//!
//! [`Error`] is `Clone` so that a single refresh outcome can be handed to
//! every task waiting on it. Sources that are not `Clone` themselves are
//! held behind an `Arc`.
//!
//! # Example
//!
//! ```rust
//! use oauth_session::oauth::error::{AuthError, Error, ErrorKind};
//!
//! fn handle_error(err: &Error) {
//!     if err.is_user_cancelled() {
//!         println!("User backed out of the browser flow");
//!     } else if err.requires_reauth() {
//!         println!("User must log in again");
//!     } else if err.kind() == ErrorKind::Network {
//!         println!("Transient failure: {err}");
//!     }
//! }
//!
//! handle_error(&Error::Auth(AuthError::UserCancelled));
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid discovery document, missing endpoints, bad client setup.
    Configuration,
    /// The flow cannot proceed: user cancelled, tokens or code missing.
    Flow,
    /// Non-2xx responses, transport failures, empty bodies.
    Network,
    /// The server rejected our grant or a resource call returned unauthorized.
    Authorization,
    /// Persistence failures.
    Storage,
    /// Serialization and parsing failures.
    Data,
}

/// Unified error type for the authorization-state engine.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Flow or authorization error.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Non-2xx response from a token, revocation or resource endpoint.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code from the response.
        status: u16,
        /// Response body or a short description of it.
        message: String,
        /// Duration to wait before retrying (for rate limits).
        retry_after: Option<Duration>,
    },

    /// Network or HTTP transport error.
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery metadata has not been loaded or lacks a required endpoint.
    #[error("No discovery document: {0}")]
    NoDiscoveryDoc(String),

    /// A response that must carry a body came back empty.
    #[error("Empty response body")]
    EmptyResponse,

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted state could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl Error {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a codec error.
    #[must_use]
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a missing-discovery error.
    #[must_use]
    pub fn no_discovery_doc(msg: impl Into<String>) -> Self {
        Self::NoDiscoveryDoc(msg.into())
    }

    /// Create an API error.
    ///
    /// ```rust
    /// use oauth_session::oauth::error::Error;
    /// use std::time::Duration;
    ///
    /// let err = Error::api(429, "Rate limit exceeded", Some(Duration::from_secs(60)));
    /// assert!(err.is_rate_limit());
    /// assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    /// ```
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            retry_after,
        }
    }

    /// Map this error onto its [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(auth) => auth.kind(),
            Self::Api { status: 401, .. } => ErrorKind::Authorization,
            Self::Api { .. } | Self::Network(_) | Self::EmptyResponse => ErrorKind::Network,
            Self::Config(_) | Self::NoDiscoveryDoc(_) | Self::Url(_) => ErrorKind::Configuration,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Json(_) | Self::Codec(_) => ErrorKind::Data,
        }
    }

    /// Check if this is a rate limit error (HTTP 429).
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }

    /// Check if this is any authentication-related error.
    ///
    /// Returns `true` for all `Error::Auth` variants and for HTTP 401/403.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Api { status: 401 | 403, .. })
    }

    /// Check if the user backed out of a browser-presented flow.
    #[must_use]
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, Self::Auth(AuthError::UserCancelled))
    }

    /// Check if this error requires the user to log in again.
    ///
    /// ```rust
    /// use oauth_session::oauth::error::{AuthError, Error};
    ///
    /// assert!(Error::Auth(AuthError::InvalidGrant).requires_reauth());
    /// assert!(!Error::Auth(AuthError::UserCancelled).requires_reauth());
    /// ```
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::Auth(auth_err) => auth_err.requires_reauth(),
            Self::Api { status: 401, .. } => true,
            _ => false,
        }
    }

    /// Get the retry-after duration if this is a rate limit error.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Check if this error is transient and safe to retry.
    ///
    /// Returns `true` for transport failures, 5xx responses and rate limits.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Flow and authorization errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// No authorization state exists.
    #[error("Not authenticated - please log in")]
    NotAuthenticated,

    /// The user dismissed the browser flow.
    #[error("User cancelled the browser flow")]
    UserCancelled,

    /// Neither a usable access token nor a refresh token is available.
    #[error("No tokens available")]
    NoTokens,

    /// A refresh was requested but the state carries no refresh token.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The userinfo endpoint is unavailable so no bearer request can be built.
    #[error("No bearer token request could be built - userinfo endpoint unavailable")]
    NoBearerToken,

    /// There is no stored authorization response to exchange.
    #[error("Code exchange required but no authorization response is stored")]
    CodeExchangeRequired,

    /// The authorization response carries no code.
    #[error("Authorization response carries no authorization code")]
    MissingAuthorizationCode,

    /// The refresh token or authorization code was rejected by the server.
    ///
    /// Fatal for the session: the user has to log in again.
    #[error("Invalid grant - refresh token is invalid or revoked")]
    InvalidGrant,

    /// The `state` returned by the redirect does not match the request.
    #[error("OAuth state mismatch - possible CSRF attack")]
    StateMismatch,

    /// An OAuth error response other than `invalid_grant`.
    #[error("OAuth error '{error}'{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    OAuth {
        /// The `error` code from the response.
        error: String,
        /// The `error_description`, if any.
        description: Option<String>,
    },

    /// The browser agent failed to present or complete the flow.
    #[error("Browser agent failed: {0}")]
    AgentFailed(String),

    /// Token refresh failed with a specific reason.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

impl AuthError {
    /// Check if this error requires the user to log in again.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::NoTokens
                | Self::NoRefreshToken
                | Self::InvalidGrant
                | Self::StateMismatch
        )
    }

    /// Map this error onto its [`ErrorKind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidGrant | Self::OAuth { .. } | Self::StateMismatch => {
                ErrorKind::Authorization
            }
            _ => ErrorKind::Flow,
        }
    }

    /// Create an OAuth error from a server error response.
    #[must_use]
    pub fn oauth(error: impl Into<String>, description: Option<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description,
        }
    }

    /// Create an agent failure error.
    #[must_use]
    pub fn agent_failed(msg: impl Into<String>) -> Self {
        Self::AgentFailed(msg.into())
    }

    /// Create a refresh failed error.
    #[must_use]
    pub fn refresh_failed(msg: impl Into<String>) -> Self {
        Self::RefreshFailed(msg.into())
    }
}

#[cfg(feature = "keyring")]
impl From<keyring::Error> for Error {
    fn from(e: keyring::Error) -> Self {
        Self::Storage(format!("Keyring error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing required field");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing required field"
        );

        let err = Error::api(429, "rate limited", Some(Duration::from_secs(60)));
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_oauth_error_display() {
        let err = AuthError::oauth("access_denied", Some("user said no".into()));
        assert_eq!(err.to_string(), "OAuth error 'access_denied': user said no");

        let err = AuthError::oauth("server_error", None);
        assert_eq!(err.to_string(), "OAuth error 'server_error'");
    }

    #[test]
    fn test_is_rate_limit() {
        let err = Error::api(429, "rate limited", Some(Duration::from_secs(60)));
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

        let err = Error::api(500, "server error", None);
        assert!(!err.is_rate_limit());
        assert_eq!(err.retry_after(), None);
    }

    #[rstest]
    #[case(Error::Auth(AuthError::UserCancelled), ErrorKind::Flow)]
    #[case(Error::Auth(AuthError::NoRefreshToken), ErrorKind::Flow)]
    #[case(Error::Auth(AuthError::InvalidGrant), ErrorKind::Authorization)]
    #[case(Error::api(401, "unauthorized", None), ErrorKind::Authorization)]
    #[case(Error::api(503, "unavailable", None), ErrorKind::Network)]
    #[case(Error::EmptyResponse, ErrorKind::Network)]
    #[case(Error::no_discovery_doc("no issuer"), ErrorKind::Configuration)]
    #[case(Error::storage("disk full"), ErrorKind::Storage)]
    #[case(Error::codec("bad version"), ErrorKind::Data)]
    fn test_error_kind(#[case] err: Error, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_user_cancelled_is_distinguishable() {
        let cancelled = Error::Auth(AuthError::UserCancelled);
        assert!(cancelled.is_user_cancelled());
        assert!(!cancelled.requires_reauth());

        let api = Error::api(400, "bad request", None);
        assert!(!api.is_user_cancelled());
    }

    #[test]
    fn test_requires_reauth() {
        assert!(Error::Auth(AuthError::InvalidGrant).requires_reauth());
        assert!(Error::Auth(AuthError::NoTokens).requires_reauth());
        assert!(Error::api(401, "unauthorized", None).requires_reauth());
        assert!(!Error::api(500, "server error", None).requires_reauth());
        assert!(!Error::Auth(AuthError::agent_failed("closed")).requires_reauth());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(!Error::config("test").is_recoverable());
        assert!(Error::api(502, "bad gateway", None).is_recoverable());
        assert!(Error::api(429, "slow down", None).is_recoverable());
        assert!(!Error::api(400, "bad request", None).is_recoverable());
        assert!(!Error::api(401, "unauthorized", None).is_recoverable());
    }

    #[test]
    fn test_error_conversions() {
        let json_err: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid");
        let err: Error = json_err.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let url_err: std::result::Result<url::Url, _> = "not a url".parse();
        let err: Error = url_err.unwrap_err().into();
        assert!(matches!(err, Error::Url(_)));

        let err: Error = AuthError::NotAuthenticated.into();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_error_clone_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        let err: Error = io_err.into();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(cloned.is_recoverable());
        assert!(std::error::Error::source(&cloned).is_some());
    }
}
