//! Authorization state.
//!
//! [`AuthState`] is the single record of where a user is in the OAuth
//! lifecycle: the authorization response, the token response obtained for
//! it, the last authorization error and the browser session flag. All
//! derived properties are computed from the stored data on every call.
//!
//! ```text
//!   Empty ──login──▶ PendingExchange ──exchange──▶ Authorized
//!     ▲                                              │    ▲
//!     │                                   expiry / 401    │ refresh
//!     │                                              ▼    │
//!     └──────────── app-session logout ───────── Expired / Error
//! ```
//!
//! Mutation goes through [`AuthStateManager`], which persists and announces
//! every change.

pub mod codec;
pub mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::request::TokenRequest;
use super::response::AuthorizationResponse;
use super::token::{fingerprint, TokenResponse};
use super::{AuthError, Error, Result};

pub use codec::{JsonStateCodec, StateCodec};
pub use manager::{AuthStateEvent, AuthStateManager};

/// Whether the browser holds a signed-in session with the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserSessionStatus {
    Active,
    #[default]
    Inactive,
}

/// Which token an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    AccessToken,
    RefreshToken,
}

impl TokenType {
    /// The RFC 7009 `token_type_hint` value.
    pub fn hint(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hint())
    }
}

/// Position in the authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    Empty,
    PendingExchange,
    Authorized,
    Expired,
    Error,
}

/// An error recorded against the state.
///
/// Transient errors (network, 5xx) are kept for diagnostics but do not
/// count against [`AuthState::is_authorized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationErrorDetail {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub transient: bool,
}

impl AuthorizationErrorDetail {
    /// The resource server answered 401.
    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self {
            error: "unauthorized".to_string(),
            description: Some(description.into()),
            status: Some(401),
            transient: false,
        }
    }

    /// Classify an operation error.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Auth(AuthError::InvalidGrant) => Self {
                error: "invalid_grant".to_string(),
                description: None,
                status: None,
                transient: false,
            },
            Error::Auth(AuthError::OAuth { error, description }) => Self {
                error: error.clone(),
                description: description.clone(),
                status: None,
                transient: false,
            },
            Error::Api {
                status: status @ (401 | 403),
                message,
                ..
            } => Self {
                error: "unauthorized".to_string(),
                description: Some(message.clone()),
                status: Some(*status),
                transient: false,
            },
            Error::Api { status, message, .. } => Self {
                error: "http_error".to_string(),
                description: Some(message.clone()),
                status: Some(*status),
                transient: true,
            },
            other => Self {
                error: format!("{:?}", other.kind()).to_lowercase(),
                description: Some(other.to_string()),
                status: None,
                transient: true,
            },
        }
    }
}

/// An authorization response and the token response obtained for it.
///
/// Nesting the token under the authorization keeps "token without
/// authorization" unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Authorization {
    response: AuthorizationResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<TokenResponse>,
}

/// The authorization state of one session.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authorization: Option<Authorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_authorization_error: Option<AuthorizationErrorDetail>,
    #[serde(default)]
    access_token_revoked: bool,
    #[serde(default)]
    refresh_token_revoked: bool,
    // Persisted under its own key by the manager.
    #[serde(skip)]
    browser_session: BrowserSessionStatus,
    #[serde(skip)]
    needs_token_refresh: bool,
}

impl AuthState {
    /// A state with no authorization.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A state for a completed redirect, optionally already exchanged.
    pub fn from_authorization(
        response: AuthorizationResponse,
        token: Option<TokenResponse>,
    ) -> Self {
        Self {
            authorization: Some(Authorization { response, token }),
            ..Self::default()
        }
    }

    pub fn authorization_response(&self) -> Option<&AuthorizationResponse> {
        self.authorization.as_ref().map(|a| &a.response)
    }

    pub fn token_response(&self) -> Option<&TokenResponse> {
        self.authorization.as_ref().and_then(|a| a.token.as_ref())
    }

    pub fn last_authorization_error(&self) -> Option<&AuthorizationErrorDetail> {
        self.last_authorization_error.as_ref()
    }

    pub fn browser_session(&self) -> BrowserSessionStatus {
        self.browser_session
    }

    pub fn is_browser_session_active(&self) -> bool {
        self.browser_session == BrowserSessionStatus::Active
    }

    pub fn is_access_token_revoked(&self) -> bool {
        self.access_token_revoked
    }

    pub fn is_refresh_token_revoked(&self) -> bool {
        self.refresh_token_revoked
    }

    pub fn needs_token_refresh(&self) -> bool {
        self.needs_token_refresh
    }

    /// No authorization data and nothing recorded against it.
    pub fn is_empty(&self) -> bool {
        self.authorization.is_none()
            && self.last_authorization_error.is_none()
            && !self.access_token_revoked
            && !self.refresh_token_revoked
    }

    /// The access token, unless revoked.
    pub fn access_token(&self) -> Option<&str> {
        if self.access_token_revoked {
            return None;
        }
        self.token_response()?.access_token.as_deref()
    }

    /// The refresh token, unless revoked.
    pub fn refresh_token(&self) -> Option<&str> {
        if self.refresh_token_revoked {
            return None;
        }
        self.token_response()?.refresh_token.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.token_response()?.id_token.as_deref()
    }

    /// The access token if it can be used as-is at `now`.
    pub fn fresh_access_token_at(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.needs_token_refresh {
            return None;
        }
        let token = self.token_response()?;
        if token.is_access_token_fresh_at(now) {
            self.access_token()
        } else {
            None
        }
    }

    /// An authorization code exists but has not been exchanged yet.
    pub fn is_code_exchange_required(&self) -> bool {
        match &self.authorization {
            Some(auth) => auth.token.is_none() && auth.response.code.is_some(),
            None => false,
        }
    }

    /// The token endpoint answered `invalid_grant` to the current refresh
    /// token. Cleared by the next successful token response.
    pub fn is_refresh_token_rejected(&self) -> bool {
        self.last_authorization_error
            .as_ref()
            .is_some_and(|e| !e.transient && e.error == "invalid_grant")
    }

    fn has_blocking_error(&self) -> bool {
        self.last_authorization_error
            .as_ref()
            .is_some_and(|e| !e.transient)
    }

    /// Usable tokens exist and no authorization error stands against them.
    pub fn is_authorized_at(&self, now: DateTime<Utc>) -> bool {
        let has_usable_token = self
            .token_response()
            .is_some_and(|t| t.is_access_token_fresh_at(now))
            && self.access_token().is_some();
        (has_usable_token || self.refresh_token().is_some()) && !self.has_blocking_error()
    }

    pub fn is_authorized(&self) -> bool {
        self.is_authorized_at(Utc::now())
    }

    /// Whether the UI should treat the user as signed in to the app.
    pub fn is_auth_state_active(&self) -> bool {
        self.is_authorized()
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> AuthStatus {
        match &self.authorization {
            None => AuthStatus::Empty,
            Some(auth) if auth.token.is_none() => {
                if auth.response.code.is_some() {
                    AuthStatus::PendingExchange
                } else {
                    AuthStatus::Empty
                }
            }
            Some(_) if self.has_blocking_error() => AuthStatus::Error,
            Some(_) if self.is_authorized_at(now) => AuthStatus::Authorized,
            Some(_) => AuthStatus::Expired,
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.status_at(Utc::now())
    }

    /// Refresh-token grant for this state, if a refresh token is available
    /// and has not been rejected.
    pub fn token_refresh_request(&self) -> Option<TokenRequest> {
        if self.is_refresh_token_rejected() {
            return None;
        }
        let request = &self.authorization_response()?.request;
        let refresh_token = self.refresh_token()?;
        Some(TokenRequest::refresh(
            request.metadata.token_endpoint.clone(),
            request.client_id.clone(),
            refresh_token,
        ))
    }

    /// Code-exchange grant for the stored authorization response.
    pub fn code_exchange_request(&self) -> Result<TokenRequest> {
        self.authorization_response()
            .ok_or(AuthError::CodeExchangeRequired)?
            .token_exchange_request()
    }

    /// Same authorization data, ignoring runtime-only fields.
    pub(crate) fn same_authorization(&self, other: &Self) -> bool {
        self.authorization == other.authorization
            && self.last_authorization_error == other.last_authorization_error
            && self.access_token_revoked == other.access_token_revoked
            && self.refresh_token_revoked == other.refresh_token_revoked
    }

    pub(crate) fn apply_token_response(&mut self, token: TokenResponse) -> Result<()> {
        let authorization = self
            .authorization
            .as_mut()
            .ok_or(AuthError::CodeExchangeRequired)?;
        let token = match &authorization.token {
            Some(previous) => token.inherit_from(previous),
            None => token,
        };
        authorization.token = Some(token);
        self.last_authorization_error = None;
        self.access_token_revoked = false;
        self.refresh_token_revoked = false;
        self.needs_token_refresh = false;
        Ok(())
    }

    pub(crate) fn record_error(&mut self, detail: AuthorizationErrorDetail) {
        self.last_authorization_error = Some(detail);
    }

    pub(crate) fn apply_authorization_error(&mut self, detail: AuthorizationErrorDetail) {
        self.last_authorization_error = Some(AuthorizationErrorDetail {
            transient: false,
            ..detail
        });
        self.needs_token_refresh = true;
    }

    pub(crate) fn set_token_revoked(&mut self, token_type: TokenType) {
        match token_type {
            TokenType::AccessToken => self.access_token_revoked = true,
            TokenType::RefreshToken => self.refresh_token_revoked = true,
        }
    }

    pub(crate) fn set_browser_session(&mut self, status: BrowserSessionStatus) {
        self.browser_session = status;
    }

    pub(crate) fn set_needs_token_refresh(&mut self) {
        self.needs_token_refresh = true;
    }

    /// Masked, human-readable dump.
    pub fn summary(&self) -> String {
        let mask = |t: Option<&str>| t.map(fingerprint).unwrap_or_else(|| "none".to_string());
        let expires = self
            .token_response()
            .and_then(|t| t.access_token_expires_at)
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "n/a".to_string());
        let error = self
            .last_authorization_error
            .as_ref()
            .map(|e| e.error.clone())
            .unwrap_or_else(|| "none".to_string());

        format!(
            "status: {:?}\n\
             browser session: {:?}\n\
             code exchange required: {}\n\
             access token: {} (expires {}, revoked: {})\n\
             refresh token: {} (revoked: {})\n\
             last authorization error: {}",
            self.status(),
            self.browser_session,
            self.is_code_exchange_required(),
            mask(self.token_response().and_then(|t| t.access_token.as_deref())),
            expires,
            self.access_token_revoked,
            mask(self.token_response().and_then(|t| t.refresh_token.as_deref())),
            self.refresh_token_revoked,
            error,
        )
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("status", &self.status())
            .field("token", &self.token_response())
            .field("last_authorization_error", &self.last_authorization_error)
            .field("browser_session", &self.browser_session)
            .field("access_token_revoked", &self.access_token_revoked)
            .field("refresh_token_revoked", &self.refresh_token_revoked)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::oauth::request::TokenGrant;
    use rstest::rstest;

    #[test]
    fn test_empty_state() {
        let state = AuthState::empty();

        assert!(state.is_empty());
        assert!(!state.is_authorized());
        assert!(!state.is_code_exchange_required());
        assert_eq!(state.status(), AuthStatus::Empty);
        assert!(state.token_refresh_request().is_none());
        assert!(matches!(
            state.code_exchange_request(),
            Err(Error::Auth(AuthError::CodeExchangeRequired))
        ));
    }

    #[test]
    fn test_code_exchange_flag_clears_after_token_response() {
        let mut state = AuthState::from_authorization(authorization_response(Some("abc")), None);
        assert!(state.is_code_exchange_required());
        assert_eq!(state.status(), AuthStatus::PendingExchange);

        state
            .apply_token_response(token("at", Some("rt"), 3600))
            .unwrap();
        assert!(!state.is_code_exchange_required());
        assert_eq!(state.status(), AuthStatus::Authorized);
    }

    #[test]
    fn test_token_response_requires_authorization() {
        let mut state = AuthState::empty();
        let err = state
            .apply_token_response(token("at", None, 3600))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::CodeExchangeRequired)));
        assert!(state.token_response().is_none());
    }

    #[rstest]
    #[case(3600, Some("rt"), true)]
    #[case(3600, None, true)]
    #[case(-10, Some("rt"), true)]
    #[case(-10, None, false)]
    #[case(30, None, false)]
    fn test_is_authorized(
        #[case] expires_in: i64,
        #[case] refresh: Option<&str>,
        #[case] authorized: bool,
    ) {
        let state = fixtures::authorized("at", refresh, expires_in);
        assert_eq!(state.is_authorized(), authorized);
    }

    #[test]
    fn test_expired_without_refresh_token() {
        let state = authorized("at", None, -10);
        assert_eq!(state.status(), AuthStatus::Expired);
        assert!(state.fresh_access_token_at(Utc::now()).is_none());
    }

    #[test]
    fn test_authorization_error_blocks_until_refresh() {
        let mut state = authorized("at", Some("rt"), 3600);
        state.apply_authorization_error(AuthorizationErrorDetail::unauthorized("401 from api"));

        assert!(!state.is_authorized());
        assert_eq!(state.status(), AuthStatus::Error);
        assert!(state.needs_token_refresh());
        assert_eq!(state.refresh_token(), Some("rt"));
        assert!(state.fresh_access_token_at(Utc::now()).is_none());

        state
            .apply_token_response(token("at2", None, 3600))
            .unwrap();
        assert!(state.is_authorized());
        assert!(state.last_authorization_error().is_none());
        assert_eq!(state.refresh_token(), Some("rt"));
        assert_eq!(state.fresh_access_token_at(Utc::now()), Some("at2"));
    }

    #[test]
    fn test_transient_error_does_not_deauthorize() {
        let mut state = authorized("at", Some("rt"), 3600);
        state.record_error(AuthorizationErrorDetail::from_error(&Error::api(
            503,
            "unavailable",
            None,
        )));

        assert!(state.last_authorization_error().unwrap().transient);
        assert!(state.is_authorized());

        state.record_error(AuthorizationErrorDetail::from_error(&Error::Auth(
            AuthError::InvalidGrant,
        )));
        assert!(!state.is_authorized());
        assert_eq!(state.last_authorization_error().unwrap().error, "invalid_grant");
    }

    #[test]
    fn test_rejected_refresh_token_is_not_offered_again() {
        let mut state = authorized("at", Some("rt"), -10);
        assert!(state.token_refresh_request().is_some());

        state.record_error(AuthorizationErrorDetail::from_error(&Error::Auth(
            AuthError::InvalidGrant,
        )));
        assert!(state.is_refresh_token_rejected());
        assert!(state.token_refresh_request().is_none());

        state
            .apply_token_response(token("at2", Some("rt2"), 3600))
            .unwrap();
        assert!(!state.is_refresh_token_rejected());
        assert!(state.token_refresh_request().is_some());
    }

    #[test]
    fn test_unauthorized_api_call_still_allows_refresh() {
        let mut state = authorized("at", Some("rt"), 3600);
        state.apply_authorization_error(AuthorizationErrorDetail::unauthorized("401 from api"));
        assert!(!state.is_refresh_token_rejected());
        assert!(state.token_refresh_request().is_some());
    }

    #[test]
    fn test_revoked_tokens_are_hidden_and_reset_by_new_tokens() {
        let mut state = authorized("at", Some("rt"), 3600);
        state.set_token_revoked(TokenType::AccessToken);
        state.set_token_revoked(TokenType::RefreshToken);

        assert!(state.access_token().is_none());
        assert!(state.refresh_token().is_none());
        assert!(state.is_access_token_revoked());
        assert!(!state.is_authorized());

        state
            .apply_token_response(token("at2", Some("rt2"), 3600))
            .unwrap();
        assert!(!state.is_access_token_revoked());
        assert!(!state.is_refresh_token_revoked());
        assert_eq!(state.access_token(), Some("at2"));
    }

    #[test]
    fn test_token_refresh_request() {
        let state = authorized("at", Some("rt"), 3600);
        let request = state.token_refresh_request().unwrap();

        assert_eq!(request.token_endpoint.as_str(), "https://login.example.com/token");
        assert_eq!(request.client_id, "client-1");
        assert!(matches!(
            request.grant,
            TokenGrant::RefreshToken { ref refresh_token } if refresh_token == "rt"
        ));

        assert!(authorized("at", None, 3600).token_refresh_request().is_none());
    }

    #[test]
    fn test_same_authorization_ignores_runtime_fields() {
        let a = authorized("at", Some("rt"), 3600);
        let mut b = a.clone();
        b.set_browser_session(BrowserSessionStatus::Active);
        b.set_needs_token_refresh();

        assert!(a.same_authorization(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_summary_masks_tokens() {
        let state = authorized("secret-access", Some("secret-refresh"), 3600);
        let summary = state.summary();

        assert!(summary.contains("Authorized"));
        assert!(!summary.contains("secret-access"));
        assert!(!summary.contains("secret-refresh"));
        assert!(!format!("{state:?}").contains("secret-access"));
    }
}
