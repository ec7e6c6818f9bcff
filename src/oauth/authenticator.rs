//! The authorization façade.
//!
//! [`Authenticator`] owns the live [`AuthState`] (through its
//! [`AuthStateManager`]), the [`RequestFactory`] built from discovery, and
//! the [`RefreshCoalescer`]. Browser flows are split in two: a `start_*`
//! call builds the request and hands it to the [`BrowserAgent`], returning a
//! [`BrowserSession`] the caller holds; the matching `handle_*` call awaits
//! the redirect and parses it. A `finish_*` call then commits the result.
//!
//! ```rust,no_run
//! use oauth_session::oauth::{AuthConfig, Authenticator, MemoryBlobStorage};
//!
//! # async fn example() -> oauth_session::oauth::Result<()> {
//! let config = AuthConfig::builder()
//!     .issuer("https://login.example.com")
//!     .client_id("my-client")
//!     .redirect_uri("http://127.0.0.1:8400/callback")
//!     .try_build()?;
//! let auth = Authenticator::with_defaults(config, MemoryBlobStorage::new())?;
//!
//! auth.load_auth_state().await?;
//! auth.load_discovery_config().await?;
//!
//! let session = auth.start_browser_login_with_auto_code_exchange().await?;
//! let state = auth.handle_browser_login_with_auto_code_exchange_response(session).await;
//! auth.finish_login_with_auth_state_response(state.ok()).await?;
//!
//! let token = auth.get_access_token().await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```
//!
//! Mutating operations are not arbitrated against each other (finishing a
//! login while logging out is the caller's race to avoid). Concurrent
//! [`Authenticator::get_access_token`] calls are supported and share one
//! refresh.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::agent::LoopbackBrowserAgent;
use super::auth::AuthConfig;
use super::awaiter::{pending_redirect, ResponseAwaiter};
use super::coalescer::{RefreshAbandoned, RefreshCoalescer};
use super::factory::RequestFactory;
use super::http::{HttpAuthorizationService, ReqwestHttpClient};
use super::metadata::ServiceMetadata;
use super::request::{AuthorizationRequest, EndSessionRequest};
use super::response::{AuthorizationResponse, EndSessionResponse};
use super::service::{AgentRequest, AuthorizationService, BrowserAgent, HttpClient};
use super::state::{
    AuthState, AuthStateEvent, AuthStateManager, AuthorizationErrorDetail, BrowserSessionStatus,
    TokenType,
};
use super::storage::BlobStorage;
use super::token::fingerprint;
use super::{AuthError, Error, Result};

impl From<RefreshAbandoned> for Error {
    fn from(_: RefreshAbandoned) -> Self {
        AuthError::refresh_failed("refresh was abandoned before completing").into()
    }
}

/// A browser redirect in flight.
///
/// Returned by the `start_*` operations; keep it until passing it to the
/// matching `handle_*` operation. Dropping it abandons the flow.
#[derive(Debug)]
pub struct BrowserSession<R> {
    request: R,
    awaiter: ResponseAwaiter<Url>,
}

/// Session for login and profile-management redirects.
pub type LoginSession = BrowserSession<AuthorizationRequest>;

/// Session for end-session redirects.
pub type LogoutSession = BrowserSession<EndSessionRequest>;

impl<R> BrowserSession<R> {
    pub fn request(&self) -> &R {
        &self.request
    }

    /// The `state` value the redirect must carry.
    pub fn state(&self) -> &str {
        self.awaiter.state()
    }

    async fn redirect(self) -> Result<(R, Url)> {
        let url = self.awaiter.wait_for_callback().await?;
        Ok((self.request, url))
    }
}

/// OAuth2/OIDC session orchestration.
pub struct Authenticator<S> {
    config: Arc<AuthConfig>,
    service: Arc<dyn AuthorizationService>,
    http: Arc<dyn HttpClient>,
    agent: Arc<dyn BrowserAgent>,
    factory: OnceCell<RequestFactory>,
    state: AuthStateManager<S>,
    refresher: RefreshCoalescer<String, Error>,
}

impl<S> std::fmt::Debug for Authenticator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("issuer", &self.config.issuer.as_str())
            .field("client_id", &self.config.client_id)
            .field("discovered", &self.factory.initialized())
            .field("refresh", &self.refresher)
            .finish_non_exhaustive()
    }
}

impl<S: BlobStorage> Authenticator<S> {
    pub fn new(
        config: AuthConfig,
        storage: S,
        service: Arc<dyn AuthorizationService>,
        http: Arc<dyn HttpClient>,
        agent: Arc<dyn BrowserAgent>,
    ) -> Self {
        let state = AuthStateManager::new(storage).with_keys(
            config.auth_state_storage_key.clone(),
            config.browser_state_storage_key.clone(),
        );
        Self {
            config: Arc::new(config),
            service,
            http,
            agent,
            factory: OnceCell::new(),
            state,
            refresher: RefreshCoalescer::new(),
        }
    }

    /// Authenticator wired to reqwest and the system browser.
    pub fn with_defaults(config: AuthConfig, storage: S) -> Result<Self> {
        let http = ReqwestHttpClient::new()?;
        let service = HttpAuthorizationService::new(http.clone());
        Ok(Self::new(
            config,
            storage,
            Arc::new(service),
            Arc::new(http),
            Arc::new(LoopbackBrowserAgent::new()),
        ))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Discovery and state
    // ---------------------------------------------------------------------

    /// Fetch the discovery document once and build the request factory.
    ///
    /// Later calls return the cached metadata. A failed fetch is not cached.
    #[instrument(skip(self), fields(issuer = %self.config.issuer))]
    pub async fn load_discovery_config(&self) -> Result<&ServiceMetadata> {
        let factory = self
            .factory
            .get_or_try_init(|| async {
                let metadata = self.service.discover_configuration(&self.config.issuer).await?;
                Ok::<_, Error>(RequestFactory::new(Arc::clone(&self.config), metadata))
            })
            .await?;
        Ok(factory.metadata())
    }

    pub fn discovery_config(&self) -> Option<&ServiceMetadata> {
        self.factory.get().map(RequestFactory::metadata)
    }

    fn factory(&self) -> Result<&RequestFactory> {
        self.factory
            .get()
            .ok_or_else(|| Error::no_discovery_doc("discovery configuration has not been loaded"))
    }

    /// Restore the persisted state.
    pub async fn load_auth_state(&self) -> Result<AuthState> {
        self.state.load().await
    }

    pub async fn auth_state(&self) -> AuthState {
        self.state.snapshot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.state.subscribe()
    }

    pub async fn state_summary(&self) -> String {
        self.state.summary().await
    }

    pub async fn is_auth_state_active(&self) -> bool {
        self.state.snapshot().await.is_auth_state_active()
    }

    pub async fn is_browser_session_active(&self) -> bool {
        self.state.snapshot().await.is_browser_session_active()
    }

    pub async fn is_code_exchange_required(&self) -> bool {
        self.state.snapshot().await.is_code_exchange_required()
    }

    pub async fn is_access_token_revoked(&self) -> bool {
        self.state.snapshot().await.is_access_token_revoked()
    }

    pub async fn is_refresh_token_revoked(&self) -> bool {
        self.state.snapshot().await.is_refresh_token_revoked()
    }

    /// The stored access token, fresh or not.
    pub async fn access_token(&self) -> Option<String> {
        self.state.snapshot().await.access_token().map(str::to_string)
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.snapshot().await.refresh_token().map(str::to_string)
    }

    // ---------------------------------------------------------------------
    // Tokens
    // ---------------------------------------------------------------------

    /// A usable access token, refreshing first when needed.
    ///
    /// Concurrent callers that need a refresh share a single token request
    /// and all observe its outcome.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoTokens`] when there is neither a usable access token nor a refresh token
    /// - whatever [`Self::refresh_tokens`] fails with
    #[instrument(skip(self))]
    pub async fn get_access_token(&self) -> Result<String> {
        let state = self.state.snapshot().await;
        let now = Utc::now();

        if let Some(token) = state.fresh_access_token_at(now) {
            return Ok(token.to_string());
        }
        if state.is_refresh_token_rejected() {
            return Err(AuthError::InvalidGrant.into());
        }
        if state.refresh_token().is_none() {
            // Nothing to refresh with; an unexpired token is still usable.
            return match state.access_token() {
                Some(token) if state.is_authorized_at(now) => Ok(token.to_string()),
                _ => Err(AuthError::NoTokens.into()),
            };
        }

        self.refresher
            .execute(|| self.refresh_unless_fresh())
            .await
    }

    /// Leader side of [`Self::get_access_token`]. A refresh may have
    /// finished since the caller's snapshot, so freshness is checked again.
    async fn refresh_unless_fresh(&self) -> Result<String> {
        let current = self.state.snapshot().await;
        if let Some(token) = current.fresh_access_token_at(Utc::now()) {
            return Ok(token.to_string());
        }
        let refreshed = self.refresh_tokens().await?;
        refreshed
            .access_token()
            .map(str::to_string)
            .ok_or_else(|| AuthError::NoTokens.into())
    }

    /// Redeem the refresh token and record the outcome.
    ///
    /// A response without a new refresh token keeps the current one.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoRefreshToken`] when the state has no usable refresh token
    /// - [`AuthError::InvalidGrant`] when the server rejects it, or already has; the
    ///   refresh token is not sent again until a new login
    #[instrument(skip(self))]
    pub async fn refresh_tokens(&self) -> Result<AuthState> {
        let state = self.state.snapshot().await;
        if state.is_refresh_token_rejected() {
            return Err(AuthError::InvalidGrant.into());
        }
        let request = state
            .token_refresh_request()
            .ok_or(AuthError::NoRefreshToken)?;

        match self.service.perform_token_request(&request).await {
            Ok(token) => {
                self.state.update_with_token_response(Ok(token)).await?;
                info!("Tokens refreshed");
                Ok(self.state.snapshot().await)
            }
            Err(err) => {
                if matches!(err, Error::Auth(AuthError::InvalidGrant)) {
                    warn!("Refresh token rejected, a new login is required");
                } else {
                    warn!(error = %err, "Token refresh failed");
                }
                self.state.update_with_token_response(Err(&err)).await?;
                Err(err)
            }
        }
    }

    /// Exchange the stored authorization code for tokens.
    ///
    /// # Errors
    ///
    /// - [`AuthError::CodeExchangeRequired`] without a stored authorization response
    /// - [`AuthError::MissingAuthorizationCode`] if that response has no code
    #[instrument(skip(self))]
    pub async fn exchange_authorization_code(&self) -> Result<AuthState> {
        let request = self.state.snapshot().await.code_exchange_request()?;

        match self.service.perform_token_request(&request).await {
            Ok(token) => {
                self.state.update_with_token_response(Ok(token)).await?;
                info!("Authorization code exchanged");
                Ok(self.state.snapshot().await)
            }
            Err(err) => {
                warn!(error = %err, "Code exchange failed");
                self.state.update_with_token_response(Err(&err)).await?;
                Err(err)
            }
        }
    }

    /// Revoke a token at the server, then mark it revoked locally.
    #[instrument(skip(self))]
    pub async fn revoke_token(&self, token_type: TokenType) -> Result<()> {
        let state = self.state.snapshot().await;
        let token = match token_type {
            TokenType::AccessToken => state.access_token().ok_or(AuthError::NoTokens)?,
            TokenType::RefreshToken => state.refresh_token().ok_or(AuthError::NoRefreshToken)?,
        };
        let request = self
            .factory()?
            .revoke_token_request(token)
            .ok_or_else(|| Error::config("no revocation endpoint configured or discovered"))?;

        let response = self.http.send(&request).await?;
        if !response.is_success() {
            warn!(status = response.status, %token_type, "Revocation rejected");
            return Err(Error::api(
                response.status,
                response.text(),
                response.retry_after(),
            ));
        }

        self.state.set_token_revoked(token_type).await?;
        info!(%token_type, token = %fingerprint(token), "Token revoked");
        Ok(())
    }

    /// Call the userinfo endpoint with a fresh access token.
    ///
    /// Returns the body, pretty-printed when it is JSON.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoBearerToken`] when discovery has no userinfo endpoint
    /// - [`Error::Api`] for non-2xx responses; a 401 is also recorded against the state
    /// - [`Error::EmptyResponse`] for an empty body
    #[instrument(skip(self))]
    pub async fn perform_user_info_request(&self) -> Result<String> {
        let factory = self.factory()?;
        if factory.metadata().userinfo_endpoint.is_none() {
            return Err(AuthError::NoBearerToken.into());
        }

        let token = self.get_access_token().await?;
        let request = factory
            .user_info_request(&token)
            .ok_or(AuthError::NoBearerToken)?;
        let response = self.http.send(&request).await?;

        if response.status == 401 {
            warn!("Userinfo rejected the access token");
            self.state
                .update_with_authorization_error(AuthorizationErrorDetail::unauthorized(
                    response.text(),
                ))
                .await?;
        }
        if !response.is_success() {
            return Err(Error::api(
                response.status,
                response.text(),
                response.retry_after(),
            ));
        }
        if response.body.is_empty() {
            return Err(Error::EmptyResponse);
        }

        match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(json) => Ok(serde_json::to_string_pretty(&json)?),
            Err(_) => Ok(response.text()),
        }
    }

    // ---------------------------------------------------------------------
    // Browser flows
    // ---------------------------------------------------------------------

    async fn present<R: Send>(
        &self,
        request: R,
        url: Url,
        redirect_uri: Url,
        state: String,
    ) -> Result<BrowserSession<R>> {
        let (callback, awaiter) = pending_redirect(state.clone());
        self.agent
            .present(
                AgentRequest {
                    url,
                    redirect_uri,
                    state,
                    callback_port: self.config.get_callback_port(),
                },
                callback,
            )
            .await?;
        Ok(BrowserSession { request, awaiter })
    }

    async fn present_login(&self, request: AuthorizationRequest) -> Result<LoginSession> {
        let url = request.url();
        let redirect_uri = request.redirect_uri.clone();
        let state = request.state().to_string();
        debug!(endpoint = %request.metadata.authorization_endpoint, "Presenting authorization request");
        self.present(request, url, redirect_uri, state).await
    }

    /// Open the login page. The code is exchanged by
    /// [`Self::handle_browser_login_with_auto_code_exchange_response`].
    #[instrument(skip(self))]
    pub async fn start_browser_login_with_auto_code_exchange(&self) -> Result<LoginSession> {
        let request = self.factory()?.browser_login_request();
        self.present_login(request).await
    }

    /// Await the login redirect and exchange its code.
    ///
    /// Returns the new state without committing it; pass it to
    /// [`Self::finish_login_with_auth_state_response`].
    #[instrument(skip_all)]
    pub async fn handle_browser_login_with_auto_code_exchange_response(
        &self,
        session: LoginSession,
    ) -> Result<AuthState> {
        let (request, redirect) = session.redirect().await?;
        let response = AuthorizationResponse::from_redirect(request, &redirect)?;
        let token = self
            .service
            .perform_token_request(&response.token_exchange_request()?)
            .await?;
        info!("Login completed");
        Ok(AuthState::from_authorization(response, Some(token)))
    }

    /// Commit a login result. `None` (login failed or was cancelled) marks
    /// the browser session inactive and clears the state.
    #[instrument(skip_all, fields(some = state.is_some()))]
    pub async fn finish_login_with_auth_state_response(&self, state: Option<AuthState>) -> Result<()> {
        match state {
            Some(state) => {
                self.state.set_auth_state(state).await?;
                self.state
                    .set_browser_session(BrowserSessionStatus::Active)
                    .await?;
            }
            None => {
                self.state.clear().await?;
                self.state
                    .set_browser_session(BrowserSessionStatus::Inactive)
                    .await?;
            }
        }
        Ok(())
    }

    /// Open the login page; the code is kept for a later
    /// [`Self::exchange_authorization_code`].
    #[instrument(skip(self))]
    pub async fn start_browser_login_with_manual_code_exchange(&self) -> Result<LoginSession> {
        let request = self.factory()?.browser_login_request();
        self.present_login(request).await
    }

    /// Await the login redirect without exchanging the code.
    #[instrument(skip_all)]
    pub async fn handle_browser_login_with_manual_code_exchange_response(
        &self,
        session: LoginSession,
    ) -> Result<AuthorizationResponse> {
        let (request, redirect) = session.redirect().await?;
        AuthorizationResponse::from_redirect(request, &redirect)
    }

    /// Commit an authorization response awaiting code exchange.
    #[instrument(skip_all, fields(some = response.is_some()))]
    pub async fn finish_login_with_auth_response(
        &self,
        response: Option<AuthorizationResponse>,
    ) -> Result<()> {
        self.finish_login_with_auth_state_response(
            response.map(|r| AuthState::from_authorization(r, None)),
        )
        .await
    }

    /// Open the configured profile-management page.
    #[instrument(skip(self))]
    pub async fn start_profile_management_redirect(&self) -> Result<LoginSession> {
        let request = self
            .factory()?
            .profile_management_request()
            .ok_or_else(|| Error::config("no profile management URL configured"))?;
        self.present_login(request).await
    }

    /// Await the profile-management redirect; it completes like a login.
    pub async fn handle_profile_management_response(&self, session: LoginSession) -> Result<AuthState> {
        self.handle_browser_login_with_auto_code_exchange_response(session)
            .await
    }

    /// Open the end-session page, passing the current ID token as hint.
    #[instrument(skip(self))]
    pub async fn start_browser_logout_redirect(&self) -> Result<LogoutSession> {
        let mut request = self
            .factory()?
            .browser_logout_request()
            .ok_or_else(|| Error::no_discovery_doc("no end-session endpoint available"))?;
        if let Some(id_token) = self.state.snapshot().await.id_token() {
            request = request.with_id_token_hint(id_token);
        }

        let url = request.url();
        let redirect_uri = request.post_logout_redirect_uri.clone();
        let state = request.state.clone();
        self.present(request, url, redirect_uri, state).await
    }

    /// Await the post-logout redirect.
    #[instrument(skip_all)]
    pub async fn handle_browser_logout_response(
        &self,
        session: LogoutSession,
    ) -> Result<EndSessionResponse> {
        let (request, redirect) = session.redirect().await?;
        EndSessionResponse::from_redirect(request, &redirect)
    }

    /// Mark the browser session inactive after a completed logout redirect.
    ///
    /// Tokens are left untouched; `None` changes nothing.
    #[instrument(skip_all, fields(some = response.is_some()))]
    pub async fn finish_browser_logout(&self, response: Option<EndSessionResponse>) -> Result<()> {
        if response.is_some() {
            self.state
                .set_browser_session(BrowserSessionStatus::Inactive)
                .await?;
            info!("Browser session ended");
        }
        Ok(())
    }

    /// Forget all authorization data. The browser session is not touched.
    #[instrument(skip(self))]
    pub async fn perform_app_session_logout(&self) -> Result<()> {
        self.state.clear().await
    }
}
