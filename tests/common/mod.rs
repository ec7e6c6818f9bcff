//! Shared fixtures for the wiremock-backed integration tests.
//!
//! [`MockIdp`] stands up a discovery document whose endpoints all point at
//! one `MockServer`. [`RedirectingAgent`] plays the browser: it answers
//! every presented request with an immediate redirect.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oauth_session::oauth::{
    AgentRequest, AuthConfig, Authenticator, BlobStorage, BrowserAgent, HttpAuthorizationService,
    RedirectCallback, ReqwestHttpClient, Result,
};

pub const CLIENT_ID: &str = "integration-client";
pub const REDIRECT_URI: &str = "http://127.0.0.1:8400/callback";
pub const AUTH_CODE: &str = "auth-code-123";

pub struct MockIdp {
    pub server: MockServer,
}

impl MockIdp {
    /// Server with discovery mounted; token, userinfo and revoke
    /// endpoints are left to each test.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let base = server.uri();

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": base,
                "authorization_endpoint": format!("{base}/authorize"),
                "token_endpoint": format!("{base}/token"),
                "userinfo_endpoint": format!("{base}/userinfo"),
                "revocation_endpoint": format!("{base}/revoke"),
                "end_session_endpoint": format!("{base}/logout"),
            })))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn config(&self) -> AuthConfig {
        AuthConfig::builder()
            .issuer(self.issuer())
            .client_id(CLIENT_ID)
            .redirect_uri(REDIRECT_URI)
            .scope("openid")
            .scope("offline_access")
            .try_build()
            .unwrap()
    }

    /// Answer authorization-code grants with `access`/`refresh`.
    pub async fn mount_code_exchange(&self, access: &str, refresh: &str, expires_in: i64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access,
                "refresh_token": refresh,
                "id_token": "header.payload.signature",
                "token_type": "Bearer",
                "expires_in": expires_in,
            })))
            .mount(&self.server)
            .await;
    }

    /// Authenticator against this server, with `agent` as the browser.
    pub fn authenticator<S: BlobStorage>(
        &self,
        storage: S,
        agent: impl BrowserAgent + 'static,
    ) -> Authenticator<S> {
        let http = ReqwestHttpClient::new().unwrap();
        Authenticator::new(
            self.config(),
            storage,
            Arc::new(HttpAuthorizationService::new(http.clone())),
            Arc::new(http),
            Arc::new(agent),
        )
    }
}

/// Browser stand-in that redirects straight back with `query` and the
/// expected `state`.
#[derive(Debug, Clone)]
pub struct RedirectingAgent {
    query: String,
}

impl RedirectingAgent {
    pub fn with_code() -> Self {
        Self {
            query: format!("code={AUTH_CODE}"),
        }
    }

    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

#[async_trait]
impl BrowserAgent for RedirectingAgent {
    async fn present(&self, request: AgentRequest, callback: RedirectCallback<Url>) -> Result<()> {
        let mut url = request.redirect_uri.clone();
        let query = if self.query.is_empty() {
            format!("state={}", request.state)
        } else {
            format!("{}&state={}", self.query, request.state)
        };
        url.set_query(Some(&query));
        callback.resolve(Ok(url));
        Ok(())
    }
}

/// Run a full auto-exchange login and commit it.
pub async fn login<S: BlobStorage>(auth: &Authenticator<S>) {
    auth.load_discovery_config().await.unwrap();
    let session = auth
        .start_browser_login_with_auto_code_exchange()
        .await
        .unwrap();
    let state = auth
        .handle_browser_login_with_auto_code_exchange_response(session)
        .await
        .unwrap();
    auth.finish_login_with_auth_state_response(Some(state))
        .await
        .unwrap();
}
