//! reqwest-backed collaborators.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::metadata::ServiceMetadata;
use super::request::{HttpMethod, HttpRequest, TokenRequest};
use super::service::{AuthorizationService, HttpClient, HttpResponse};
use super::token::{fingerprint, OAuthErrorResponse, TokenResponse};
use super::{AuthError, Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`HttpClient`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[instrument(skip(self), fields(url = %request.url))]
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("Invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("Invalid header value for '{name}': {e}")))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(n, v)| Some((n.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await?;

        debug!(status, len = body.len(), "HTTP response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// [`AuthorizationService`] speaking OpenID discovery and RFC 6749 token
/// requests over an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpAuthorizationService<H> {
    http: H,
}

impl<H: HttpClient> HttpAuthorizationService<H> {
    pub fn new(http: H) -> Self {
        Self { http }
    }
}

#[async_trait]
impl<H: HttpClient> AuthorizationService for HttpAuthorizationService<H> {
    #[instrument(skip(self), fields(issuer = %issuer))]
    async fn discover_configuration(&self, issuer: &Url) -> Result<ServiceMetadata> {
        let url = ServiceMetadata::discovery_url(issuer);
        let request = HttpRequest::get(url).with_header(ACCEPT.as_str(), "application/json");
        let response = self.http.send(&request).await?;

        if !response.is_success() {
            warn!(status = response.status, "Discovery request failed");
            return Err(Error::no_discovery_doc(format!(
                "discovery returned HTTP {} for {}",
                response.status, request.url
            )));
        }

        let metadata = ServiceMetadata::from_json(&response.body)?;
        info!(
            authorization_endpoint = %metadata.authorization_endpoint,
            token_endpoint = %metadata.token_endpoint,
            "Discovery document loaded"
        );
        Ok(metadata)
    }

    #[instrument(skip_all, fields(grant = request.grant.grant_type(), endpoint = %request.token_endpoint))]
    async fn perform_token_request(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let http_request = request
            .to_http_request()
            .with_header(ACCEPT.as_str(), "application/json");
        let received_at = Utc::now();
        let response = self.http.send(&http_request).await?;

        if !response.is_success() {
            return Err(token_error(&response));
        }

        let token = TokenResponse::from_json(&response.body, received_at)?;
        info!(
            access_token = %token.access_token.as_deref().map(fingerprint).unwrap_or_default(),
            expires_at = ?token.access_token_expires_at,
            rotated_refresh = token.refresh_token.is_some(),
            "Token request succeeded"
        );
        Ok(token)
    }
}

/// Map a failed token endpoint response onto the error taxonomy.
fn token_error(response: &HttpResponse) -> Error {
    match serde_json::from_slice::<OAuthErrorResponse>(&response.body) {
        Ok(body) if body.error == "invalid_grant" => {
            warn!(description = ?body.error_description, "Grant rejected");
            AuthError::InvalidGrant.into()
        }
        Ok(body) => {
            warn!(error = %body.error, status = response.status, "Token endpoint returned OAuth error");
            AuthError::oauth(body.error, body.error_description).into()
        }
        Err(_) => {
            warn!(status = response.status, "Token endpoint failed");
            Error::api(response.status, response.text(), response.retry_after())
        }
    }
}
