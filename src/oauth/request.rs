//! Outbound request descriptors.
//!
//! These are plain values: building one performs no I/O. The
//! [`RequestFactory`](super::factory::RequestFactory) produces them, and the
//! browser agent or HTTP client carries them out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use super::auth::FlowSecrets;
use super::auth::pkce::PKCE_METHOD;
use super::metadata::ServiceMetadata;

/// Response type requested from the authorization endpoint.
pub const RESPONSE_TYPE_CODE: &str = "code";

/// Content type for form-encoded POST bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Parameters the request sets itself; additional parameters cannot override them.
const RESERVED_AUTHORIZATION_PARAMS: &[&str] = &[
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
];

/// An authorization-code request presented in the browser.
///
/// Carries the metadata it was built against so the resulting code can be
/// exchanged at the matching token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub metadata: ServiceMetadata,
    pub client_id: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    pub secrets: FlowSecrets,
    #[serde(default)]
    pub additional_parameters: BTreeMap<String, String>,
}

impl AuthorizationRequest {
    /// The `state` value the redirect must echo.
    pub fn state(&self) -> &str {
        &self.secrets.state
    }

    /// Full authorization URL to open in the browser.
    pub fn url(&self) -> Url {
        let mut url = self.metadata.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", RESPONSE_TYPE_CODE)
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_uri.as_str());
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            query
                .append_pair("state", &self.secrets.state)
                .append_pair("nonce", &self.secrets.nonce)
                .append_pair("code_challenge", &self.secrets.pkce.challenge)
                .append_pair("code_challenge_method", PKCE_METHOD);
            for (name, value) in &self.additional_parameters {
                if !RESERVED_AUTHORIZATION_PARAMS.contains(&name.as_str()) {
                    query.append_pair(name, value);
                }
            }
        }
        url
    }

    /// Token request redeeming `code` for this authorization.
    pub fn token_exchange_request(&self, code: impl Into<String>) -> TokenRequest {
        TokenRequest {
            token_endpoint: self.metadata.token_endpoint.clone(),
            client_id: self.client_id.clone(),
            grant: TokenGrant::AuthorizationCode {
                code: code.into(),
                redirect_uri: self.redirect_uri.clone(),
                code_verifier: self.secrets.pkce.verifier.clone(),
            },
        }
    }
}

/// An RP-initiated logout request presented in the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub end_session_endpoint: Url,
    /// Left empty by the factory; callers may supply the current ID token.
    pub id_token_hint: String,
    pub post_logout_redirect_uri: Url,
    pub state: String,
    #[serde(default)]
    pub additional_parameters: BTreeMap<String, String>,
}

impl EndSessionRequest {
    #[must_use]
    pub fn with_id_token_hint(mut self, id_token: impl Into<String>) -> Self {
        self.id_token_hint = id_token.into();
        self
    }

    /// Full end-session URL to open in the browser.
    pub fn url(&self) -> Url {
        let mut url = self.end_session_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            if !self.id_token_hint.is_empty() {
                query.append_pair("id_token_hint", &self.id_token_hint);
            }
            query
                .append_pair(
                    "post_logout_redirect_uri",
                    self.post_logout_redirect_uri.as_str(),
                )
                .append_pair("state", &self.state);
            for (name, value) in &self.additional_parameters {
                query.append_pair(name, value);
            }
        }
        url
    }
}

/// Grant carried by a [`TokenRequest`].
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    AuthorizationCode {
        code: String,
        redirect_uri: Url,
        code_verifier: String,
    },
    RefreshToken {
        refresh_token: String,
    },
}

impl TokenGrant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("grant_type", &self.grant_type())
            .finish_non_exhaustive()
    }
}

/// A request to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub token_endpoint: Url,
    pub client_id: String,
    pub grant: TokenGrant,
}

impl TokenRequest {
    /// A refresh-token grant.
    pub fn refresh(token_endpoint: Url, client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            token_endpoint,
            client_id: client_id.into(),
            grant: TokenGrant::RefreshToken {
                refresh_token: refresh_token.into(),
            },
        }
    }

    /// Form parameters in wire order.
    pub fn form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("grant_type", self.grant.grant_type().to_string())];
        match &self.grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                params.push(("code", code.clone()));
                params.push(("redirect_uri", redirect_uri.to_string()));
                params.push(("code_verifier", code_verifier.clone()));
            }
            TokenGrant::RefreshToken { refresh_token } => {
                params.push(("refresh_token", refresh_token.clone()));
            }
        }
        params.push(("client_id", self.client_id.clone()));
        params
    }

    /// The form-encoded POST for this request.
    pub fn to_http_request(&self) -> HttpRequest {
        HttpRequest::form_post(self.token_endpoint.clone(), &self.form_params())
    }
}

/// HTTP method of an [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A plain HTTP request handed to an [`HttpClient`](super::service::HttpClient).
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// A bodiless GET.
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST with a form-encoded body built from `params`.
    pub fn form_post<K: AsRef<str>, V: AsRef<str>>(url: Url, params: &[(K, V)]) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: vec![("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string())],
            body: Some(form_encode(params)),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(n, v)| {
                if n.eq_ignore_ascii_case("authorization") {
                    (n.as_str(), "[redacted]")
                } else {
                    (n.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &headers)
            .field("body", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

/// `application/x-www-form-urlencoded` encoding of `params`, in order.
pub fn form_encode<K: AsRef<str>, V: AsRef<str>>(params: &[(K, V)]) -> String {
    params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k.as_ref()),
                urlencoding::encode(v.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn metadata() -> ServiceMetadata {
        ServiceMetadata::new(
            Url::parse("https://login.example.com/authorize").unwrap(),
            Url::parse("https://login.example.com/token").unwrap(),
        )
    }

    fn request() -> AuthorizationRequest {
        let mut additional_parameters = BTreeMap::new();
        additional_parameters.insert("prompt".to_string(), "login".to_string());
        additional_parameters.insert("state".to_string(), "hijack".to_string());
        AuthorizationRequest {
            metadata: metadata(),
            client_id: "client-1".to_string(),
            redirect_uri: Url::parse("http://127.0.0.1:8400/callback").unwrap(),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            secrets: FlowSecrets::new(),
            additional_parameters,
        }
    }

    #[test]
    fn test_authorization_url() {
        let request = request();
        let url = request.url();
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/authorize");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8400/callback");
        assert_eq!(pairs["scope"], "openid profile");
        assert_eq!(pairs["state"], request.secrets.state);
        assert_eq!(pairs["code_challenge"], request.secrets.pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["prompt"], "login");
        assert_eq!(url.query_pairs().filter(|(k, _)| k == "state").count(), 1);
    }

    #[test]
    fn test_token_exchange_request_form() {
        let request = request();
        let token_request = request.token_exchange_request("the-code");
        let http = token_request.to_http_request();

        assert_eq!(http.method, HttpMethod::Post);
        assert_eq!(http.url.as_str(), "https://login.example.com/token");
        assert_eq!(http.header("content-type"), Some(FORM_CONTENT_TYPE));
        let body = http.body.unwrap();
        assert!(body.starts_with("grant_type=authorization_code&code=the-code&"));
        assert!(body.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8400%2Fcallback"));
        assert!(body.contains(&format!("code_verifier={}", request.secrets.pkce.verifier)));
        assert!(body.ends_with("client_id=client-1"));
    }

    #[test]
    fn test_refresh_request_form() {
        let request = TokenRequest::refresh(metadata().token_endpoint, "client-1", "rt/1+2");
        assert_eq!(
            request.to_http_request().body.as_deref(),
            Some("grant_type=refresh_token&refresh_token=rt%2F1%2B2&client_id=client-1")
        );
    }

    #[test]
    fn test_end_session_url() {
        let mut additional_parameters = BTreeMap::new();
        additional_parameters.insert("client_id".to_string(), "client-1".to_string());
        let request = EndSessionRequest {
            end_session_endpoint: Url::parse("https://login.example.com/logout").unwrap(),
            id_token_hint: String::new(),
            post_logout_redirect_uri: Url::parse("http://127.0.0.1:8400/callback").unwrap(),
            state: "xyz".to_string(),
            additional_parameters,
        };

        let url = request.url();
        assert!(!url.as_str().contains("id_token_hint"));
        assert!(url.as_str().contains("client_id=client-1"));

        let url = request.with_id_token_hint("idt").url();
        assert!(url.as_str().contains("id_token_hint=idt"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let http = HttpRequest::get(Url::parse("https://api.example.com/me").unwrap())
            .with_bearer("super-secret");
        let rendered = format!("{http:?}");
        assert!(!rendered.contains("super-secret"));

        let grant = TokenGrant::RefreshToken {
            refresh_token: "rt-secret".into(),
        };
        assert!(!format!("{grant:?}").contains("rt-secret"));
    }

    proptest! {
        #[test]
        fn form_encode_round_trips(key in "[a-z_]{1,12}", value in "\\PC{0,40}") {
            let body = form_encode(&[(key.as_str(), value.as_str())]);
            let decoded: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
                .into_owned()
                .collect();
            prop_assert_eq!(decoded, vec![(key, value)]);
        }
    }
}
