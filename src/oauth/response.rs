//! Responses delivered through browser redirects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use super::request::{AuthorizationRequest, EndSessionRequest, TokenRequest};
use super::{AuthError, Error, Result};

/// Result of an authorization redirect.
///
/// Keeps the originating request so the code can be exchanged later, even
/// after the state has been persisted and reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub request: AuthorizationRequest,
    pub code: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    #[serde(default)]
    pub additional_parameters: BTreeMap<String, String>,
}

impl AuthorizationResponse {
    /// Parse the redirect the browser agent captured for `request`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::OAuth`] when the redirect carries an `error`
    /// - [`AuthError::StateMismatch`] when `state` is missing or differs
    /// - [`AuthError::AgentFailed`] when the URL is not our redirect URI
    pub fn from_redirect(request: AuthorizationRequest, redirect: &Url) -> Result<Self> {
        ensure_redirect_target(&request.redirect_uri, redirect)?;
        let mut params = RedirectParams::parse(redirect);
        params.check_error()?;
        params.check_state(request.state())?;

        Ok(Self {
            code: params.take("code"),
            state: params.take("state"),
            scope: params.take("scope"),
            additional_parameters: params.into_rest(),
            request,
        })
    }

    /// Token request redeeming this response's code.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingAuthorizationCode`] if the redirect carried no code.
    pub fn token_exchange_request(&self) -> Result<TokenRequest> {
        let code = self
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingAuthorizationCode)?;
        Ok(self.request.token_exchange_request(code))
    }
}

/// Result of an end-session redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub request: EndSessionRequest,
    pub state: Option<String>,
}

impl EndSessionResponse {
    /// Parse the post-logout redirect captured for `request`.
    pub fn from_redirect(request: EndSessionRequest, redirect: &Url) -> Result<Self> {
        ensure_redirect_target(&request.post_logout_redirect_uri, redirect)?;
        let mut params = RedirectParams::parse(redirect);
        params.check_error()?;
        params.check_state(&request.state)?;

        Ok(Self {
            state: params.take("state"),
            request,
        })
    }
}

struct RedirectParams(BTreeMap<String, String>);

impl RedirectParams {
    fn parse(redirect: &Url) -> Self {
        Self(redirect.query_pairs().into_owned().collect())
    }

    fn take(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    fn check_error(&mut self) -> Result<()> {
        match self.take("error") {
            Some(error) => Err(AuthError::oauth(error, self.take("error_description")).into()),
            None => Ok(()),
        }
    }

    fn check_state(&self, expected: &str) -> Result<()> {
        match self.0.get("state") {
            Some(state) if state == expected => Ok(()),
            _ => Err(AuthError::StateMismatch.into()),
        }
    }

    fn into_rest(self) -> BTreeMap<String, String> {
        self.0
    }
}

fn ensure_redirect_target(expected: &Url, actual: &Url) -> Result<()> {
    let same_target = expected.scheme() == actual.scheme()
        && expected.host_str() == actual.host_str()
        && expected.port_or_known_default() == actual.port_or_known_default()
        && expected.path() == actual.path();
    if same_target {
        Ok(())
    } else {
        Err(Error::Auth(AuthError::agent_failed(format!(
            "redirect to unexpected target {}",
            actual.path()
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::auth::FlowSecrets;
    use crate::oauth::metadata::ServiceMetadata;
    use crate::oauth::request::TokenGrant;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            metadata: ServiceMetadata::new(
                Url::parse("https://login.example.com/authorize").unwrap(),
                Url::parse("https://login.example.com/token").unwrap(),
            ),
            client_id: "client-1".to_string(),
            redirect_uri: Url::parse("http://127.0.0.1:8400/callback").unwrap(),
            scopes: vec!["openid".to_string()],
            secrets: FlowSecrets::new(),
            additional_parameters: BTreeMap::new(),
        }
    }

    fn redirect(query: &str) -> Url {
        Url::parse(&format!("http://127.0.0.1:8400/callback?{query}")).unwrap()
    }

    #[test]
    fn test_parse_success() {
        let request = request();
        let url = redirect(&format!(
            "code=abc&state={}&scope=openid&session_state=s1",
            request.state()
        ));

        let response = AuthorizationResponse::from_redirect(request, &url).unwrap();
        assert_eq!(response.code.as_deref(), Some("abc"));
        assert_eq!(response.scope.as_deref(), Some("openid"));
        assert_eq!(
            response.additional_parameters.get("session_state").map(String::as_str),
            Some("s1")
        );

        let token_request = response.token_exchange_request().unwrap();
        assert!(matches!(
            token_request.grant,
            TokenGrant::AuthorizationCode { ref code, .. } if code == "abc"
        ));
    }

    #[test]
    fn test_state_mismatch() {
        let err =
            AuthorizationResponse::from_redirect(request(), &redirect("code=abc&state=forged"))
                .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::StateMismatch)));

        let err = AuthorizationResponse::from_redirect(request(), &redirect("code=abc"))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::StateMismatch)));
    }

    #[test]
    fn test_error_redirect() {
        let err = AuthorizationResponse::from_redirect(
            request(),
            &redirect("error=access_denied&error_description=nope"),
        )
        .unwrap_err();
        match err {
            Error::Auth(auth) => {
                assert_eq!(auth, AuthError::oauth("access_denied", Some("nope".into())))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_redirect_target() {
        let request = request();
        let url = Url::parse(&format!(
            "http://127.0.0.1:8400/elsewhere?code=abc&state={}",
            request.state()
        ))
        .unwrap();
        let err = AuthorizationResponse::from_redirect(request, &url).unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::AgentFailed(_))));
    }

    #[test]
    fn test_missing_code_cannot_be_exchanged() {
        let request = request();
        let url = redirect(&format!("state={}", request.state()));
        let response = AuthorizationResponse::from_redirect(request, &url).unwrap();

        let err = response.token_exchange_request().unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::MissingAuthorizationCode)));
    }

    #[test]
    fn test_end_session_response() {
        let request = EndSessionRequest {
            end_session_endpoint: Url::parse("https://login.example.com/logout").unwrap(),
            id_token_hint: String::new(),
            post_logout_redirect_uri: Url::parse("http://127.0.0.1:8400/callback").unwrap(),
            state: "logout-state".to_string(),
            additional_parameters: BTreeMap::new(),
        };

        let response =
            EndSessionResponse::from_redirect(request.clone(), &redirect("state=logout-state"))
                .unwrap();
        assert_eq!(response.state.as_deref(), Some("logout-state"));

        let err = EndSessionResponse::from_redirect(request, &redirect("state=other")).unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::StateMismatch)));
    }
}
