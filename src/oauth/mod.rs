//! # OAuth2 / OpenID Connect session management
//!
//! This module keeps a client application's authorization state: tokens,
//! the authorization response they came from, recorded errors and the
//! browser SSO flag. It persists that state, refreshes tokens (one request
//! however many callers are waiting) and drives browser redirects through a
//! pluggable agent.
//!
//! ## Core Types
//!
//! - [`Authenticator`] - Orchestration façade over every flow
//! - [`AuthState`] - Immutable snapshot of the authorization state
//! - [`AuthConfig`] - Static client configuration
//! - [`Error`] / [`AuthError`] - Error taxonomy
//!
//! ## Storage Backends
//!
//! - [`FileBlobStorage`] - JSON file with secure permissions
//! - [`MemoryBlobStorage`] - In-memory storage for testing
//! - [`CallbackStorage`] - Custom storage via callbacks
//! - [`KeyringBlobStorage`] - System keyring storage (feature-gated)
//!
//! ## Collaborators
//!
//! The [`Authenticator`] reaches the network and the browser only through
//! [`HttpClient`], [`AuthorizationService`] and [`BrowserAgent`]. The
//! defaults are [`ReqwestHttpClient`], [`HttpAuthorizationService`] and
//! [`LoopbackBrowserAgent`].
//!
//! ## Security
//!
//! - Every authorization request carries PKCE (S256), `state` and `nonce`
//! - File storage uses 0600 permissions on Unix
//! - Tokens are logged only as short fingerprints
//!
//! ## Example
//!
//! ```rust,no_run
//! use oauth_session::oauth::{AuthConfig, Authenticator, FileBlobStorage, TokenType};
//!
//! # async fn example() -> oauth_session::oauth::Result<()> {
//! let config = AuthConfig::builder()
//!     .issuer("https://login.example.com")
//!     .client_id("my-client")
//!     .redirect_uri("http://127.0.0.1:8400/callback")
//!     .scope("offline_access")
//!     .try_build()?;
//! let storage = FileBlobStorage::default_path()?;
//! let auth = Authenticator::with_defaults(config, storage)?;
//!
//! auth.load_auth_state().await?;
//! auth.load_discovery_config().await?;
//!
//! if !auth.is_auth_state_active().await {
//!     let session = auth.start_browser_login_with_auto_code_exchange().await?;
//!     let state = auth.handle_browser_login_with_auto_code_exchange_response(session).await;
//!     auth.finish_login_with_auth_state_response(state.ok()).await?;
//! }
//!
//! println!("{}", auth.perform_user_info_request().await?);
//! auth.revoke_token(TokenType::RefreshToken).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod auth;
pub mod authenticator;
pub mod awaiter;
pub mod coalescer;
pub mod error;
pub mod factory;
pub mod http;
pub mod metadata;
pub mod request;
pub mod response;
pub mod service;
pub mod state;
pub mod storage;
pub mod token;

// Re-export core error types
pub use error::{AuthError, Error, ErrorKind, Result};

// Re-export the façade
pub use authenticator::{Authenticator, BrowserSession, LoginSession, LogoutSession};

// Re-export auth types at module root for convenience
pub use auth::{AuthConfig, AuthConfigBuilder, FlowSecrets, Pkce};

pub use awaiter::{pending_redirect, RedirectCallback, ResponseAwaiter};
pub use coalescer::RefreshCoalescer;
pub use factory::RequestFactory;
pub use metadata::ServiceMetadata;
pub use request::{AuthorizationRequest, EndSessionRequest, HttpMethod, HttpRequest, TokenRequest};
pub use response::{AuthorizationResponse, EndSessionResponse};
pub use token::TokenResponse;

pub use state::{
    AuthState, AuthStateEvent, AuthStateManager, AuthStatus, AuthorizationErrorDetail,
    BrowserSessionStatus, JsonStateCodec, StateCodec, TokenType,
};

// Re-export storage types
pub use storage::{BlobStorage, CallbackStorage, FileBlobStorage, MemoryBlobStorage};

#[cfg(feature = "keyring")]
pub use storage::KeyringBlobStorage;

// Re-export collaborators
pub use agent::LoopbackBrowserAgent;
pub use http::{HttpAuthorizationService, ReqwestHttpClient};
pub use service::{AgentRequest, AuthorizationService, BrowserAgent, HttpClient, HttpResponse};

/// Authenticator persisting to a JSON file.
pub type FileAuthenticator = Authenticator<FileBlobStorage>;

/// Authenticator keeping state in memory only.
pub type MemoryAuthenticator = Authenticator<MemoryBlobStorage>;

/// Authenticator persisting to the system keyring.
#[cfg(feature = "keyring")]
pub type KeyringAuthenticator = Authenticator<KeyringBlobStorage>;
