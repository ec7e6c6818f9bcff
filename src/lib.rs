/// oauth-session - OAuth2 / OpenID Connect authorization-state engine
///
/// Library providing token lifecycle management, coalesced refresh,
/// persisted session state and browser redirect bridging for client
/// applications.

pub mod config;
pub mod core;
pub mod oauth;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
