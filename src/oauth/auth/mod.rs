//! Client-side authorization building blocks.
//!
//! - [`AuthConfig`]: static client configuration and its builder
//! - [`FlowSecrets`]: per-redirect `state`, `nonce` and PKCE pair
//! - [`Pkce`]: S256 verifier/challenge
//!
//! # Security Considerations
//!
//! - **PKCE**: every authorization request carries a fresh S256 challenge.
//! - **State Validation**: the redirect's `state` is checked before any code
//!   is exchanged.
//! - **Logging**: verifiers and tokens never reach the logs.

pub mod config;
pub mod pkce;
pub mod state;

pub use config::{AuthConfig, AuthConfigBuilder};
pub use pkce::Pkce;
pub use state::{generate_state, FlowSecrets};
