use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::core::logging::{self, ConsoleStream, LogOptions};
use crate::oauth::auth::config::{DEFAULT_AUTH_STATE_KEY, DEFAULT_BROWSER_STATE_KEY};
use crate::oauth::{AuthConfig, Error, Result};

/// Environment variable prefix; nested keys are separated by `__`,
/// e.g. `OAUTH_SESSION_AUTH__CLIENT_ID`.
pub const ENV_PREFIX: &str = "OAUTH_SESSION_";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// OAuth client settings, converted into an [`AuthConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub issuer: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub prompt: Option<String>,
    pub claims: Option<String>,
    pub acr_values: Option<String>,
    /// Appended verbatim to authorization requests.
    pub extra_parameters: BTreeMap<String, String>,
    pub profile_management_url: Option<String>,
    pub custom_logout_url: Option<String>,
    pub revoke_token_url: Option<String>,
    pub auth_state_storage_key: String,
    pub browser_state_storage_key: String,
    pub callback_port: Option<u16>,
}

/// Which backend persists the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Override the session file location (file backend only).
    pub path: Option<PathBuf>,
    /// Keyring service name (keyring backend only).
    pub keyring_service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directives used when `RUST_LOG` is unset.
    pub filter: String,
    /// Override the log directory.
    pub directory: Option<PathBuf>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            redirect_uri: "http://127.0.0.1:8400/callback".to_string(),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            prompt: None,
            claims: None,
            acr_values: None,
            extra_parameters: BTreeMap::new(),
            profile_management_url: None,
            custom_logout_url: None,
            revoke_token_url: None,
            auth_state_storage_key: DEFAULT_AUTH_STATE_KEY.to_string(),
            browser_state_storage_key: DEFAULT_BROWSER_STATE_KEY.to_string(),
            callback_port: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: logging::DEFAULT_FILTER.to_string(),
            directory: None,
        }
    }
}

impl AuthSettings {
    /// Build the client configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when `issuer` or `client_id` is unset, [`Error::Url`]
    /// for malformed URLs.
    pub fn to_auth_config(&self) -> Result<AuthConfig> {
        if self.issuer.is_empty() {
            return Err(Error::config(format!(
                "auth.issuer is not set (config file or {ENV_PREFIX}AUTH__ISSUER)"
            )));
        }

        let mut builder = AuthConfig::builder()
            .issuer(&self.issuer)
            .client_id(&self.client_id)
            .redirect_uri(&self.redirect_uri)
            .scopes(self.scopes.iter().cloned())
            .auth_state_storage_key(&self.auth_state_storage_key)
            .browser_state_storage_key(&self.browser_state_storage_key);

        if let Some(prompt) = &self.prompt {
            builder = builder.prompt(prompt);
        }
        if let Some(claims) = &self.claims {
            builder = builder.claims(claims);
        }
        if let Some(acr) = &self.acr_values {
            builder = builder.acr_values(acr);
        }
        for (name, value) in &self.extra_parameters {
            builder = builder.extra_parameter(name, value);
        }
        if let Some(url) = &self.profile_management_url {
            builder = builder.profile_management_url(url);
        }
        if let Some(url) = &self.custom_logout_url {
            builder = builder.custom_logout_url(url);
        }
        if let Some(url) = &self.revoke_token_url {
            builder = builder.revoke_token_url(url);
        }
        if let Some(port) = self.callback_port {
            builder = builder.callback_port(port);
        }

        builder.try_build()
    }
}

impl LoggingSettings {
    pub fn log_options(&self, console: ConsoleStream) -> LogOptions {
        LogOptions {
            console,
            default_filter: self.filter.clone(),
            directory: self
                .directory
                .clone()
                .unwrap_or_else(logging::default_log_dir),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `~/.config/oauth-session/config.toml`
    /// and `OAUTH_SESSION_*` environment variables, later sources winning.
    ///
    /// Returns `Default` if extraction fails.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match Self::load_from(&config_path) {
            Ok(config) => {
                log::debug!("Configuration loaded (file: {})", config_path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "Failed to load config from {}: {e}. Using defaults",
                    config_path.display()
                );
                Self::default()
            }
        }
    }

    /// Layered load with an explicit file; a missing file is skipped.
    pub fn load_from(path: &Path) -> std::result::Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("oauth-session").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}
