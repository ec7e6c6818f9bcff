//! System keyring blob storage (feature-gated).
//!
//! Uses the platform credential store:
//! - macOS: Keychain
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//! - Windows: Credential Manager
//!
//! Requires the `keyring` feature (enabled by default).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyring::Entry;
use std::sync::OnceLock;
use tracing::{debug, instrument};

use super::BlobStorage;
use crate::oauth::{Error, Result};

/// Default keyring service name.
const SERVICE_NAME: &str = "oauth-session";

static KEYRING_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Keyring-backed blob storage.
///
/// Each key is its own credential: service `<service>`, user `<key>`.
/// Values are base64-encoded since credential stores hold strings.
#[derive(Debug, Clone)]
pub struct KeyringBlobStorage {
    service: String,
}

impl Default for KeyringBlobStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringBlobStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a custom service name, e.g. one per application.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether a working keyring backend exists. Checked once per process.
    pub fn is_available() -> bool {
        *KEYRING_AVAILABLE.get_or_init(|| {
            let available = match Entry::new("oauth-session-probe", "availability-check") {
                Ok(entry) => !matches!(
                    entry.get_password(),
                    Err(keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_))
                ),
                Err(_) => false,
            };
            debug!(available, "Probed system keyring");
            available
        })
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key)
            .map_err(|e| Error::storage(format!("Failed to create keyring entry: {e}")))
    }
}

async fn blocking<T, F>(op: F) -> Result<std::result::Result<T, keyring::Error>>
where
    F: FnOnce() -> std::result::Result<T, keyring::Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::storage(format!("Keyring task failed: {e}")))
}

#[async_trait]
impl BlobStorage for KeyringBlobStorage {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = self.entry(key)?;
        match blocking(move || entry.get_password()).await? {
            Ok(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| Error::storage(format!("Keyring value for '{key}' is not base64: {e}"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    #[instrument(skip(self, value), fields(len = value.len()))]
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let entry = self.entry(key)?;
        let encoded = STANDARD.encode(value);
        blocking(move || entry.set_password(&encoded)).await??;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<()> {
        let entry = self.entry(key)?;
        match blocking(move || entry.delete_password()).await? {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
