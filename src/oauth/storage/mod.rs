//! Key-value blob storage for persisted session state.
//!
//! This module provides the [`BlobStorage`] trait and its backends:
//!
//! - [`FileBlobStorage`] - JSON file with secure permissions
//! - [`MemoryBlobStorage`] - In-memory storage for tests and ephemeral sessions
//! - [`CallbackStorage`] - Custom storage via async closures
//! - [`KeyringBlobStorage`] - System keyring (requires `keyring` feature)
//!
//! Values are opaque bytes. The [`AuthStateManager`] decides what goes in
//! them; backends only store and return them.
//!
//! # Security
//!
//! - File storage uses 0600 permissions on Unix systems
//! - Values are never logged (use `#[instrument(skip(value))]`)
//! - All implementations are thread-safe (`Send + Sync`)
//!
//! [`AuthStateManager`]: crate::oauth::state::AuthStateManager

mod callback;
mod file;
mod memory;

#[cfg(feature = "keyring")]
mod keyring;

use async_trait::async_trait;

pub use callback::CallbackStorage;
pub use file::FileBlobStorage;
pub use memory::MemoryBlobStorage;

#[cfg(feature = "keyring")]
pub use keyring::KeyringBlobStorage;

use super::Result;

/// Trait for blob storage backends.
///
/// Writes are whole-value replacements; a partially written value must
/// never be observable by a later `get`.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if a value exists
    /// - `Ok(None)` if nothing is stored under the key
    /// - `Err(_)` if the backend could not be read
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove the value under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check whether a value is stored under `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Backend name for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<T: BlobStorage + ?Sized> BlobStorage for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<T: BlobStorage + ?Sized> BlobStorage for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
