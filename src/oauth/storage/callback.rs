//! Callback-based blob storage.
//!
//! [`CallbackStorage`] forwards each operation to a user-supplied async
//! closure, for hosts that already own a secure store.

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::BlobStorage;
use crate::oauth::Result;

/// Load callback: key to optional bytes.
pub type GetFn = Box<dyn Fn(String) -> BoxFuture<'static, Result<Option<Vec<u8>>>> + Send + Sync>;

/// Save callback: key and bytes.
pub type SetFn = Box<dyn Fn(String, Vec<u8>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Remove callback: key.
pub type RemoveFn = Box<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Storage that delegates to closures.
///
/// # Example
///
/// ```rust
/// use futures::FutureExt;
/// use oauth_session::oauth::storage::CallbackStorage;
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use tokio::sync::RwLock;
///
/// let blobs: Arc<RwLock<HashMap<String, Vec<u8>>>> = Arc::default();
/// let (g, s, r) = (blobs.clone(), blobs.clone(), blobs);
///
/// let storage = CallbackStorage::new(
///     Box::new(move |key| {
///         let blobs = g.clone();
///         async move { Ok(blobs.read().await.get(&key).cloned()) }.boxed()
///     }),
///     Box::new(move |key, value| {
///         let blobs = s.clone();
///         async move {
///             blobs.write().await.insert(key, value);
///             Ok(())
///         }
///         .boxed()
///     }),
///     Box::new(move |key| {
///         let blobs = r.clone();
///         async move {
///             blobs.write().await.remove(&key);
///             Ok(())
///         }
///         .boxed()
///     }),
/// );
/// ```
pub struct CallbackStorage {
    get_fn: GetFn,
    set_fn: SetFn,
    remove_fn: RemoveFn,
}

impl CallbackStorage {
    #[must_use]
    pub fn new(get_fn: GetFn, set_fn: SetFn, remove_fn: RemoveFn) -> Self {
        Self {
            get_fn,
            set_fn,
            remove_fn,
        }
    }
}

impl std::fmt::Debug for CallbackStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl BlobStorage for CallbackStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (self.get_fn)(key.to_string()).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (self.set_fn)(key.to_string(), value.to_vec()).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (self.remove_fn)(key.to_string()).await
    }

    fn name(&self) -> &str {
        "callback"
    }
}
