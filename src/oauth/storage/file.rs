//! File-based blob storage with secure permissions.
//!
//! All keys live in one JSON file, each value base64-encoded:
//! - File permissions set to 0600 on Unix (owner read/write only)
//! - Parent directories created with 0700 permissions
//! - Automatic `~` expansion to home directory
//! - Atomic writes via temp file + rename

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::BlobStorage;
use crate::oauth::{Error, Result};

/// Application directory under the platform data dir.
const APP_DATA_DIR: &str = "oauth-session";

/// Default session file name.
const SESSION_FILE: &str = "session.json";

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// On-disk layout: key to base64 value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BlobFile {
    #[serde(flatten)]
    entries: BTreeMap<String, String>,
}

impl BlobFile {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.entries
            .get(key)
            .map(|encoded| {
                STANDARD.decode(encoded).map_err(|e| {
                    Error::storage(format!("Value for key '{key}' is not valid base64: {e}"))
                })
            })
            .transpose()
    }
}

/// File-based blob storage.
///
/// # File Format
///
/// ```json
/// {
///   "authState": "eyJmb3JtYXQiOiJvYXV0aC1zZXNzaW9uL2F1dGgtc3RhdGUiLC4uLn0=",
///   "browserState": "eyJzdGF0dXMiOiJhY3RpdmUifQ=="
/// }
/// ```
///
/// Read-modify-write cycles are serialized within the process. Separate
/// processes sharing one file are not coordinated.
#[derive(Debug, Clone)]
pub struct FileBlobStorage {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileBlobStorage {
    /// Create storage at `path`; a leading `~` expands to the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains `~` but the home directory
    /// cannot be determined.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            path: expand_tilde(path.as_ref())?,
            write_lock: Arc::default(),
        })
    }

    /// Storage at `<data dir>/oauth-session/session.json`.
    pub fn default_path() -> Result<Self> {
        let path = Self::default_file()
            .ok_or_else(|| Error::config("Cannot determine data directory"))?;
        Self::new(path)
    }

    /// The default session file location, if the platform has a data dir.
    pub fn default_file() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join(APP_DATA_DIR).join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<BlobFile>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to read session file '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let file = serde_json::from_str(&content).map_err(|e| {
            Error::storage(format!(
                "Failed to parse session file '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(file))
    }

    #[instrument(skip(self, file))]
    async fn write_file(&self, file: &BlobFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::storage(format!(
                        "Failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(DIR_MODE);
                    tokio::fs::set_permissions(parent, perms).await.map_err(|e| {
                        Error::storage(format!(
                            "Failed to set directory permissions on '{}': {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let content = serde_json::to_string_pretty(file)?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await.map_err(|e| {
            Error::storage(format!(
                "Failed to write temp file '{}': {}",
                temp_path.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(FILE_MODE);
            tokio::fs::set_permissions(&temp_path, perms).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to set file permissions on '{}': {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::storage(format!(
                "Failed to rename '{}' to '{}': {}",
                temp_path.display(),
                self.path.display(),
                e
            )));
        }

        Ok(())
    }

    /// Remove the file, treating an already-missing file as success.
    async fn delete_file(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!(
                "Failed to remove empty session file '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl BlobStorage for FileBlobStorage {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.read_file().await? {
            Some(file) => file.get(key),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), fields(len = value.len()))]
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?.unwrap_or_default();
        file.entries.insert(key.to_string(), STANDARD.encode(value));
        self.write_file(&file).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut file) = self.read_file().await? else {
            return Ok(());
        };

        if file.entries.remove(key).is_none() {
            return Ok(());
        }

        if file.entries.is_empty() {
            debug!(path = %self.path.display(), "Last key removed, deleting session file");
            self.delete_file().await
        } else {
            self.write_file(&file).await
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        Ok(self
            .read_file()
            .await?
            .is_some_and(|f| f.entries.contains_key(key)))
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Expand a `~` prefix to the user's home directory.
pub(crate) fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if let Some(rest) = path_str.strip_prefix('~') {
        let home =
            dirs::home_dir().ok_or_else(|| Error::config("Cannot determine home directory"))?;
        if rest.is_empty() {
            Ok(home)
        } else {
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            Ok(home.join(rest))
        }
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = tempdir().unwrap();
        let storage = FileBlobStorage::new(dir.path().join("session.json")).unwrap();

        assert!(storage.get("authState").await.unwrap().is_none());
        assert!(!storage.exists("authState").await.unwrap());

        storage.set("authState", b"\x00binary\xff").await.unwrap();

        assert_eq!(
            storage.get("authState").await.unwrap(),
            Some(b"\x00binary\xff".to_vec())
        );
        assert!(storage.exists("authState").await.unwrap());
    }

    #[tokio::test]
    async fn test_values_are_base64_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let storage = FileBlobStorage::new(&path).unwrap();

        storage.set("browserState", br#"{"status":"active"}"#).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["browserState"], STANDARD.encode(br#"{"status":"active"}"#));
    }

    #[tokio::test]
    async fn test_remove_keeps_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let storage = FileBlobStorage::new(&path).unwrap();

        storage.set("authState", b"a").await.unwrap();
        storage.set("browserState", b"b").await.unwrap();
        storage.remove("authState").await.unwrap();

        assert!(storage.get("authState").await.unwrap().is_none());
        assert_eq!(storage.get("browserState").await.unwrap(), Some(b"b".to_vec()));

        storage.remove("browserState").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_missing() {
        let dir = tempdir().unwrap();
        let storage = FileBlobStorage::new(dir.path().join("session.json")).unwrap();
        storage.remove("nothing").await.unwrap();
    }

    #[tokio::test]
    async fn test_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("session.json");
        let storage = FileBlobStorage::new(&path).unwrap();

        storage.set("k", b"v").await.unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let storage = FileBlobStorage::new(&path).unwrap();
        storage.set("k", b"v").await.unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_empty_file_reads_as_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "  \n").unwrap();

        let storage = FileBlobStorage::new(&path).unwrap();
        assert!(storage.get("authState").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let storage = FileBlobStorage::new(&path).unwrap();
        assert!(matches!(storage.get("authState").await, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_concurrent_sets_keep_every_key() {
        let dir = tempdir().unwrap();
        let storage = FileBlobStorage::new(dir.path().join("session.json")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.set(&format!("k{i}"), b"v").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..8 {
            assert!(storage.exists(&format!("k{i}")).await.unwrap());
        }
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~")).unwrap(), home);
        assert_eq!(
            expand_tilde(Path::new("~/.local/x.json")).unwrap(),
            home.join(".local/x.json")
        );
        assert_eq!(
            expand_tilde(Path::new("/tmp/x.json")).unwrap(),
            PathBuf::from("/tmp/x.json")
        );
    }
}
