//! File storage abstraction

use async_trait::async_trait;
use mailcatch_common::config::StorageConfig;
use mailcatch_common::{sanitize_filename, Error, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Writer handed out for streaming artifacts
pub type ArtifactWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// File storage trait. Paths are relative to the mail root.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Create a directory and all missing parents; succeeds if it exists
    async fn ensure_dir(&self, path: &str) -> Result<()>;

    /// Store a file and return its path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Replace a file so readers see either the old or the new content
    async fn replace(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Open a file for streaming writes, truncating any existing content
    async fn writer(&self, path: &str) -> Result<ArtifactWriter>;

    /// Read a file
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Check if a file exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local filesystem storage
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    /// Create a new local storage instance from a path
    pub fn from_path(path: &Path) -> Result<Self> {
        // Ensure base directory exists
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local file storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Mail root on disk
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get full path for a relative path, rejecting anything that could
    /// leave the mail root
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(Error::Storage(
                        "Path traversal detected: '..' is not allowed".to_string(),
                    ))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Storage("Absolute paths are not allowed".to_string()))
                }
            }
        }

        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn ensure_dir(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))
    }

    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;

        debug!(path = %path, size = data.len(), "Stored file");

        Ok(path.to_string())
    }

    async fn replace(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        let tmp_path = full_path.with_extension(format!("tmp-{}", std::process::id()));

        fs::write(&tmp_path, data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;

        if let Err(e) = fs::rename(&tmp_path, &full_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Storage(format!("Failed to replace file: {}", e)));
        }

        debug!(path = %path, size = data.len(), "Replaced file");

        Ok(())
    }

    async fn writer(&self, path: &str) -> Result<ArtifactWriter> {
        let full_path = self.full_path(path)?;

        let file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;

        Ok(Box::new(file))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.to_string())
            } else {
                Error::Storage(format!("Failed to read file: {}", e))
            }
        })?;

        debug!(path = %path, size = data.len(), "Read file");

        Ok(data)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(&full_path).await.unwrap_or(false))
    }
}

/// Storage folder for one recipient address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientFolder {
    /// Sanitized segment under the mail root
    pub name: String,
    /// Folder path as recorded in summaries, e.g. `mail/user@example.com`
    pub path: String,
}

impl RecipientFolder {
    /// Path of an artifact inside this folder, relative to the mail root
    pub fn artifact(&self, file_name: &str) -> String {
        format!("{}/{}", self.name, file_name)
    }
}

/// On-disk layout for recipients: folder naming, directory creation and
/// artifact writes
pub struct RecipientStore<S: FileStorage> {
    storage: std::sync::Arc<S>,
    root_label: String,
}

impl<S: FileStorage> RecipientStore<S> {
    /// `root_label` prefixes folder paths recorded in summaries
    pub fn new(storage: std::sync::Arc<S>, root_label: impl Into<String>) -> Self {
        Self {
            storage,
            root_label: root_label.into(),
        }
    }

    /// Folder for a recipient address
    pub fn folder_for(&self, address: &str) -> RecipientFolder {
        let name = sanitize_filename(address);
        let path = format!("{}/{}", self.root_label.trim_end_matches('/'), name);
        RecipientFolder { name, path }
    }

    /// Create the recipient folder; idempotent
    pub async fn ensure_directory(&self, folder: &RecipientFolder) -> Result<()> {
        self.storage.ensure_dir(&folder.name).await
    }

    /// Write a complete artifact into the folder
    pub async fn write_artifact(
        &self,
        folder: &RecipientFolder,
        file_name: &str,
        body: &[u8],
    ) -> Result<()> {
        self.storage
            .store(&folder.artifact(file_name), body)
            .await
            .map(|_| ())
    }

    /// Open an artifact for streaming writes
    pub async fn open_artifact(
        &self,
        folder: &RecipientFolder,
        file_name: &str,
    ) -> Result<ArtifactWriter> {
        self.storage.writer(&folder.artifact(file_name)).await
    }

    /// Read an artifact back
    pub async fn read_artifact(&self, folder: &RecipientFolder, file_name: &str) -> Result<Vec<u8>> {
        self.storage.read(&folder.artifact(file_name)).await
    }
}

/// Create file storage from configuration
pub fn create_storage(config: &StorageConfig) -> Result<LocalStorage> {
    LocalStorage::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn storage(temp_dir: &TempDir) -> LocalStorage {
        let config = StorageConfig {
            path: temp_dir.path().join("mail"),
        };
        LocalStorage::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);

        storage.ensure_dir("test").await.unwrap();
        storage.ensure_dir("test").await.unwrap();

        let data = b"Hello, World!";
        let path = storage.store("test/message.raw", data).await.unwrap();
        assert_eq!(path, "test/message.raw");

        assert!(storage.exists("test/message.raw").await.unwrap());
        assert!(!storage.exists("nonexistent.raw").await.unwrap());

        let read_data = storage.read("test/message.raw").await.unwrap();
        assert_eq!(read_data, data);

        storage.replace("test/message.raw", b"replaced").await.unwrap();
        assert_eq!(storage.read("test/message.raw").await.unwrap(), b"replaced");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);

        assert!(matches!(
            storage.read("w1-2024.json").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_prevention() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);

        assert!(storage.store("../../../etc/passwd", b"evil").await.is_err());
        assert!(storage.read("../../../etc/passwd").await.is_err());
        assert!(storage.exists("../outside").await.is_err());
        assert!(storage.store("/etc/passwd", b"evil").await.is_err());

        // Dots inside a segment are not traversal
        storage.ensure_dir("....etcpasswd").await.unwrap();
        assert!(storage.store("....etcpasswd/file.raw", b"ok").await.is_ok());
    }

    #[tokio::test]
    async fn test_recipient_store_layout() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(storage(&temp_dir));
        let store = RecipientStore::new(storage.clone(), "mail");

        let folder = store.folder_for("user@example.com");
        assert_eq!(folder.name, "user@example.com");
        assert_eq!(folder.path, "mail/user@example.com");

        store.ensure_directory(&folder).await.unwrap();
        store.ensure_directory(&folder).await.unwrap();
        store.write_artifact(&folder, "a.json", b"{}").await.unwrap();

        let mut writer = store.open_artifact(&folder, "a.raw").await.unwrap();
        writer.write_all(b"raw ").await.unwrap();
        writer.write_all(b"bytes").await.unwrap();
        writer.shutdown().await.unwrap();

        assert!(temp_dir.path().join("mail/user@example.com/a.json").exists());
        assert_eq!(store.read_artifact(&folder, "a.raw").await.unwrap(), b"raw bytes");
    }
}
