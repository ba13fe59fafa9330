//! File storage for campaign media

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use wacast_common::config::StorageConfig;
use wacast_common::{Error, Result};

/// File storage trait
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a file and return its relative path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Read a file
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a file
    async fn delete(&self, path: &str) -> Result<()>;
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

    /// Create a new local storage instance rooted at `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local media storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Resolve a relative path below the base directory.
    ///
    /// Rejects `..` segments, absolute paths and anything whose resolved
    /// location escapes the base directory.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.split(['/', '\\']).any(|segment| segment == "..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') || Path::new(path).is_absolute() {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        let full = self.base_path.join(path);

        let canonical_base = self
            .base_path
            .canonicalize()
            .map_err(|e| Error::Storage(format!("Failed to canonicalize base path: {}", e)))?;

        // New files: resolve the parent if it exists already
        let canonical_full = if full.exists() {
            full.canonicalize()
                .map_err(|e| Error::Storage(format!("Failed to canonicalize path: {}", e)))?
        } else {
            match (full.parent(), full.file_name()) {
                (Some(parent), Some(name)) if parent.exists() => parent
                    .canonicalize()
                    .map_err(|e| {
                        Error::Storage(format!("Failed to canonicalize parent path: {}", e))
                    })?
                    .join(name),
                (_, None) => return Err(Error::Storage("Invalid file path".to_string())),
                _ => canonical_base.join(path),
            }
        };

        if !canonical_full.starts_with(&canonical_base) {
            return Err(Error::Storage(
                "Path traversal detected: resolved path is outside storage directory".to_string(),
            ));
        }

        Ok(full)
    }

    async fn ensure_parent_exists(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;
        self.ensure_parent_exists(&full_path).await?;

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("Failed to flush file: {}", e)))?;

        debug!(path = %path, size = data.len(), "Stored file");

        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;

        let mut file = fs::File::open(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("media file {}", path))
            } else {
                Error::Storage(format!("Failed to open file: {}", e))
            }
        })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read file: {}", e)))?;

        debug!(path = %path, size = data.len(), "Read file");

        Ok(data)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;

        fs::remove_file(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete file: {}", e)))?;

        debug!(path = %path, "Deleted file");

        Ok(())
    }
}

/// Campaign media helper laying files out as `campaigns/<id>/<filename>`
#[derive(Clone)]
pub struct MediaStorage {
    storage: Arc<dyn FileStorage>,
}

impl MediaStorage {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self { storage }
    }

    /// Storage path for a campaign attachment
    pub fn media_path(campaign_id: &str, filename: &str) -> String {
        format!(
            "campaigns/{}/{}",
            sanitize_filename(campaign_id),
            sanitize_filename(filename)
        )
    }

    /// Store an attachment, returning its relative path
    pub async fn store_media(&self, campaign_id: &str, filename: &str, data: &[u8]) -> Result<String> {
        let path = Self::media_path(campaign_id, filename);
        self.storage.store(&path, data).await
    }

    pub async fn read_media(&self, path: &str) -> Result<Vec<u8>> {
        self.storage.read(path).await
    }

    pub async fn delete_media(&self, path: &str) -> Result<()> {
        self.storage.delete(path).await
    }
}

/// Reduce a user supplied filename to a single safe path segment
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}
