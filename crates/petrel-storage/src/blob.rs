//! Raw message blob storage

use async_trait::async_trait;
use chrono::Utc;
use petrel_common::config::StorageConfig;
use petrel_common::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Content-addressed store for raw message bytes
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store raw bytes; returns the relative path the blob was stored under
    async fn store(&self, data: &[u8]) -> Result<String>;

    /// Read a blob back by its relative path
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a blob
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check whether a blob exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Filesystem blob store. Blobs are sharded by receive date:
/// `YYYY/MM/DD/<uuid>.eml` under the base path.
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized blob storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Resolve a relative path, rejecting traversal attempts
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }
        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, data: &[u8]) -> Result<String> {
        let now = Utc::now();
        let rel = format!("{}/{}.eml", now.format("%Y/%m/%d"), Uuid::new_v4());
        let full = self.full_path(&rel)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create blob directory: {}", e)))?;
        }
        fs::write(&full, data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write blob: {}", e)))?;

        Ok(rel)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path)?;
        fs::read(&full)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read blob {}: {}", path, e)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        fs::remove_file(&full)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete blob {}: {}", path, e)))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path)?;
        Ok(fs::try_exists(&full).await.unwrap_or(false))
    }
}

/// In-memory blob store for tests and the standalone server mode
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, data: &[u8]) -> Result<String> {
        let path = format!("mem/{}.eml", Uuid::new_v4());
        self.blobs.lock().await.insert(path.clone(), data.to_vec());
        Ok(path)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {}", path)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.blobs.lock().await.remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.contains_key(path))
    }
}
