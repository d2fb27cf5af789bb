use async_trait::async_trait;
use haven_chat::{DataStoreError, FileStorage};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// File storage backed by a local directory
///
/// Bucket paths are kept relative to `root`; the returned locator is the
/// bucket path itself so it can be resolved again with [`LocalFileStorage::read`].
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a locator to a path under the root, rejecting escapes
    pub fn resolve(&self, locator: &str) -> Result<PathBuf, DataStoreError> {
        let relative = Path::new(locator);
        if locator.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(DataStoreError::InvalidRow(format!(
                "invalid storage path '{}'",
                locator
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Read back a previously uploaded blob
    pub async fn read(&self, locator: &str) -> Result<Vec<u8>, DataStoreError> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DataStoreError::NotFound(locator.to_string()),
            _ => DataStoreError::Backend(format!("failed to read {}: {}", path.display(), e)),
        })
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn upload(&self, bucket_path: &str, bytes: Vec<u8>) -> Result<String, DataStoreError> {
        let path = self.resolve(bucket_path)?;
        let io_error =
            |e: std::io::Error| DataStoreError::Backend(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, &bytes).await.map_err(io_error)?;

        info!("Stored {} bytes at {}", bytes.len(), path.display());
        debug!("Locator: {}", bucket_path);
        Ok(bucket_path.to_string())
    }
}
