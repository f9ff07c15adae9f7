//! Media upload store.
//!
//! Uploaded attachments are written under a base directory with generated
//! filenames and served back by url. The retention sweeper unlinks files
//! whose messages have been purged.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use parley_shared::{MediaItem, MediaKind};

use crate::error::ApiError;

/// Url prefix under which uploads are exposed.
const URL_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::BadRequest(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Store one uploaded attachment. The kind is inferred from the
    /// content type; the stored name is a fresh uuid with the original
    /// extension (sanitized) appended.
    pub async fn store_upload(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<MediaItem, ApiError> {
        if data.is_empty() {
            return Err(ApiError::BadRequest("Empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let kind = MediaKind::from_content_type(content_type.unwrap_or(""));
        let name = match file_name.and_then(safe_extension) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        let path = self.base_path.join(&name);
        fs::write(&path, data)
            .await
            .map_err(|e| ApiError::UploadStorage(format!("Failed to write upload {name}: {e}")))?;

        debug!(name = %name, size = data.len(), kind = kind.as_str(), "Stored upload");

        Ok(MediaItem {
            url: format!("{URL_PREFIX}{name}"),
            kind,
        })
    }

    /// Read an upload back by its stored name.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, ApiError> {
        let path = self.safe_path(name)?;

        if !path.exists() {
            return Err(ApiError::UploadNotFound(name.to_string()));
        }

        fs::read(&path)
            .await
            .map_err(|e| ApiError::UploadStorage(format!("Failed to read upload {name}: {e}")))
    }

    /// Unlink the file behind a stored media url. Returns `false` when the
    /// url does not point into this store or the file is already gone.
    pub async fn remove_by_url(&self, url: &str) -> Result<bool, ApiError> {
        let Some(name) = url.strip_prefix(URL_PREFIX) else {
            return Ok(false);
        };
        let path = self.safe_path(name)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name = %name, "Removed upload");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ApiError::UploadStorage(format!(
                "Failed to remove upload {name}: {e}"
            ))),
        }
    }

    /// Build a path inside the base directory, rejecting traversal.
    fn safe_path(&self, name: &str) -> Result<PathBuf, ApiError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ApiError::BadRequest("Path traversal detected".to_string()));
        }
        Ok(self.base_path.join(name))
    }
}

/// Extract a sanitized extension (alphanumeric, at most 8 chars) from an
/// original file name.
fn safe_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (MediaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), 1024 * 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_read_back() {
        let (store, _dir) = test_store().await;

        let item = store
            .store_upload(Some("photo.PNG"), Some("image/png"), b"png-bytes")
            .await
            .unwrap();

        assert_eq!(item.kind, MediaKind::Image);
        assert!(item.url.starts_with("/uploads/"));
        assert!(item.url.ends_with(".png"));

        let name = item.url.strip_prefix("/uploads/").unwrap();
        assert_eq!(store.read(name).await.unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_remove_by_url() {
        let (store, _dir) = test_store().await;

        let item = store
            .store_upload(Some("doc.pdf"), Some("application/pdf"), b"pdf")
            .await
            .unwrap();
        assert_eq!(item.kind, MediaKind::File);

        assert!(store.remove_by_url(&item.url).await.unwrap());
        // Second removal: already gone.
        assert!(!store.remove_by_url(&item.url).await.unwrap());
        // Foreign urls are ignored.
        assert!(!store.remove_by_url("https://elsewhere/x.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_size_cap_and_empty_rejected() {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), 4).await.unwrap();

        assert!(store.store_upload(None, None, b"").await.is_err());
        assert!(store.store_upload(None, None, b"too big").await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.read("a/b").await.is_err());
    }

    #[test]
    fn test_safe_extension() {
        assert_eq!(safe_extension("a.png"), Some("png".into()));
        assert_eq!(safe_extension("archive.tar.GZ"), Some("gz".into()));
        assert_eq!(safe_extension("no_extension"), None);
        assert_eq!(safe_extension("weird.p/ng"), None);
    }
}
