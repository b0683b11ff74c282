//! Institution icon storage.
//!
//! Icons are opaque blobs keyed by a generated file name; the ledger only
//! stores the key. The store is behind a trait so the service can be
//! tested without touching the filesystem.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::LedgerError;

/// Blob store for institution icons.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IconStore: Send + Sync {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<(), LedgerError>;
    async fn load(&self, file_name: &str) -> Result<Vec<u8>, LedgerError>;
}

/// Filesystem-backed icon store rooted at a configured directory.
pub struct FsIconStore {
    dir: PathBuf,
}

impl FsIconStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl IconStore for FsIconStore {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<(), LedgerError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| LedgerError::Io(format!("Failed to create icon directory: {e}")))?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| LedgerError::Io(format!("Failed to write icon {file_name}: {e}")))?;
        debug!(file_name, size = bytes.len(), "Icon saved");
        Ok(())
    }

    async fn load(&self, file_name: &str) -> Result<Vec<u8>, LedgerError> {
        let path = self.dir.join(file_name);
        tokio::fs::read(&path)
            .await
            .map_err(|_| LedgerError::not_found("Icon", file_name))
    }
}

/// Reject any file name whose resolved base name differs from the input
/// (path traversal, separators, empty names).
pub fn validate_icon_file_name(file_name: &str) -> Result<(), LedgerError> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    if base.is_empty() || base != file_name {
        return Err(LedgerError::validation("Invalid icon file name"));
    }
    Ok(())
}

/// Content type by extension; unknown extensions fall back to a generic
/// binary type.
pub fn icon_content_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("arbledger_icons_{}", uuid::Uuid::new_v4()));
        p
    }

    #[tokio::test]
    async fn test_fs_store_save_and_load() {
        let store = FsIconStore::new(temp_dir());
        store.save("logo.png", b"png-bytes").await.unwrap();
        let bytes = store.load("logo.png").await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn test_fs_store_missing_icon_is_not_found() {
        let store = FsIconStore::new(temp_dir());
        let err = store.load("missing.png").await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_validate_icon_file_name_rejects_traversal() {
        assert!(validate_icon_file_name("logo.png").is_ok());
        assert!(validate_icon_file_name("../logo.png").is_err());
        assert!(validate_icon_file_name("a/b.png").is_err());
        assert!(validate_icon_file_name("..").is_err());
        assert!(validate_icon_file_name("").is_err());
    }

    #[test]
    fn test_icon_content_type_mapping() {
        assert_eq!(icon_content_type("a.png"), "image/png");
        assert_eq!(icon_content_type("a.JPG"), "image/jpeg");
        assert_eq!(icon_content_type("a.jpeg"), "image/jpeg");
        assert_eq!(icon_content_type("a.webp"), "image/webp");
        assert_eq!(icon_content_type("a.gif"), "image/gif");
        assert_eq!(icon_content_type("a.svg"), "image/svg+xml");
        assert_eq!(icon_content_type("a.bin"), "application/octet-stream");
        assert_eq!(icon_content_type("noext"), "application/octet-stream");
    }
}
