//! Temporary on-disk staging for uploaded attachments.
//!
//! An attachment is written to a uniquely named file under the uploads
//! directory, read back when the inline-data fragment is built, and removed
//! when the [`StagedFile`] handle is dropped. Tying removal to `Drop` makes
//! cleanup unconditional: success, caught error, or early return all release
//! the staged bytes. A failed removal is logged and otherwise ignored.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

/// Handle to a staged upload. Owns the underlying file on disk.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    filename: String,
    mime_type: String,
}

impl StagedFile {
    /// Write `bytes` under `dir` with a unique name derived from the original
    /// filename. Only the final path component of `filename` is used.
    pub async fn stage(dir: &Path, filename: &str, mime_type: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let basename = Path::new(filename)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let path = dir.join(format!("{}-{}", Uuid::new_v4(), basename));

        tokio::fs::write(&path, bytes).await?;

        Ok(Self {
            path,
            filename: basename,
            mime_type: mime_type.to_string(),
        })
    }

    /// Original filename (final path component only)
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// MIME type as supplied by the upload
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the staged bytes back from disk.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "Failed to remove staged upload: {}", e);
        }
    }
}
