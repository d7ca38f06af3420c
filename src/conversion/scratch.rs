//! Scratch files with single-owner lifetime.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::audio::Format;

/// Directory holding per-call scratch files.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if missing.
    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Reserve a unique path inside the directory.
    ///
    /// Nothing is created on disk; the returned guard removes whatever ends
    /// up at that path once dropped.
    pub fn allocate(&self, prefix: &str, format: Format) -> ScratchFile {
        let name = format!(
            "{}_{}.{}",
            prefix,
            uuid::Uuid::new_v4().simple(),
            format.extension()
        );
        ScratchFile::adopt(self.root.join(name))
    }

    /// Allocate a scratch file and fill it with `data`.
    pub async fn write(
        &self,
        prefix: &str,
        format: Format,
        data: &[u8],
    ) -> std::io::Result<ScratchFile> {
        let scratch = self.allocate(prefix, format);
        let mut file = fs::File::create(scratch.path()).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(scratch)
    }
}

/// A local file deleted when this guard goes out of scope.
///
/// Removal happens in `Drop`, so it runs on success, on error returns and when
/// the owning future is cancelled.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Take ownership of an existing (or future) file at `path`.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        fs::read(&self.path).await
    }

    pub async fn size(&self) -> std::io::Result<u64> {
        Ok(fs::metadata(&self.path).await?.len())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove scratch file {:?}: {}", self.path, e),
        }
    }
}
