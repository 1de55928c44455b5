//! Filesystem capability traits.
//!
//! Every backend (the remote adapter, the composite, local and in-memory
//! trees) implements [`FileSystem`]. Paths are `/`-separated strings
//! relative to the filesystem's own root; see [`crate::path`].

use async_trait::async_trait;
use std::io::SeekFrom;

use super::error::{VfsError, VfsResult};
use super::types::{FileAttr, OpenFlags};

/// Size of the scratch buffer used by the convenience readers.
const READ_CHUNK: usize = 32 * 1024;

/// An open file or directory handle.
///
/// Handles are owned by a single request, so every method takes
/// `&mut self`.
#[async_trait]
pub trait File: Send {
    /// Read up to `buf.len()` bytes. Returns 0 at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write `data`, returning the number of bytes accepted.
    async fn write(&mut self, data: &[u8]) -> VfsResult<usize>;

    /// Reposition the handle. Returns the new absolute offset.
    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;

    /// List a directory handle's entries.
    async fn readdir(&mut self) -> VfsResult<Vec<FileAttr>>;

    /// Attributes of the open file.
    async fn stat(&mut self) -> VfsResult<FileAttr>;

    /// Release the handle. Writers report deferred failures here.
    async fn close(&mut self) -> VfsResult<()>;
}

/// Core filesystem operations.
#[async_trait]
pub trait FileSystem: Send + Sync {
    // ========================================================================
    // Required
    // ========================================================================

    /// Get attributes of `path`.
    async fn stat(&self, path: &str) -> VfsResult<FileAttr>;

    /// Open `path` according to `flags`. `perm` applies to created files.
    async fn open_file(&self, path: &str, flags: OpenFlags, perm: u32) -> VfsResult<Box<dyn File>>;

    /// Create a directory.
    async fn mkdir(&self, path: &str, perm: u32) -> VfsResult<()>;

    /// Remove `path` and everything beneath it.
    async fn remove_all(&self, path: &str) -> VfsResult<()>;

    /// Rename `from` to `to`, replacing an existing target.
    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Release background resources. The filesystem is unusable afterwards.
    async fn close(&self) -> VfsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.stat(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let mut file = self.open_file(path, OpenFlags::read(), 0).await?;
        let mut out = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        file.close().await?;
        Ok(out)
    }

    /// Create or truncate `path` and write `data` into it.
    ///
    /// The result of `close` is returned, so deferred upload failures are
    /// not lost.
    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let mut file = self
            .open_file(path, OpenFlags::create_truncate(), 0o644)
            .await?;
        let mut written = 0;
        while written < data.len() {
            match file.write(&data[written..]).await {
                Ok(0) => {
                    let _ = file.close().await;
                    return Err(VfsError::other(format!("short write: {path}")));
                }
                Ok(n) => written += n,
                Err(e) => {
                    let _ = file.close().await;
                    return Err(e);
                }
            }
        }
        file.close().await
    }

    /// List the directory at `path`.
    async fn read_dir(&self, path: &str) -> VfsResult<Vec<FileAttr>> {
        let mut dir = self.open_file(path, OpenFlags::read(), 0).await?;
        let entries = dir.readdir().await;
        dir.close().await?;
        entries
    }
}
