//! The remote client seam.

use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::types::FileAttr;

/// A response body or request body streamed to or from the remote side.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Failure reported by a [`RemoteClient`].
///
/// `status` is set when the remote side answered with a protocol status;
/// transport failures leave it empty.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub status: Option<StatusCode>,
    pub message: String,
}

impl RemoteError {
    /// A failure carrying a protocol status.
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// 404 for `path`.
    pub fn not_found(path: &str) -> Self {
        Self::status(StatusCode::NOT_FOUND, format!("{path}: not found"))
    }

    /// A failure with no protocol status (connection refused, reset, ...).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Returns true for a 404.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }
}

/// Client for one remote share.
///
/// Implementations speak the file-access protocol to a user server; the
/// adapter in [`super::RemoteFileSystem`] adds timeouts, caching and error
/// translation on top.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Attributes of `path`.
    async fn stat(&self, path: &str) -> Result<FileAttr, RemoteError>;

    /// Entries of the directory at `path`.
    async fn read_dir(&self, path: &str) -> Result<Vec<FileAttr>, RemoteError>;

    /// Open the contents of `path` as a stream.
    async fn read_stream(&self, path: &str) -> Result<ByteStream, RemoteError>;

    /// Replace the contents of `path` with everything `body` yields.
    async fn write_stream(&self, path: &str, body: ByteStream, perm: u32)
    -> Result<(), RemoteError>;

    /// Create a directory.
    async fn mkdir(&self, path: &str, perm: u32) -> Result<(), RemoteError>;

    /// Remove `path` recursively.
    async fn remove_all(&self, path: &str) -> Result<(), RemoteError>;

    /// Move `from` to `to`, replacing the target when `overwrite` is set.
    async fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<(), RemoteError>;
}
