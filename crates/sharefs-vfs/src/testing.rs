//! In-memory fakes for exercising the remote adapter without a server.
//!
//! Compiled for this crate's tests and, with the `test-mock` feature, for
//! other crates' tests.

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::backends::MemoryFileSystem;
use crate::error::VfsError;
use crate::ops::FileSystem;
use crate::remote::{ByteStream, RemoteClient, RemoteError};
use crate::types::FileAttr;

/// A [`RemoteClient`] serving a [`MemoryFileSystem`].
///
/// Counts calls per operation name (`"stat"`, `"read_dir"`, `"read_stream"`,
/// `"write_stream"`, `"mkdir"`, `"remove_all"`, `"rename"`), can be told to
/// fail an operation, and can delay every call.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    fs: MemoryFileSystem,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, RemoteError>>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve an existing tree.
    pub fn with_fs(fs: MemoryFileSystem) -> Self {
        Self {
            fs,
            ..Self::default()
        }
    }

    /// The backing tree.
    pub fn fs(&self) -> &MemoryFileSystem {
        &self.fs
    }

    /// Number of calls made to `op`.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Number of calls across all operations.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    /// Make every later call to `op` fail with `err`.
    pub fn fail(&self, op: &'static str, err: RemoteError) {
        self.failures.lock().insert(op, err);
    }

    pub fn clear_failure(&self, op: &str) {
        self.failures.lock().remove(op);
    }

    /// Sleep this long before answering any call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    async fn enter(&self, op: &'static str) {
        *self.calls.lock().entry(op).or_default() += 1;
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn injected(&self, op: &str) -> Result<(), RemoteError> {
        match self.failures.lock().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn begin(&self, op: &'static str) -> Result<(), RemoteError> {
        self.enter(op).await;
        self.injected(op)
    }
}

/// Express a local failure the way a file-access server would report it.
fn to_remote(err: VfsError) -> RemoteError {
    let status = match &err {
        VfsError::NotFound(_) => StatusCode::NOT_FOUND,
        VfsError::AlreadyExists(_) | VfsError::IsADirectory(_) => StatusCode::METHOD_NOT_ALLOWED,
        VfsError::PermissionDenied(_) | VfsError::ReadOnly => StatusCode::FORBIDDEN,
        VfsError::NotADirectory(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    RemoteError::status(status, err.to_string())
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn stat(&self, path: &str) -> Result<FileAttr, RemoteError> {
        self.begin("stat").await?;
        self.fs.stat(path).await.map_err(to_remote)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<FileAttr>, RemoteError> {
        self.begin("read_dir").await?;
        self.fs.read_dir(path).await.map_err(to_remote)
    }

    async fn read_stream(&self, path: &str) -> Result<ByteStream, RemoteError> {
        self.begin("read_stream").await?;
        let data = self.fs.read_all(path).await.map_err(to_remote)?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn write_stream(
        &self,
        path: &str,
        mut body: ByteStream,
        _perm: u32,
    ) -> Result<(), RemoteError> {
        self.enter("write_stream").await;
        // Drain the body first so the writer never blocks on a full pipe.
        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        self.injected("write_stream")?;
        self.fs.write_all(path, &data).await.map_err(to_remote)
    }

    async fn mkdir(&self, path: &str, perm: u32) -> Result<(), RemoteError> {
        self.begin("mkdir").await?;
        self.fs.mkdir(path, perm).await.map_err(to_remote)
    }

    async fn remove_all(&self, path: &str) -> Result<(), RemoteError> {
        self.begin("remove_all").await?;
        self.fs.remove_all(path).await.map_err(to_remote)
    }

    async fn rename(&self, from: &str, to: &str, _overwrite: bool) -> Result<(), RemoteError> {
        self.begin("rename").await?;
        self.fs.rename(from, to).await.map_err(to_remote)
    }
}
