//! File handles returned by [`super::RemoteFileSystem`].

use async_trait::async_trait;
use std::io::SeekFrom;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{RemoteError, Shared, translate_error};
use super::client::ByteStream;
use crate::error::{VfsError, VfsResult};
use crate::ops::File;
use crate::path;
use crate::types::FileAttr;

/// Bytes buffered between a writer and its upload before `write` waits.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Write-only handle that streams into a background upload.
///
/// Bytes go through a bounded in-memory pipe to a task running
/// [`super::RemoteClient::write_stream`]. The task's failure, if any, is
/// stored once and reported by every later `write` and `close`.
pub struct WriteOnlyFile {
    shared: Arc<Shared>,
    path: String,
    perm: u32,
    pipe: Option<DuplexStream>,
    upload: Option<JoinHandle<()>>,
    failure: Arc<OnceLock<RemoteError>>,
}

impl WriteOnlyFile {
    pub(crate) fn spawn(shared: Arc<Shared>, path: String, perm: u32) -> Self {
        let (pipe, body) = tokio::io::duplex(PIPE_CAPACITY);
        let failure = Arc::new(OnceLock::new());

        let upload = {
            let shared = Arc::clone(&shared);
            let failure = Arc::clone(&failure);
            let path = path.clone();
            tokio::spawn(async move {
                let body: ByteStream = Box::new(body);
                let result = shared.client.write_stream(&path, body, perm).await;
                shared.invalidate();
                match result {
                    Ok(()) => debug!(path, "upload finished"),
                    Err(e) => {
                        warn!(path, error = %e, "upload failed");
                        let _ = failure.set(e);
                    }
                }
            })
        };

        Self {
            shared,
            path,
            perm,
            pipe: Some(pipe),
            upload: Some(upload),
            failure,
        }
    }

    fn check(&self) -> VfsResult<()> {
        match self.failure.get() {
            Some(e) => Err(translate_error(&self.path, e.clone())),
            None => Ok(()),
        }
    }

    /// End the stream and wait for the upload to settle.
    async fn finish(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            let _ = pipe.shutdown().await;
        }
        if let Some(upload) = self.upload.take() {
            if let Err(e) = upload.await {
                let _ = self
                    .failure
                    .set(RemoteError::transport(format!("upload task failed: {e}")));
            }
        }
    }
}

impl std::fmt::Debug for WriteOnlyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteOnlyFile")
            .field("path", &self.path)
            .field("open", &self.pipe.is_some())
            .field("failed", &self.failure.get().is_some())
            .finish()
    }
}

#[async_trait]
impl File for WriteOnlyFile {
    async fn read(&mut self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::unsupported("write-only"))
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        self.check()?;
        let Some(pipe) = self.pipe.as_mut() else {
            return Err(VfsError::other(format!("write after close: {}", self.path)));
        };
        match pipe.write_all(data).await {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                // The upload dropped its end of the pipe; report why.
                self.finish().await;
                self.check()?;
                Err(VfsError::from_io(&self.path, e))
            }
        }
    }

    async fn seek(&mut self, _pos: SeekFrom) -> VfsResult<u64> {
        Err(VfsError::unsupported("seek"))
    }

    async fn readdir(&mut self) -> VfsResult<Vec<FileAttr>> {
        Err(VfsError::not_a_directory(self.path.clone()))
    }

    async fn stat(&mut self) -> VfsResult<FileAttr> {
        match self.shared.stat(&self.path).await {
            Ok(attr) => Ok(attr),
            Err(_) => Ok(FileAttr::file(path::base_name(&self.path), 0, self.perm)),
        }
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.finish().await;
        self.check()
    }
}

/// Read-only handle over a remote byte stream.
///
/// Only forward sequential reads are possible; `seek` answers position
/// queries and nothing else.
pub struct ReadOnlyFile {
    info: FileAttr,
    stream: Option<ByteStream>,
    position: u64,
}

impl ReadOnlyFile {
    pub(crate) fn new(info: FileAttr, stream: ByteStream) -> Self {
        Self {
            info,
            stream: Some(stream),
            position: 0,
        }
    }
}

impl std::fmt::Debug for ReadOnlyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyFile")
            .field("name", &self.info.name)
            .field("position", &self.position)
            .finish()
    }
}

#[async_trait]
impl File for ReadOnlyFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(VfsError::other(format!("read after close: {}", self.info.name)));
        };
        let n = stream.read(buf).await?;
        self.position += n as u64;
        Ok(n)
    }

    async fn write(&mut self, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::permission_denied(self.info.name.clone()))
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            SeekFrom::Start(n) if n == self.position => Ok(self.position),
            _ => Err(VfsError::unsupported("seek")),
        }
    }

    async fn readdir(&mut self) -> VfsResult<Vec<FileAttr>> {
        Err(VfsError::not_a_directory(self.info.name.clone()))
    }

    async fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(self.info.clone())
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.stream = None;
        Ok(())
    }
}
