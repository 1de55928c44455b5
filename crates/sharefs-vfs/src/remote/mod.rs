//! Filesystem adapter over a remote file-access client.
//!
//! [`RemoteFileSystem`] turns a [`RemoteClient`] into a [`FileSystem`]:
//!
//! - every call except streamed bodies is bounded by `op_timeout`
//! - metadata goes through an optional [`StatCache`], cleared on any mutation
//! - remote failures are translated so that only "not found" stays
//!   distinguishable; everything else becomes an opaque
//!   [`VfsError::Remote`]

mod client;
mod files;

pub use client::{ByteStream, RemoteClient, RemoteError};
pub use files::{ReadOnlyFile, WriteOnlyFile};

use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::StatCache;
use crate::error::{VfsError, VfsResult};
use crate::handles::DirFile;
use crate::ops::{File, FileSystem};
use crate::path;
use crate::types::{FileAttr, OpenFlags};

/// Default bound on a single remote call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Tuning for a [`RemoteFileSystem`].
#[derive(Debug, Clone, Copy)]
pub struct RemoteFsOptions {
    /// Bound on each non-streaming remote call.
    pub op_timeout: Duration,
    /// Metadata cache lifetime. Zero disables the cache.
    pub stat_cache_ttl: Duration,
}

impl Default for RemoteFsOptions {
    fn default() -> Self {
        Self {
            op_timeout: DEFAULT_OP_TIMEOUT,
            stat_cache_ttl: Duration::ZERO,
        }
    }
}

/// Map a remote failure on `path` to a filesystem error.
///
/// A 404 becomes [`VfsError::NotFound`]. Anything else is reduced to its
/// message so remote internals do not leak through the error chain.
pub fn translate_error(path: &str, err: RemoteError) -> VfsError {
    if err.is_not_found() {
        VfsError::not_found(path)
    } else {
        VfsError::Remote(err.to_string())
    }
}

/// State shared between the adapter and its open handles.
pub(crate) struct Shared {
    pub(crate) client: Arc<dyn RemoteClient>,
    pub(crate) op_timeout: Duration,
    pub(crate) cache: Option<StatCache>,
}

impl Shared {
    /// Run a remote call under the operation timeout.
    pub(crate) async fn timed<T, Fut>(&self, op: &str, path: &str, call: Fut) -> VfsResult<T>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(translate_error(path, e)),
            Err(_) => {
                warn!(op, path, timeout = ?self.op_timeout, "remote call timed out");
                Err(VfsError::TimedOut(format!("{op} {path}")))
            }
        }
    }

    pub(crate) fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate();
        }
    }

    pub(crate) async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_fetch(path, |key| async move {
                        self.timed("stat", &key, self.client.stat(&key)).await
                    })
                    .await
            }
            None => self.timed("stat", path, self.client.stat(path)).await,
        }
    }

    /// Directory listing for a handle: cached listing first, then a timed
    /// fetch. A failed fetch yields an empty listing.
    async fn load_dir(&self, path: &str) -> Vec<FileAttr> {
        if let Some(listing) = self.cache.as_ref().and_then(|c| c.listing(path)) {
            return listing;
        }
        match self.timed("read_dir", path, self.client.read_dir(path)).await {
            Ok(listing) => {
                if let Some(cache) = &self.cache {
                    cache.set(path, listing.clone());
                }
                listing
            }
            Err(e) => {
                warn!(path, error = %e, "failed to list remote directory");
                Vec::new()
            }
        }
    }
}

/// A [`FileSystem`] backed by a [`RemoteClient`].
#[derive(Clone)]
pub struct RemoteFileSystem {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RemoteFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFileSystem")
            .field("op_timeout", &self.shared.op_timeout)
            .field("cache", &self.shared.cache)
            .finish()
    }
}

impl RemoteFileSystem {
    /// Wrap `client`. A stat cache is created when the TTL is non-zero.
    pub fn new(client: Arc<dyn RemoteClient>, options: RemoteFsOptions) -> Self {
        let cache = (!options.stat_cache_ttl.is_zero())
            .then(|| StatCache::new(options.stat_cache_ttl));
        Self {
            shared: Arc::new(Shared {
                client,
                op_timeout: options.op_timeout,
                cache,
            }),
        }
    }

    /// The metadata cache, if enabled.
    pub fn cache(&self) -> Option<&StatCache> {
        self.shared.cache.as_ref()
    }

    fn open_dir(&self, path: &str, info: FileAttr) -> DirFile {
        let shared = Arc::clone(&self.shared);
        let path = path::normalize(path);
        let load = move || async move { Ok::<_, VfsError>(shared.load_dir(&path).await) }.boxed();
        DirFile::lazy(info, Box::new(load))
    }
}

#[async_trait]
impl FileSystem for RemoteFileSystem {
    async fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        self.shared.stat(path).await
    }

    async fn open_file(&self, path: &str, flags: OpenFlags, perm: u32) -> VfsResult<Box<dyn File>> {
        if flags.append {
            return Err(VfsError::unsupported("append"));
        }

        if flags.is_write() {
            self.shared.invalidate();
            match self.shared.stat(path).await {
                Ok(attr) if attr.is_dir() => return Err(VfsError::is_a_directory(path)),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => debug!(path, error = %e, "stat before upload failed, uploading anyway"),
            }
            return Ok(Box::new(WriteOnlyFile::spawn(
                Arc::clone(&self.shared),
                path::normalize(path),
                perm,
            )));
        }

        let info = self.shared.stat(path).await?;
        if info.is_dir() {
            return Ok(Box::new(self.open_dir(path, info)));
        }
        let stream = self
            .shared
            .timed("read_stream", path, self.shared.client.read_stream(path))
            .await?;
        Ok(Box::new(ReadOnlyFile::new(info, stream)))
    }

    async fn mkdir(&self, path: &str, perm: u32) -> VfsResult<()> {
        self.shared.invalidate();
        self.shared
            .timed("mkdir", path, self.shared.client.mkdir(path, perm))
            .await
    }

    async fn remove_all(&self, path: &str) -> VfsResult<()> {
        self.shared.invalidate();
        self.shared
            .timed("remove_all", path, self.shared.client.remove_all(path))
            .await
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.shared.invalidate();
        self.shared
            .timed("rename", from, self.shared.client.rename(from, to, true))
            .await
    }

    async fn close(&self) -> VfsResult<()> {
        if let Some(cache) = &self.shared.cache {
            cache.stop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
