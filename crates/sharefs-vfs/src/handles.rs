//! Directory handle shared by every backend.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::io::SeekFrom;

use super::error::{VfsError, VfsResult};
use super::ops::File;
use super::types::FileAttr;

/// Produces a directory's entries on first use.
pub type DirLoader = Box<dyn FnOnce() -> BoxFuture<'static, VfsResult<Vec<FileAttr>>> + Send>;

/// A read-only directory handle.
///
/// The listing is not fetched until the first `readdir`, so opening a
/// directory only to stat it costs nothing.
pub struct DirFile {
    info: FileAttr,
    loader: Option<DirLoader>,
    entries: Option<Vec<FileAttr>>,
}

impl DirFile {
    /// A handle whose entries come from `loader`.
    pub fn lazy(info: FileAttr, loader: DirLoader) -> Self {
        Self {
            info,
            loader: Some(loader),
            entries: None,
        }
    }

    /// A handle over an already known listing.
    pub fn with_entries(info: FileAttr, entries: Vec<FileAttr>) -> Self {
        Self {
            info,
            loader: None,
            entries: Some(entries),
        }
    }
}

impl std::fmt::Debug for DirFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirFile")
            .field("name", &self.info.name)
            .field("loaded", &self.entries.is_some())
            .finish()
    }
}

#[async_trait]
impl File for DirFile {
    async fn read(&mut self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(VfsError::is_a_directory(self.info.name.clone()))
    }

    async fn write(&mut self, _data: &[u8]) -> VfsResult<usize> {
        Err(VfsError::is_a_directory(self.info.name.clone()))
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        match pos {
            SeekFrom::Start(0) | SeekFrom::Current(0) => Ok(0),
            _ => Err(VfsError::unsupported("seek")),
        }
    }

    async fn readdir(&mut self) -> VfsResult<Vec<FileAttr>> {
        if let Some(loader) = self.loader.take() {
            self.entries = Some(loader().await?);
        }
        Ok(self.entries.clone().unwrap_or_default())
    }

    async fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(self.info.clone())
    }

    async fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}
