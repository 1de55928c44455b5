//! Local filesystem backend.
//!
//! Serves a share's directory on disk, with path security to prevent
//! escaping the share root.

use async_trait::async_trait;
use futures::FutureExt;
use std::io::SeekFrom;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{VfsError, VfsResult};
use crate::handles::DirFile;
use crate::ops::{File, FileSystem};
use crate::path;
use crate::types::{FileAttr, FileType, OpenFlags};

/// Local filesystem rooted at a share directory.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/docs`, then `stat("/a/b.txt")` looks at `/srv/docs/a/b.txt`.
///
/// Attempts to escape via `..` or symlinks pointing outside are blocked.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Create a filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a share-relative path to an absolute path within the root.
    fn resolve(&self, rel: &str) -> VfsResult<PathBuf> {
        let segments = path::split(rel);
        if segments.is_empty() {
            return Ok(self.root.clone());
        }
        if segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
            // Lexical traversal is rejected outright; symlinks are checked below.
            if segments.contains(&"..") {
                return Err(VfsError::path_escapes_root(rel));
            }
            return Err(VfsError::invalid_path(rel));
        }

        let full = segments.iter().fold(self.root.clone(), |acc, s| acc.join(s));

        // For new files, canonicalize the parent and append the file name.
        let canonical = if full.exists() {
            dunce::canonicalize(&full).map_err(|e| VfsError::from_io(rel, e))?
        } else {
            let parent = full.parent().ok_or_else(|| VfsError::invalid_path(rel))?;
            let filename = full.file_name().ok_or_else(|| VfsError::invalid_path(rel))?;
            if parent.exists() {
                dunce::canonicalize(parent)
                    .map_err(|e| VfsError::from_io(rel, e))?
                    .join(filename)
            } else {
                // Parent doesn't exist, will fail on the actual operation
                full
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }

    fn metadata_to_attr(name: &str, meta: &std::fs::Metadata) -> FileAttr {
        FileAttr {
            name: name.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            kind: if meta.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            },
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            ctime: meta.created().ok(),
        }
    }

    async fn list(dir: PathBuf, rel: String) -> VfsResult<Vec<FileAttr>> {
        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| VfsError::from_io(&rel, e))?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Entries may vanish between listing and stat.
            if let Ok(meta) = entry.metadata().await {
                entries.push(Self::metadata_to_attr(&name, &meta));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, rel: &str) -> VfsResult<FileAttr> {
        let full = self.resolve(rel)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| VfsError::from_io(rel, e))?;
        Ok(Self::metadata_to_attr(path::base_name(rel), &meta))
    }

    async fn open_file(&self, rel: &str, flags: OpenFlags, perm: u32) -> VfsResult<Box<dyn File>> {
        let full = self.resolve(rel)?;

        if let Ok(meta) = fs::metadata(&full).await {
            if meta.is_dir() {
                if flags.is_write() {
                    return Err(VfsError::is_a_directory(rel));
                }
                let info = Self::metadata_to_attr(path::base_name(rel), &meta);
                let rel = rel.to_string();
                return Ok(Box::new(DirFile::lazy(
                    info,
                    Box::new(move || Self::list(full, rel).boxed()),
                )));
            }
        }

        let mut options = fs::OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write && !flags.append)
            .append(flags.append)
            .create(flags.create && !flags.exclusive)
            .create_new(flags.create && flags.exclusive)
            .truncate(flags.truncate)
            .mode(perm);
        let file = options
            .open(&full)
            .await
            .map_err(|e| VfsError::from_io(rel, e))?;

        Ok(Box::new(LocalFile {
            name: path::base_name(rel).to_string(),
            file,
        }))
    }

    async fn mkdir(&self, rel: &str, perm: u32) -> VfsResult<()> {
        let full = self.resolve(rel)?;
        fs::DirBuilder::new()
            .mode(perm)
            .create(&full)
            .await
            .map_err(|e| VfsError::from_io(rel, e))
    }

    async fn remove_all(&self, rel: &str) -> VfsResult<()> {
        if path::split(rel).is_empty() {
            return Err(VfsError::permission_denied(rel));
        }
        let full = self.resolve(rel)?;
        let meta = match fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(VfsError::from_io(rel, e)),
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(&full).await
        } else {
            fs::remove_file(&full).await
        };
        result.map_err(|e| VfsError::from_io(rel, e))
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        if path::split(from).is_empty() || path::split(to).is_empty() {
            return Err(VfsError::permission_denied(from));
        }
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| VfsError::from_io(from, e))
    }
}

/// Open handle on a file on disk.
struct LocalFile {
    name: String,
    file: fs::File,
}

#[async_trait]
impl File for LocalFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.file.read(buf).await?)
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        Ok(self.file.write(data).await?)
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        Ok(self.file.seek(pos).await?)
    }

    async fn readdir(&mut self) -> VfsResult<Vec<FileAttr>> {
        Err(VfsError::not_a_directory(self.name.clone()))
    }

    async fn stat(&mut self) -> VfsResult<FileAttr> {
        let meta = self.file.metadata().await?;
        Ok(LocalFileSystem::metadata_to_attr(&self.name, &meta))
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.file.flush().await?;
        Ok(())
    }
}
