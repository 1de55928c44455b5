//! In-memory filesystem backend.
//!
//! Used for testing and as a stand-in share tree. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{VfsError, VfsResult};
use crate::handles::DirFile;
use crate::ops::{File, FileSystem};
use crate::path;
use crate::types::{FileAttr, OpenFlags};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } => attr,
            Entry::Directory { attr } => attr,
        }
    }
}

type Entries = Arc<RwLock<HashMap<String, Entry>>>;

fn parent_of(normalized: &str) -> String {
    let segments = path::split(normalized);
    match segments.split_last() {
        Some((_, parents)) => path::join(parents),
        None => "/".to_string(),
    }
}

fn is_within(candidate: &str, root: &str) -> bool {
    candidate == root
        || (root == "/" && candidate.starts_with('/'))
        || candidate
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// In-memory filesystem.
///
/// Cheap to clone; clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    entries: Entries,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            "/".to_string(),
            Entry::Directory {
                attr: FileAttr::directory("", 0o755),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Store a file, creating missing parent directories.
    pub fn insert_file(&self, file_path: &str, data: impl Into<Vec<u8>>) {
        let key = path::normalize(file_path);
        let data = data.into();
        let mut entries = self.entries.write();

        let segments = path::split(&key);
        for depth in 1..segments.len() {
            let dir = path::join(&segments[..depth]);
            entries.entry(dir).or_insert_with(|| Entry::Directory {
                attr: FileAttr::directory(segments[depth - 1], 0o755),
            });
        }

        let attr = FileAttr::file(path::base_name(&key), data.len() as u64, 0o644);
        entries.insert(key, Entry::File { data, attr });
    }

    /// Current contents of a file.
    pub fn contents(&self, file_path: &str) -> Option<Vec<u8>> {
        match self.entries.read().get(&path::normalize(file_path)) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Sorted listing of a directory's direct children.
    fn children(entries: &HashMap<String, Entry>, dir: &str) -> Vec<FileAttr> {
        let mut listing: Vec<FileAttr> = entries
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && parent_of(key) == dir)
            .map(|(_, entry)| entry.attr().clone())
            .collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }

    fn require_dir(entries: &HashMap<String, Entry>, dir: &str) -> VfsResult<()> {
        match entries.get(dir) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(dir)),
            None => Err(VfsError::not_found(dir)),
        }
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn stat(&self, file_path: &str) -> VfsResult<FileAttr> {
        let key = path::normalize(file_path);
        self.entries
            .read()
            .get(&key)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(key))
    }

    async fn open_file(
        &self,
        file_path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<Box<dyn File>> {
        let key = path::normalize(file_path);
        let mut entries = self.entries.write();

        let existing = entries.get(&key).cloned();
        let data = match existing {
            Some(Entry::Directory { attr }) => {
                if flags.is_write() {
                    return Err(VfsError::is_a_directory(key));
                }
                let listing = Self::children(&entries, &key);
                return Ok(Box::new(DirFile::with_entries(attr, listing)));
            }
            Some(Entry::File { .. }) if flags.create && flags.exclusive => {
                return Err(VfsError::already_exists(key));
            }
            Some(Entry::File { data, .. }) => {
                if flags.truncate {
                    Vec::new()
                } else {
                    data
                }
            }
            None if flags.create => {
                Self::require_dir(&entries, &parent_of(&key))?;
                let attr = FileAttr::file(path::base_name(&key), 0, perm);
                entries.insert(
                    key.clone(),
                    Entry::File {
                        data: Vec::new(),
                        attr,
                    },
                );
                Vec::new()
            }
            None => return Err(VfsError::not_found(key)),
        };

        if flags.truncate {
            if let Some(Entry::File { data, attr }) = entries.get_mut(&key) {
                data.clear();
                attr.size = 0;
            }
        }

        let position = if flags.append { data.len() } else { 0 };
        Ok(Box::new(MemoryFile {
            entries: Arc::clone(&self.entries),
            path: key,
            data,
            position,
            flags,
        }))
    }

    async fn mkdir(&self, dir_path: &str, perm: u32) -> VfsResult<()> {
        let key = path::normalize(dir_path);
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(VfsError::already_exists(key));
        }
        Self::require_dir(&entries, &parent_of(&key))?;
        let attr = FileAttr::directory(path::base_name(&key), perm);
        entries.insert(key, Entry::Directory { attr });
        Ok(())
    }

    async fn remove_all(&self, target: &str) -> VfsResult<()> {
        let key = path::normalize(target);
        if key == "/" {
            return Err(VfsError::permission_denied(key));
        }
        self.entries.write().retain(|k, _| !is_within(k, &key));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let from = path::normalize(from);
        let to = path::normalize(to);
        if from == "/" || to == "/" {
            return Err(VfsError::permission_denied(from));
        }
        if is_within(&to, &from) && to != from {
            return Err(VfsError::invalid_path(to));
        }

        let mut entries = self.entries.write();
        if !entries.contains_key(&from) {
            return Err(VfsError::not_found(from));
        }
        Self::require_dir(&entries, &parent_of(&to))?;
        if from == to {
            return Ok(());
        }

        let moved: Vec<(String, Entry)> = entries
            .iter()
            .filter(|(k, _)| is_within(k, &from))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        entries.retain(|k, _| !is_within(k, &from) && !is_within(k, &to));

        for (old_key, mut entry) in moved {
            let new_key = format!("{}{}", to, &old_key[from.len()..]);
            if old_key == from {
                let name = path::base_name(&to).to_string();
                match &mut entry {
                    Entry::File { attr, .. } | Entry::Directory { attr } => attr.name = name,
                }
            }
            entries.insert(new_key, entry);
        }
        Ok(())
    }
}

/// Open handle on a memory file. Writes are visible immediately.
struct MemoryFile {
    entries: Entries,
    path: String,
    data: Vec<u8>,
    position: usize,
    flags: OpenFlags,
}

#[async_trait]
impl File for MemoryFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if !self.flags.read {
            return Err(VfsError::permission_denied(self.path.clone()));
        }
        let start = self.position.min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position = start + n;
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        if !self.flags.is_write() {
            return Err(VfsError::permission_denied(self.path.clone()));
        }
        if self.flags.append {
            self.position = self.data.len();
        }
        let end = self.position + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(data);
        self.position = end;

        let mut entries = self.entries.write();
        match entries.get_mut(&self.path) {
            Some(Entry::File { data: stored, attr }) => {
                stored.clone_from(&self.data);
                attr.size = self.data.len() as u64;
                attr.mtime = SystemTime::now();
                Ok(data.len())
            }
            _ => Err(VfsError::not_found(self.path.clone())),
        }
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => self.data.len() as i64 + delta,
        };
        if target < 0 {
            return Err(VfsError::invalid_path(format!("negative seek on {}", self.path)));
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }

    async fn readdir(&mut self) -> VfsResult<Vec<FileAttr>> {
        Err(VfsError::not_a_directory(self.path.clone()))
    }

    async fn stat(&mut self) -> VfsResult<FileAttr> {
        self.entries
            .read()
            .get(&self.path)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(self.path.clone()))
    }

    async fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}
