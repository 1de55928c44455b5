//! Composite filesystem routing by first path segment.
//!
//! Presents a set of named child filesystems as one tree. The root is a
//! synthetic, read-only directory with one entry per child; `/docs/a.txt`
//! is forwarded to child `docs` as `/a.txt`.
//!
//! The child set lives behind a single `Arc` snapshot. Readers clone the
//! snapshot and never hold the lock across a child call; writers build a
//! whole new snapshot and swap it in, so a concurrent lister sees either the
//! old set or the new one.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{VfsError, VfsResult};
use super::handles::DirFile;
use super::ops::{File, FileSystem};
use super::path;
use super::types::{FileAttr, OpenFlags};

/// A named child filesystem.
#[derive(Clone)]
pub struct Child {
    /// Name of the child. Must not contain `/`.
    pub name: String,
    /// The child's filesystem.
    pub fs: Arc<dyn FileSystem>,
}

impl Child {
    pub fn new(name: impl Into<String>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            name: name.into(),
            fs,
        }
    }
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Child").field("name", &self.name).finish()
    }
}

/// Immutable child set: lookup map plus name-ordered sequence.
#[derive(Default)]
struct ChildSet {
    by_name: HashMap<String, Arc<dyn FileSystem>>,
    sorted: Vec<Child>,
}

impl ChildSet {
    fn build(children: impl IntoIterator<Item = Child>) -> Self {
        let mut by_name = HashMap::new();
        for child in children {
            // Later entries win on duplicate names.
            by_name.insert(child.name, child.fs);
        }
        let mut sorted: Vec<Child> = by_name
            .iter()
            .map(|(name, fs)| Child::new(name.clone(), Arc::clone(fs)))
            .collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        Self { by_name, sorted }
    }

    fn contains_fs(&self, fs: &Arc<dyn FileSystem>) -> bool {
        self.sorted.iter().any(|c| Arc::ptr_eq(&c.fs, fs))
    }
}

/// Where a path lands.
enum Route {
    /// The synthetic root.
    Root,
    /// A child's own root, addressed by its bare name.
    Child { name: String, fs: Arc<dyn FileSystem> },
    /// A path inside a child.
    Within {
        name: String,
        fs: Arc<dyn FileSystem>,
        rest: String,
    },
}

/// Filesystem composed of named children.
pub struct CompositeFileSystem {
    children: RwLock<Arc<ChildSet>>,
}

impl std::fmt::Debug for CompositeFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFileSystem")
            .field("children", &self.child_names())
            .finish()
    }
}

impl Default for CompositeFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeFileSystem {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self {
            children: RwLock::new(Arc::new(ChildSet::default())),
        }
    }

    /// Create a composite over `children`.
    pub fn with_children(children: Vec<Child>) -> Self {
        Self {
            children: RwLock::new(Arc::new(ChildSet::build(children))),
        }
    }

    fn snapshot(&self) -> Arc<ChildSet> {
        Arc::clone(&self.children.read())
    }

    /// Swap in a new set computed from the current one. Returns the old set.
    fn update(&self, f: impl FnOnce(&ChildSet) -> ChildSet) -> Arc<ChildSet> {
        let mut guard = self.children.write();
        let next = Arc::new(f(&guard));
        std::mem::replace(&mut *guard, next)
    }

    /// Close each old child that is no longer present. Runs without the lock.
    async fn close_dropped(old: &ChildSet, current: &ChildSet) {
        for child in &old.sorted {
            if current.contains_fs(&child.fs) {
                continue;
            }
            debug!(child = %child.name, "closing retired child filesystem");
            if let Err(e) = child.fs.close().await {
                warn!(child = %child.name, error = %e, "failed to close child filesystem");
            }
        }
    }

    /// Add a child, replacing (and closing) any child with the same name.
    pub async fn add_child(&self, child: Child) {
        let old = self.update(|set| {
            let mut next: Vec<Child> = set
                .sorted
                .iter()
                .filter(|c| c.name != child.name)
                .cloned()
                .collect();
            next.push(child);
            ChildSet::build(next)
        });
        let current = self.snapshot();
        Self::close_dropped(&old, &current).await;
    }

    /// Remove and close the named child. Returns false if it was absent.
    pub async fn remove_child(&self, name: &str) -> bool {
        if !self.snapshot().by_name.contains_key(name) {
            return false;
        }
        let old = self.update(|set| {
            ChildSet::build(set.sorted.iter().filter(|c| c.name != name).cloned())
        });
        let current = self.snapshot();
        Self::close_dropped(&old, &current).await;
        true
    }

    /// Replace the whole child set.
    ///
    /// Old children not carried into the new set are closed after the swap;
    /// close failures are logged, not returned.
    pub async fn set_children(&self, children: Vec<Child>) {
        let next = Arc::new(ChildSet::build(children));
        let old = {
            let mut guard = self.children.write();
            std::mem::replace(&mut *guard, Arc::clone(&next))
        };
        Self::close_dropped(&old, &next).await;
    }

    /// Look up a child by exact name.
    pub fn get_child(&self, name: &str) -> Option<Arc<dyn FileSystem>> {
        self.snapshot().by_name.get(name).cloned()
    }

    /// Child names in listing order.
    pub fn child_names(&self) -> Vec<String> {
        self.snapshot()
            .sorted
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    fn route(&self, target: &str) -> VfsResult<Route> {
        let segments = path::split(target);
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Route::Root);
        };
        let fs = self
            .get_child(first)
            .ok_or_else(|| VfsError::not_found(target))?;
        let name = first.to_string();
        if rest.is_empty() {
            Ok(Route::Child { name, fs })
        } else {
            Ok(Route::Within {
                name,
                fs,
                rest: path::join(rest),
            })
        }
    }

    fn root_attr() -> FileAttr {
        FileAttr::read_only_directory("")
    }
}

#[async_trait]
impl FileSystem for CompositeFileSystem {
    async fn stat(&self, target: &str) -> VfsResult<FileAttr> {
        match self.route(target)? {
            Route::Root => Ok(Self::root_attr()),
            Route::Child { name, fs } => Ok(fs.stat("/").await?.with_name(name)),
            Route::Within { fs, rest, .. } => fs.stat(&rest).await,
        }
    }

    async fn open_file(
        &self,
        target: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<Box<dyn File>> {
        match self.route(target)? {
            Route::Root => {
                if flags.append {
                    return Err(VfsError::unsupported("append"));
                }
                if flags.is_write() {
                    return Err(VfsError::is_a_directory("/"));
                }
                let listing = self
                    .snapshot()
                    .sorted
                    .iter()
                    .map(|c| FileAttr::read_only_directory(c.name.clone()))
                    .collect();
                Ok(Box::new(DirFile::with_entries(Self::root_attr(), listing)))
            }
            Route::Child { fs, .. } => fs.open_file("/", flags, perm).await,
            Route::Within { fs, rest, .. } => fs.open_file(&rest, flags, perm).await,
        }
    }

    async fn mkdir(&self, target: &str, perm: u32) -> VfsResult<()> {
        match self.route(target)? {
            // The root and the children's roots always exist.
            Route::Root | Route::Child { .. } => Ok(()),
            Route::Within { fs, rest, .. } => fs.mkdir(&rest, perm).await,
        }
    }

    async fn remove_all(&self, target: &str) -> VfsResult<()> {
        match self.route(target)? {
            Route::Root | Route::Child { .. } => Err(VfsError::permission_denied(target)),
            Route::Within { fs, rest, .. } => fs.remove_all(&rest).await,
        }
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let (from_name, fs, from_rest) = match self.route(from)? {
            Route::Root | Route::Child { .. } => return Err(VfsError::permission_denied(from)),
            Route::Within { name, fs, rest } => (name, fs, rest),
        };
        let (to_name, to_rest) = match self.route(to)? {
            Route::Root | Route::Child { .. } => return Err(VfsError::permission_denied(to)),
            Route::Within { name, rest, .. } => (name, rest),
        };
        if from_name != to_name {
            return Err(VfsError::unsupported("cross-child rename"));
        }
        fs.rename(&from_rest, &to_rest).await
    }

    async fn close(&self) -> VfsResult<()> {
        let set = self.snapshot();
        for child in &set.sorted {
            if let Err(e) = child.fs.close().await {
                warn!(child = %child.name, error = %e, "failed to close child filesystem");
            }
        }
        Ok(())
    }
}
