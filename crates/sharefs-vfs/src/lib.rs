//! # sharefs-vfs
//!
//! Filesystem layer for sharefs: the pieces between a file-access protocol
//! server and the share trees it exposes.
//!
//! - [`FileSystem`] / [`File`] - Capability traits every backend implements
//! - [`CompositeFileSystem`] - Named children presented as one tree
//! - [`RemoteFileSystem`] - Adapter over a [`RemoteClient`] with timeouts,
//!   a [`StatCache`] and error translation
//! - [`LocalFileSystem`] - A share directory on disk (with path security)
//! - [`MemoryFileSystem`] - In-memory tree, for testing
//!
//! ## Design Decisions
//!
//! - **Path-based, `/`-separated strings**: paths look like request URLs,
//!   so routing never touches OS path rules.
//! - **First-segment routing**: the composite's children are shares, and a
//!   share is always exactly one segment deep.
//! - **Coarse cache invalidation**: any mutation clears the whole stat cache.

pub mod backends;
pub mod cache;
pub mod composite;
mod error;
pub mod handles;
mod ops;
pub mod path;
pub mod remote;
mod types;

#[cfg(any(test, feature = "test-mock"))]
pub mod testing;

pub use backends::{LocalFileSystem, MemoryFileSystem};
pub use cache::StatCache;
pub use composite::{Child, CompositeFileSystem};
pub use error::{VfsError, VfsResult};
pub use handles::DirFile;
pub use ops::{File, FileSystem};
pub use remote::{ByteStream, RemoteClient, RemoteError, RemoteFileSystem, RemoteFsOptions};
pub use types::{FileAttr, FileType, OpenFlags};
