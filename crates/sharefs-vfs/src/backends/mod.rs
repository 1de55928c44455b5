//! Concrete filesystem backends.
//!
//! Backends implement [`FileSystem`](crate::FileSystem) for different
//! storage types.

mod local;
mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
