//! Filesystem errors.
//!
//! Variants carry the path (or a short description) they concern, never a
//! remote error value: failures from a file server are reduced to text
//! before they get here.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("filesystem is read-only")]
    ReadOnly,

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A relative path that resolves outside its share root.
    #[error("path escapes share root: {0}")]
    PathEscapesRoot(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No equivalent on this filesystem or handle.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// A remote call ran past its time bound.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// Any remote failure other than not-found.
    #[error("unexpected remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach `path` to an I/O failure when its kind has a variant of its
    /// own.
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(path),
            io::ErrorKind::AlreadyExists => Self::already_exists(path),
            io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::Io(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.io_kind() == io::ErrorKind::NotFound
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::NotFound(_) => io::ErrorKind::NotFound,
            Self::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            Self::PermissionDenied(_) | Self::ReadOnly | Self::PathEscapesRoot(_) => {
                io::ErrorKind::PermissionDenied
            }
            Self::NotADirectory(_) => io::ErrorKind::NotADirectory,
            Self::IsADirectory(_) => io::ErrorKind::IsADirectory,
            Self::InvalidPath(_) => io::ErrorKind::InvalidInput,
            Self::Unsupported(_) => io::ErrorKind::Unsupported,
            Self::TimedOut(_) => io::ErrorKind::TimedOut,
            Self::Io(e) => e.kind(),
            Self::Remote(_) | Self::Other(_) => io::ErrorKind::Other,
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(e) => e,
            other => io::Error::new(other.io_kind(), other.to_string()),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
