//! Metadata and open-mode types shared by every filesystem.
//!
//! Attribute records carry their own name so a directory listing is just a
//! list of attributes, the way WebDAV multistatus responses report them.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Kind of entry. Shares hold only regular files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_file(self) -> bool {
        self == FileType::File
    }

    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }
}

/// Attributes of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Last path segment. Empty for a root.
    pub name: String,
    pub size: u64,
    pub kind: FileType,
    /// Mode bits, e.g. `0o644`.
    pub perm: u32,
    pub mtime: SystemTime,
    /// Not every remote reports a change time.
    pub ctime: Option<SystemTime>,
}

impl FileAttr {
    fn stamped(name: String, size: u64, kind: FileType, perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            name,
            size,
            kind,
            perm,
            mtime: now,
            ctime: Some(now),
        }
    }

    /// A regular file modified now.
    pub fn file(name: impl Into<String>, size: u64, perm: u32) -> Self {
        Self::stamped(name.into(), size, FileType::File, perm)
    }

    /// A directory modified now.
    pub fn directory(name: impl Into<String>, perm: u32) -> Self {
        Self::stamped(name.into(), 0, FileType::Directory, perm)
    }

    /// A synthetic directory nobody may modify (`0o555`).
    pub fn read_only_directory(name: impl Into<String>) -> Self {
        Self::directory(name, 0o555)
    }

    /// Rename the record, keeping everything else.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// How a file is opened.
///
/// The constructors cover every mode the protocol layer asks for; a
/// zeroed value opens nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    /// Create the file when missing.
    pub create: bool,
    /// Discard existing contents.
    pub truncate: bool,
    /// With `create`, fail when the file exists.
    pub exclusive: bool,
}

impl OpenFlags {
    pub fn read() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Overwrite an existing file in place.
    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    pub fn append() -> Self {
        Self {
            write: true,
            append: true,
            ..Self::default()
        }
    }

    /// What an upload uses.
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    pub fn create_exclusive() -> Self {
        Self {
            write: true,
            create: true,
            exclusive: true,
            ..Self::default()
        }
    }

    /// Whether opening can change the target.
    pub fn is_write(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_carry_names() {
        let entry = FileAttr::file("a.txt", 3, 0o600);
        assert!(entry.is_file() && !entry.is_dir());
        assert_eq!((entry.name.as_str(), entry.size), ("a.txt", 3));

        let share = FileAttr::read_only_directory("").with_name("docs");
        assert_eq!(share.name, "docs");
        assert_eq!(share.kind, FileType::Directory);
        assert_eq!(share.perm, 0o555);
        assert_eq!(share.size, 0);
    }

    #[test]
    fn test_only_read_is_not_a_write() {
        assert!(!OpenFlags::read().is_write());
        for flags in [
            OpenFlags::write(),
            OpenFlags::append(),
            OpenFlags::create_truncate(),
            OpenFlags::create_exclusive(),
        ] {
            assert!(flags.is_write(), "{flags:?}");
            assert!(!flags.read, "{flags:?}");
        }
        assert!(OpenFlags::create_exclusive().exclusive);
        assert!(!OpenFlags::default().is_write());
    }
}
