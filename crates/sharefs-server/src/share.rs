//! Shares and per-caller permissions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Principal or share name matching anything.
pub const WILDCARD: &str = "*";

/// A local directory exposed to remote peers.
///
/// Published shares are immutable; reconfiguration replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Name of the share, the first path segment remote peers see.
    pub name: String,
    /// Directory on this machine.
    pub path: PathBuf,
    /// Local identity whose privileges are used to serve the share.
    #[serde(default, alias = "as", alias = "who")]
    pub run_as: String,
    /// Principals allowed to read.
    #[serde(default)]
    pub readers: Vec<String>,
    /// Principals allowed to read and write.
    #[serde(default)]
    pub writers: Vec<String>,
}

impl Share {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        run_as: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            run_as: run_as.into(),
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }
}

/// Access a caller has to one share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// The share does not exist as far as the caller can tell.
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn can_read(self) -> bool {
        self >= Permission::ReadOnly
    }

    pub fn can_write(self) -> bool {
        self == Permission::ReadWrite
    }
}

/// Per-caller permission lookup, resolved before dispatch.
pub trait Permissions: Send + Sync {
    /// Permission for the named share.
    fn for_share(&self, share: &str) -> Permission;
}

/// Permission map with an optional `"*"` entry covering unnamed shares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePermissions {
    by_share: HashMap<String, Permission>,
}

impl SharePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same permission on every share.
    pub fn all(permission: Permission) -> Self {
        Self::new().grant(WILDCARD, permission)
    }

    /// Set the permission for one share (or `"*"`).
    pub fn grant(mut self, share: impl Into<String>, permission: Permission) -> Self {
        self.by_share.insert(share.into(), permission);
        self
    }

    /// Derive a caller's permissions from each share's principal lists.
    ///
    /// Writers get read-write, readers read-only; `"*"` in either list
    /// matches any principal.
    pub fn for_principal<'a>(principal: &str, shares: impl IntoIterator<Item = &'a Share>) -> Self {
        fn listed(list: &[String], principal: &str) -> bool {
            list.iter().any(|p| p == WILDCARD || p == principal)
        }

        let mut permissions = Self::new();
        for share in shares {
            let permission = if listed(&share.writers, principal) {
                Permission::ReadWrite
            } else if listed(&share.readers, principal) {
                Permission::ReadOnly
            } else {
                continue;
            };
            permissions.by_share.insert(share.name.clone(), permission);
        }
        permissions
    }
}

impl Permissions for SharePermissions {
    fn for_share(&self, share: &str) -> Permission {
        self.by_share
            .get(share)
            .or_else(|| self.by_share.get(WILDCARD))
            .copied()
            .unwrap_or(Permission::None)
    }
}
