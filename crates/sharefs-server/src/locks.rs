//! In-memory lock table shared by every request.
//!
//! Locks are exclusive and keyed by the path the client saw (share name
//! included), so they survive the per-request filesystem rebuild.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use sharefs_vfs::path;

use crate::constants::DEFAULT_LOCK_TIMEOUT;

/// Token prefix mandated by the locking protocol.
pub const TOKEN_PREFIX: &str = "opaquelocktoken:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// An unexpired lock held by someone else covers the path.
    #[error("locked: {0}")]
    Locked(String),

    /// The token names no live lock.
    #[error("no such lock: {0}")]
    NoSuchLock(String),
}

/// How much of the tree a lock covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    /// Only the resource itself.
    Zero,
    /// The resource and everything beneath it.
    Infinity,
}

/// A granted lock.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub token: String,
    pub root: String,
    pub owner: String,
    pub depth: LockDepth,
    pub timeout: Duration,
    pub expires_at: Instant,
}

impl LockInfo {
    /// Whether this lock applies to `target`.
    fn covers(&self, target: &str) -> bool {
        self.root == target
            || (self.depth == LockDepth::Infinity && is_descendant(target, &self.root))
    }
}

fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return candidate != "/";
    }
    candidate
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Exclusive lock table.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, LockInfo>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(locks: &mut HashMap<String, LockInfo>, now: Instant) {
        locks.retain(|_, l| l.expires_at > now);
    }

    /// Take a lock on `target`. Without a requested timeout the lock lives
    /// for [`DEFAULT_LOCK_TIMEOUT`].
    pub fn lock(
        &self,
        target: &str,
        owner: &str,
        depth: LockDepth,
        timeout: Option<Duration>,
    ) -> Result<LockInfo, LockError> {
        let timeout = timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT);
        let root = path::normalize(target);
        let now = Instant::now();
        let mut locks = self.locks.lock();
        Self::purge_expired(&mut locks, now);

        let conflict = locks.values().any(|held| {
            held.covers(&root) || (depth == LockDepth::Infinity && is_descendant(&held.root, &root))
        });
        if conflict {
            return Err(LockError::Locked(root));
        }

        let info = LockInfo {
            token: format!("{TOKEN_PREFIX}{}", Uuid::new_v4()),
            root,
            owner: owner.to_string(),
            depth,
            timeout,
            expires_at: now + timeout,
        };
        debug!(token = %info.token, root = %info.root, "lock granted");
        locks.insert(info.token.clone(), info.clone());
        Ok(info)
    }

    /// Extend a lock's lifetime.
    pub fn refresh(&self, token: &str, timeout: Duration) -> Result<LockInfo, LockError> {
        let now = Instant::now();
        let mut locks = self.locks.lock();
        Self::purge_expired(&mut locks, now);
        let held = locks
            .get_mut(token)
            .ok_or_else(|| LockError::NoSuchLock(token.to_string()))?;
        held.timeout = timeout;
        held.expires_at = now + timeout;
        Ok(held.clone())
    }

    /// Release a lock.
    pub fn unlock(&self, token: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        Self::purge_expired(&mut locks, Instant::now());
        match locks.remove(token) {
            Some(held) => {
                debug!(token, root = %held.root, "lock released");
                Ok(())
            }
            None => Err(LockError::NoSuchLock(token.to_string())),
        }
    }

    /// Check that a modification of `target` is allowed given the tokens the
    /// client submitted.
    pub fn confirm(&self, target: &str, tokens: &[&str]) -> Result<(), LockError> {
        let target = path::normalize(target);
        let mut locks = self.locks.lock();
        Self::purge_expired(&mut locks, Instant::now());
        let blocked = locks
            .values()
            .any(|held| held.covers(&target) && !tokens.contains(&held.token.as_str()));
        if blocked {
            Err(LockError::Locked(target))
        } else {
            Ok(())
        }
    }

    /// Number of live locks.
    pub fn len(&self) -> usize {
        let mut locks = self.locks.lock();
        Self::purge_expired(&mut locks, Instant::now());
        locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
