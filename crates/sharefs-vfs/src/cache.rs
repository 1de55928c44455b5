//! TTL-bounded metadata cache.
//!
//! Holds file attributes and directory listings keyed by normalized path.
//! Invalidation is coarse: any mutation clears everything, which keeps the
//! cache trivially consistent with renames and recursive removals.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::error::VfsResult;
use super::path;
use super::types::FileAttr;

/// A cached value and the instant it stops being served.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Entries {
    attrs: HashMap<String, CacheEntry<FileAttr>>,
    listings: HashMap<String, CacheEntry<Vec<FileAttr>>>,
}

impl Entries {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.attrs.len() + self.listings.len();
        self.attrs.retain(|_, e| e.fresh(now));
        self.listings.retain(|_, e| e.fresh(now));
        before - (self.attrs.len() + self.listings.len())
    }
}

/// Metadata cache with a fixed TTL.
///
/// Expiry is measured with the tokio clock. When created inside a runtime a
/// background task sweeps expired entries every TTL; lookups never return an
/// expired entry whether or not the sweep has run.
pub struct StatCache {
    ttl: Duration,
    entries: Arc<Mutex<Entries>>,
    sweep: CancellationToken,
}

impl std::fmt::Debug for StatCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

impl StatCache {
    /// Create a cache. Must be given a non-zero TTL to be useful.
    pub fn new(ttl: Duration) -> Self {
        let entries = Arc::new(Mutex::new(Entries::default()));
        let sweep = CancellationToken::new();

        if !ttl.is_zero() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(sweep_loop(Arc::downgrade(&entries), ttl, sweep.clone()));
            }
        }

        Self {
            ttl,
            entries,
            sweep,
        }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached attributes for `path`, if present and unexpired.
    pub fn get(&self, path: &str) -> Option<FileAttr> {
        let key = path::normalize(path);
        let entries = self.entries.lock();
        entries
            .attrs
            .get(&key)
            .filter(|e| e.fresh(Instant::now()))
            .map(|e| e.value.clone())
    }

    /// Return cached attributes, or run `fetch` and cache its success.
    ///
    /// The fetch runs without the cache lock held. Failures are not cached.
    /// Concurrent misses for the same path may each fetch.
    pub async fn get_or_fetch<F, Fut>(&self, path: &str, fetch: F) -> VfsResult<FileAttr>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = VfsResult<FileAttr>>,
    {
        if let Some(hit) = self.get(path) {
            trace!(path, "stat cache hit");
            return Ok(hit);
        }

        let key = path::normalize(path);
        let attr = fetch(key.clone()).await?;
        self.insert_attr(key, attr.clone());
        Ok(attr)
    }

    /// Store attributes for `path`.
    pub fn insert(&self, path: &str, attr: FileAttr) {
        self.insert_attr(path::normalize(path), attr);
    }

    fn insert_attr(&self, key: String, attr: FileAttr) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.lock().attrs.insert(
            key,
            CacheEntry {
                value: attr,
                expires_at,
            },
        );
    }

    /// Store a directory listing, and each child's attributes under
    /// `path/child`.
    pub fn set(&self, path: &str, listing: Vec<FileAttr>) {
        let key = path::normalize(path);
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.lock();
        for child in &listing {
            let child_key = if key == "/" {
                format!("/{}", child.name)
            } else {
                format!("{}/{}", key, child.name)
            };
            entries.attrs.insert(
                child_key,
                CacheEntry {
                    value: child.clone(),
                    expires_at,
                },
            );
        }
        entries.listings.insert(
            key,
            CacheEntry {
                value: listing,
                expires_at,
            },
        );
    }

    /// Cached listing for `path`, if present and unexpired.
    pub fn listing(&self, path: &str) -> Option<Vec<FileAttr>> {
        let key = path::normalize(path);
        let entries = self.entries.lock();
        entries
            .listings
            .get(&key)
            .filter(|e| e.fresh(Instant::now()))
            .map(|e| e.value.clone())
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        let mut entries = self.entries.lock();
        entries.attrs.clear();
        entries.listings.clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        entries.attrs.len() + entries.listings.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background sweep. Idempotent.
    pub fn stop(&self) {
        self.sweep.cancel();
    }
}

impl Drop for StatCache {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(entries: Weak<Mutex<Entries>>, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(entries) = entries.upgrade() else { break };
                let purged = entries.lock().purge_expired(Instant::now());
                if purged > 0 {
                    trace!(purged, "swept expired stat cache entries");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VfsError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_skips_fetch() {
        let cache = StatCache::new(TTL);
        let calls = AtomicUsize::new(0);
        let fetch = |p: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(FileAttr::file(path::base_name(&p).to_string(), 3, 0o644)) }
        };

        let first = cache.get_or_fetch("/a.txt", fetch).await.unwrap();
        assert_eq!(first.name, "a.txt");

        tokio::time::advance(Duration::from_millis(500)).await;
        let again = cache
            .get_or_fetch("a.txt/", |_| async { Err(VfsError::other("unexpected fetch")) })
            .await
            .unwrap();
        assert_eq!(again.size, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_never_returned() {
        let cache = StatCache::new(TTL);
        cache.insert("/a", FileAttr::file("a", 1, 0o644));
        assert!(cache.get("/a").is_some());

        tokio::time::advance(TTL).await;
        assert!(cache.get("/a").is_none());

        let refetched = cache
            .get_or_fetch("/a", |_| async { Ok(FileAttr::file("a", 2, 0o644)) })
            .await
            .unwrap();
        assert_eq!(refetched.size, 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = StatCache::new(TTL);
        let err = cache
            .get_or_fetch("/missing", |p| async move { Err(VfsError::not_found(p)) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_set_stores_children_and_invalidate_clears() {
        let cache = StatCache::new(TTL);
        cache.set(
            "/docs",
            vec![
                FileAttr::file("a.txt", 1, 0o644),
                FileAttr::directory("sub", 0o755),
            ],
        );

        assert_eq!(cache.listing("/docs/").unwrap().len(), 2);
        assert_eq!(cache.get("/docs/a.txt").unwrap().size, 1);
        assert!(cache.get("/docs/sub").unwrap().is_dir());

        cache.invalidate();
        assert!(cache.listing("/docs").is_none());
        assert!(cache.get("/docs/a.txt").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_root_listing_children_keys() {
        let cache = StatCache::new(TTL);
        cache.set("/", vec![FileAttr::file("top", 0, 0o644)]);
        assert!(cache.get("/top").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_purges_expired_entries() {
        let cache = StatCache::new(TTL);
        cache.insert("/a", FileAttr::file("a", 1, 0o644));
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(TTL * 3).await;
        assert_eq!(cache.len(), 0);

        cache.stop();
        cache.stop();
    }

    #[test]
    fn test_new_outside_runtime() {
        let cache = StatCache::new(TTL);
        cache.insert("/a", FileAttr::file("a", 1, 0o644));
        assert!(cache.get("/a").is_some());
        cache.stop();
    }
}
