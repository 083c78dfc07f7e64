//! Keyed mutual-exclusion scopes.
//!
//! Handlers that touch a directory's child listing hold that directory's
//! scope; handlers that touch an identifier's attribute or content records
//! hold that identifier's scope. Acquisition order is fixed: directory
//! scopes from ancestor to descendant, then identifier scopes.

use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;
use std::sync::Arc;

use crate::types::Ino;

/// Table of lazily created per-key mutexes.
///
/// Entries are dropped again once nobody holds or waits on them, so the
/// table only grows with the number of in-flight handlers.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held scope. Releases and reclaims the entry on drop.
pub struct ScopeGuard {
    key: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard").field("key", &self.key).finish()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        // release first so the map holds the only remaining reference
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl LockTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the scope of a directory's child listing.
    pub fn dir(&self, path: &str) -> ScopeGuard {
        self.acquire(format!("dir:{path}"))
    }

    /// Hold the scope of an identifier's attribute and content records.
    pub fn ino(&self, ino: Ino) -> ScopeGuard {
        self.acquire(format!("ino:{ino}"))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true when no scope is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn acquire(&self, key: String) -> ScopeGuard {
        // clone out of the shard before blocking so the shard lock is not held
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_arc();
        ScopeGuard {
            key,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_entries_reclaimed() {
        let table = LockTable::new();
        {
            let _a = table.dir("/docs");
            let _b = table.ino(Ino::new(5));
            assert_eq!(table.len(), 2);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let table = LockTable::new();
        let _a = table.dir("/a");
        let _b = table.dir("/b");
        let _c = table.ino(Ino::new(2));
    }

    #[test]
    fn test_same_key_serializes() {
        let table = LockTable::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);
        let barrier = Barrier::new(4);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..100 {
                        let _g = table.dir("/shared");
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }
}
