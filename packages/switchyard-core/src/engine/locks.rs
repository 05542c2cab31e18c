//! Per-key mutual exclusion.
//!
//! Work on one contact or identifier serializes; work on different keys
//! never waits. A key's entry lives only while someone holds or waits on it.

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

/// Lazily-created mutex per string key
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held lock on one key. Releases and cleans up on drop.
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free and take it
    pub fn lock(&self, key: &str) -> KeyGuard<'_> {
        // Clone out of the map first: waiting while holding a shard lock
        // would stall every other key in that shard.
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(mutex.lock_arc()),
        }
    }

    /// Take several keys in sorted order. Duplicates are taken once.
    pub fn lock_all<S: AsRef<str>>(&self, keys: &[S]) -> Vec<KeyGuard<'_>> {
        let mut keys: Vec<&str> = keys.iter().map(|k| AsRef::<str>::as_ref(k)).collect();
        keys.sort_unstable();
        keys.dedup();
        keys.into_iter().map(|k| self.lock(k)).collect()
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the guard's Arc no longer counts
        drop(self.guard.take());
        self.owner
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_entries_are_removed_after_release() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a");
            let _b = locks.lock("b");
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn test_lock_all_dedups() {
        let locks = KeyedLocks::new();
        let guards = locks.lock_all(&["b", "a", "b"]);
        assert_eq!(guards.len(), 2);
        assert_eq!(locks.len(), 2);
        drop(guards);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_same_key_serializes() {
        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _guard = locks.lock("contact:1");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
