//! Versioned snapshots of shared runtime settings.
//!
//! Readers take an `Arc` to the current snapshot and keep using it for the
//! rest of their request, even if a writer swaps in a new one meanwhile.

use std::sync::Arc;

use parking_lot::RwLock;

/// An immutable value with the version it was published under.
#[derive(Debug, PartialEq)]
pub struct Snapshot<T> {
    pub version: u64,
    pub value: T,
}

/// Holds the current snapshot. Clones share the same store.
#[derive(Debug)]
pub struct SnapshotStore<T> {
    current: Arc<RwLock<Arc<Snapshot<T>>>>,
}

impl<T> Clone for SnapshotStore<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}

impl<T> SnapshotStore<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(Snapshot { version: 1, value }))),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<Snapshot<T>> {
        Arc::clone(&self.current.read())
    }

    /// Publish a new value. Returns the new version.
    pub fn replace(&self, value: T) -> u64 {
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Arc::new(Snapshot { version, value });
        version
    }

    /// Publish a value derived from the current one. The write lock is held
    /// across `f`, so concurrent updates are never lost.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> u64 {
        let mut current = self.current.write();
        let version = current.version + 1;
        let value = f(&current.value);
        *current = Arc::new(Snapshot { version, value });
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot() {
        let store = SnapshotStore::new(100_u64);
        let before = store.current();
        assert_eq!(store.replace(250), 2);
        assert_eq!(before.value, 100);
        assert_eq!(before.version, 1);
        assert_eq!(store.current().value, 250);
    }

    #[test]
    fn clones_share_state() {
        let store = SnapshotStore::new(vec!["a"]);
        let other = store.clone();
        other.update(|v| {
            let mut next = v.clone();
            next.push("b");
            next
        });
        assert_eq!(store.current().value, vec!["a", "b"]);
        assert_eq!(store.current().version, 2);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = SnapshotStore::new(0_u32);
        std::thread::scope(|s| {
            for _ in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        store.update(|v| v + 1);
                    }
                });
            }
        });
        let snapshot = store.current();
        assert_eq!(snapshot.value, 800);
        assert_eq!(snapshot.version, 801);
    }
}
