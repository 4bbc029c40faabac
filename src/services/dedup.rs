//! Process-local dedup index.
//!
//! Maps `(owner, fingerprint)` to the reference handed out for that
//! content. Strictly a latency shortcut: entries live only as long as the
//! process, are bounded by an LRU so sustained distinct uploads cannot
//! grow memory without limit, and are never treated as proof of existence
//! or non-existence. The durable backend stays the source of truth.

use crate::models::identity::OwnerId;
use lru::LruCache;
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc};

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct DedupKey {
    owner: OwnerId,
    fingerprint: String,
}

/// Cached outcome of a successful upload or confirmed existence check.
#[derive(Clone, Debug)]
pub struct DedupEntry {
    pub url: String,
    pub storage_key: String,
}

/// Bounded in-memory index, cheap to clone and share across handlers.
#[derive(Clone)]
pub struct DedupIndex {
    inner: Arc<Mutex<LruCache<DedupKey, DedupEntry>>>,
}

impl DedupIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Entry for one owner's copy of the content, refreshing its LRU slot.
    pub fn get(&self, owner: &OwnerId, fingerprint: &str) -> Option<DedupEntry> {
        let key = DedupKey {
            owner: owner.clone(),
            fingerprint: fingerprint.to_string(),
        };
        self.inner.lock().get(&key).cloned()
    }

    /// Record the reference for `(owner, fingerprint)`. Re-inserting the
    /// same pair recomputes an identical value, so racing writers are
    /// harmless.
    pub fn insert(&self, owner: &OwnerId, fingerprint: &str, entry: DedupEntry) {
        let key = DedupKey {
            owner: owner.clone(),
            fingerprint: fingerprint.to_string(),
        };
        self.inner.lock().put(key, entry);
    }

    /// All live entries for a fingerprint, across every owner.
    ///
    /// A well-behaved store holds at most one per fingerprint and owner,
    /// but the scan makes no such assumption; callers try each candidate
    /// in turn.
    pub fn matches_fingerprint(&self, fingerprint: &str) -> Vec<DedupEntry> {
        self.inner
            .lock()
            .iter()
            .filter(|(key, _)| key.fingerprint == fingerprint)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(raw: &str) -> OwnerId {
        OwnerId::new(raw).unwrap()
    }

    fn entry(key: &str) -> DedupEntry {
        DedupEntry {
            url: format!("/api/v1/files/view/{key}"),
            storage_key: key.to_string(),
        }
    }

    #[test]
    fn insert_then_get() {
        let index = DedupIndex::new(8);
        index.insert(&owner("a"), "f1", entry("uploads/a/f1.png"));

        let hit = index.get(&owner("a"), "f1").unwrap();
        assert_eq!(hit.storage_key, "uploads/a/f1.png");
        assert!(index.get(&owner("b"), "f1").is_none());
        assert!(index.get(&owner("a"), "f2").is_none());
    }

    #[test]
    fn scan_spans_owners() {
        let index = DedupIndex::new(8);
        index.insert(&owner("a"), "f1", entry("uploads/a/f1.png"));
        index.insert(&owner("b"), "f1", entry("uploads/b/f1.png"));
        index.insert(&owner("b"), "f2", entry("uploads/b/f2.png"));

        let mut keys: Vec<_> = index
            .matches_fingerprint("f1")
            .into_iter()
            .map(|e| e.storage_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["uploads/a/f1.png", "uploads/b/f1.png"]);
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let index = DedupIndex::new(2);
        index.insert(&owner("a"), "f1", entry("k1"));
        index.insert(&owner("a"), "f2", entry("k2"));
        index.insert(&owner("a"), "f3", entry("k3"));

        assert_eq!(index.len(), 2);
        assert!(index.get(&owner("a"), "f1").is_none());
        assert!(index.get(&owner("a"), "f3").is_some());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let index = DedupIndex::new(0);
        index.insert(&owner("a"), "f1", entry("k1"));
        assert_eq!(index.len(), 1);
    }
}
