//! Bounded LRU over downloaded blobs.
//!
//! Keys are object keys, values are the encoded bytes as they sit in the
//! bucket. The cache is shared by every operation of one mount; `get`
//! runs under the read lock and refreshes the entry's access stamp
//! atomically, `add`/`remove` take the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::node::ObjectKey;

struct Entry {
    data: Bytes,
    /// Logical access time; larger is more recent.
    touched: AtomicU64,
}

pub struct BlobCache {
    entries: RwLock<HashMap<ObjectKey, Entry>>,
    clock: AtomicU64,
    capacity: usize,
}

impl BlobCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            clock: AtomicU64::new(0),
            capacity,
        }
    }

    /// A miss returns `None`; it is not an error at the call site.
    pub fn get(&self, key: &ObjectKey) -> Option<Bytes> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        entry
            .touched
            .store(self.clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(entry.data.clone())
    }

    pub fn add(&self, key: ObjectKey, data: Bytes) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write();
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = entries.get_mut(&key) {
            entry.data = data;
            entry.touched.store(stamp, Ordering::Relaxed);
            return;
        }
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.touched.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
        entries.insert(
            key,
            Entry {
                data,
                touched: AtomicU64::new(stamp),
            },
        );
    }

    pub fn remove(&self, key: &ObjectKey) {
        self.entries.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key(n: usize) -> ObjectKey {
        ObjectKey::from(format!("blob-key-{n:04}-padded-to-iv-size"))
    }

    #[test]
    fn test_get_add_remove() {
        let cache = BlobCache::new(4);
        assert!(cache.get(&key(0)).is_none());

        cache.add(key(0), Bytes::from_static(b"zero"));
        assert_eq!(cache.get(&key(0)).unwrap(), Bytes::from_static(b"zero"));

        cache.add(key(0), Bytes::from_static(b"zero2"));
        assert_eq!(cache.get(&key(0)).unwrap(), Bytes::from_static(b"zero2"));
        assert_eq!(cache.len(), 1);

        cache.remove(&key(0));
        assert!(cache.get(&key(0)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_drops_least_recently_used() {
        let capacity = 3;
        let cache = BlobCache::new(capacity);
        for n in 0..capacity {
            cache.add(key(n), Bytes::from(vec![n as u8]));
        }
        // Touch the oldest entry so it survives the next eviction.
        assert!(cache.get(&key(0)).is_some());

        cache.add(key(capacity), Bytes::from_static(b"new"));
        assert_eq!(cache.len(), capacity);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(0)).is_some());
        assert!(cache.get(&key(2)).is_some());
        assert!(cache.get(&key(capacity)).is_some());
    }

    #[test]
    fn test_capacity_bound_over_many_inserts() {
        let capacity = 5;
        let total = 17;
        let cache = BlobCache::new(capacity);
        for n in 0..total {
            cache.add(key(n), Bytes::from(vec![n as u8]));
        }
        assert_eq!(cache.len(), capacity);
        // Exactly the last `capacity` inserts remain, none were touched
        // in between.
        for n in 0..total - capacity {
            assert!(cache.get(&key(n)).is_none(), "key {n} should be evicted");
        }
        for n in total - capacity..total {
            assert!(cache.get(&key(n)).is_some(), "key {n} should remain");
        }
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = BlobCache::new(0);
        cache.add(key(0), Bytes::from_static(b"zero"));
        assert!(cache.get(&key(0)).is_none());
        assert!(cache.is_empty());
    }
}
