use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::types::Hash;

/// Fixed-capacity ring of recently evicted and committed transaction
/// hashes. Insertion order; the oldest entry is overwritten on overflow.
/// Keeps a processed tx from being re-admitted for at least `capacity`
/// subsequent distinct hashes.
pub struct EvictionCache {
    inner: Mutex<Inner>,
}

struct Inner {
    hashes: BTreeSet<Hash>,
    ring: Vec<Hash>,
    pos: usize,
    capacity: usize,
}

impl EvictionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { 10_000 } else { capacity };
        Self {
            inner: Mutex::new(Inner {
                hashes: BTreeSet::new(),
                ring: vec![Hash::ZERO; capacity],
                pos: 0,
                capacity,
            }),
        }
    }

    pub fn add(&self, hash: Hash) {
        let mut inner = self.inner.lock().unwrap();
        if inner.hashes.contains(&hash) {
            return;
        }

        let old = inner.ring[inner.pos];
        if !old.is_zero() {
            inner.hashes.remove(&old);
        }

        let pos = inner.pos;
        inner.ring[pos] = hash;
        inner.hashes.insert(hash);
        inner.pos = (pos + 1) % inner.capacity;
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().unwrap().hashes.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> Hash {
        Hash([b; 32])
    }

    #[test]
    fn remembers_recent_hashes() {
        let cache = EvictionCache::new(4);
        cache.add(h(1));
        cache.add(h(2));
        assert!(cache.contains(&h(1)));
        assert!(cache.contains(&h(2)));
        assert!(!cache.contains(&h(3)));
    }

    #[test]
    fn overflow_evicts_oldest() {
        let cache = EvictionCache::new(2);
        cache.add(h(1));
        cache.add(h(2));
        cache.add(h(3));
        assert!(!cache.contains(&h(1)));
        assert!(cache.contains(&h(2)));
        assert!(cache.contains(&h(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn duplicate_add_keeps_position() {
        let cache = EvictionCache::new(2);
        cache.add(h(1));
        cache.add(h(1));
        cache.add(h(2));
        assert!(cache.contains(&h(1)));
        assert!(cache.contains(&h(2)));
    }
}
