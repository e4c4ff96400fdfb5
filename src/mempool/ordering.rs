use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::types::Hash;

/// Priority key for the fee-ordered index. Ordered so that in-order
/// iteration of a `BTreeSet` yields highest fee first, ties broken by
/// ascending hash — the reap order every mempool must agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityKey {
    pub fee: u64,
    pub hash: Hash,
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other.fee.cmp(&self.fee).then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Fee-priority index over the pool. Supports best-first iteration,
/// lowest lookup for eviction, and removal by exact key.
#[derive(Default)]
pub struct PriorityIndex {
    keys: BTreeSet<PriorityKey>,
}

impl PriorityIndex {
    pub fn new() -> Self {
        Self { keys: BTreeSet::new() }
    }

    pub fn insert(&mut self, fee: u64, hash: Hash) {
        self.keys.insert(PriorityKey { fee, hash });
    }

    pub fn remove(&mut self, fee: u64, hash: Hash) -> bool {
        self.keys.remove(&PriorityKey { fee, hash })
    }

    /// Highest fee first, ascending hash on ties.
    pub fn iter(&self) -> impl Iterator<Item = &PriorityKey> {
        self.keys.iter()
    }

    /// The eviction candidate: lowest fee, greatest hash on ties.
    pub fn lowest(&self) -> Option<&PriorityKey> {
        self.keys.iter().next_back()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> Hash {
        Hash([b; 32])
    }

    #[test]
    fn iterates_highest_fee_first() {
        let mut idx = PriorityIndex::new();
        idx.insert(50, h(1));
        idx.insert(300, h(2));
        idx.insert(100, h(3));

        let fees: Vec<u64> = idx.iter().map(|k| k.fee).collect();
        assert_eq!(fees, vec![300, 100, 50]);
    }

    #[test]
    fn equal_fees_order_by_ascending_hash() {
        let mut idx = PriorityIndex::new();
        idx.insert(10, h(9));
        idx.insert(10, h(1));

        let hashes: Vec<Hash> = idx.iter().map(|k| k.hash).collect();
        assert_eq!(hashes, vec![h(1), h(9)]);
    }

    #[test]
    fn lowest_is_eviction_candidate() {
        let mut idx = PriorityIndex::new();
        idx.insert(50, h(1));
        idx.insert(300, h(2));
        assert_eq!(idx.lowest().unwrap().fee, 50);
    }
}
