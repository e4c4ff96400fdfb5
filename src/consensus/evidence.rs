use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::types::{Address, SlashingEvidence};

/// Pending slashing evidence, at most one entry per validator. Entries
/// stay until included in a block or explicitly cleared; the block schema
/// reserves space for them but inclusion is deferred in this version.
pub struct EvidencePool {
    evidence: Mutex<BTreeMap<Address, SlashingEvidence>>,
}

impl EvidencePool {
    pub fn new() -> Self {
        Self { evidence: Mutex::new(BTreeMap::new()) }
    }

    /// Record evidence. A second report against the same validator is a
    /// no-op; the first observation is what gets slashed.
    pub fn add_evidence(&self, ev: SlashingEvidence) {
        let mut map = self.evidence.lock().unwrap();
        map.entry(ev.validator_id()).or_insert(ev);
    }

    pub fn pending(&self) -> Vec<SlashingEvidence> {
        self.evidence.lock().unwrap().values().cloned().collect()
    }

    pub fn has_evidence(&self, addr: &Address) -> bool {
        self.evidence.lock().unwrap().contains_key(addr)
    }

    pub fn clear(&self, addr: &Address) {
        self.evidence.lock().unwrap().remove(addr);
    }

    pub fn len(&self) -> usize {
        self.evidence.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EvidencePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash, Vote};

    fn vote(block: u8, voter: u8) -> Vote {
        Vote {
            block_hash: Hash([block; 32]),
            height: 10,
            round: 1,
            voter_id: Address([voter; 32]),
            signature: [1u8; 64],
        }
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let pool = EvidencePool::new();
        let ev = SlashingEvidence::double_vote(vote(1, 7), vote(2, 7));
        pool.add_evidence(ev.clone());
        pool.add_evidence(ev);
        assert_eq!(pool.len(), 1);
        assert!(pool.has_evidence(&Address([7; 32])));
    }

    #[test]
    fn clear_removes_entry() {
        let pool = EvidencePool::new();
        pool.add_evidence(SlashingEvidence::double_vote(vote(1, 7), vote(2, 7)));
        pool.clear(&Address([7; 32]));
        assert!(pool.is_empty());
    }
}
