use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::crypto::hash::sha256;
use crate::storage::{Store, StoreError, WriteSet};
use crate::types::{Block, Hash, QuorumCertificate};

/// In-memory store for tests and single-process tooling. Same atomicity
/// contract as the RocksDB store: everything mutated under one lock.
pub struct MemStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, (Block, QuorumCertificate)>,
    commit_roots: BTreeMap<u64, Hash>,
    state: BTreeMap<Vec<u8>, Vec<u8>>,
    tx_index: BTreeMap<Hash, (u64, u32)>,
    latest_height: u64,
    state_root: Hash,
}

impl MemStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemStore {
    fn get_block(&self, height: u64) -> Result<Option<(Block, QuorumCertificate)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blocks.get(&height).cloned())
    }

    fn get_latest_height(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.latest_height)
    }

    fn save_block(&self, block: &Block, qc: &QuorumCertificate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let height = block.header.height;
        if inner.blocks.contains_key(&height) {
            return Ok(());
        }
        for (i, tx) in block.transactions.iter().enumerate() {
            inner.tx_index.insert(sha256(tx), (height, i as u32));
        }
        inner.blocks.insert(height, (block.clone(), qc.clone()));
        if height > inner.latest_height {
            inner.latest_height = height;
        }
        Ok(())
    }

    fn has_block(&self, height: u64) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blocks.contains_key(&height))
    }

    fn get_commit_state_root(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.commit_roots.get(&height).copied())
    }

    fn save_commit(&self, height: u64, state_root: Hash) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_roots.insert(height, state_root);
        Ok(())
    }

    fn get_state_root(&self) -> Result<Hash, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.state_root)
    }

    fn set_state_root(&self, root: Hash) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.state_root = root;
        Ok(())
    }

    fn apply_write_set(&self, writes: &WriteSet) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for (k, v) in writes {
            inner.state.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.state.get(key).cloned())
    }

    fn get_tx_location(&self, tx_hash: Hash) -> Result<Option<(u64, u32)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tx_index.get(&tx_hash).copied())
    }
}
