//! Block and state persistence behind an abstract store interface.
//!
//! A block+QC write is atomic with the latest-height advance, and state
//! writes are transactional with the state-root cursor, so a crash never
//! leaves a commit half-recorded.

pub mod memory;
pub mod rocks;
pub mod wal;

use std::collections::BTreeMap;

use crate::types::{Block, Hash, QuorumCertificate};

pub use memory::MemStore;
pub use rocks::RocksStore;
pub use wal::{Wal, WalEntry, WalEntryKind, WalError};

/// Buffered state writes applied atomically with a state-root advance.
pub type WriteSet = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("corrupt record: {0}")]
    Corrupt(&'static str),
    #[error("codec error: {0}")]
    Codec(#[from] crate::types::codec::CodecError),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Persistence surface consumed by consensus, sync, and the mempool.
///
/// `save_block` is idempotent per height: once a block is persisted at a
/// height, later writes for that height are no-ops, so `get_block` is
/// stable after its first success.
pub trait Store: Send + Sync {
    fn get_block(&self, height: u64) -> Result<Option<(Block, QuorumCertificate)>, StoreError>;
    fn get_latest_height(&self) -> Result<u64, StoreError>;
    fn save_block(&self, block: &Block, qc: &QuorumCertificate) -> Result<(), StoreError>;
    fn has_block(&self, height: u64) -> Result<bool, StoreError>;

    fn get_commit_state_root(&self, height: u64) -> Result<Option<Hash>, StoreError>;
    fn save_commit(&self, height: u64, state_root: Hash) -> Result<(), StoreError>;

    fn get_state_root(&self) -> Result<Hash, StoreError>;
    fn set_state_root(&self, root: Hash) -> Result<(), StoreError>;

    fn apply_write_set(&self, writes: &WriteSet) -> Result<(), StoreError>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn get_tx_location(&self, tx_hash: Hash) -> Result<Option<(u64, u32)>, StoreError>;
}
