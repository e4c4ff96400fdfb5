use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use crate::crypto::hash::sha256;
use crate::storage::{Store, StoreError, WriteSet};
use crate::types::codec::{decode_block, decode_qc, encode_block, encode_qc};
use crate::types::{Block, Hash, QuorumCertificate};

const CF_BLOCKS: &str = "blocks"; // height (u64 BE) -> encoded Block
const CF_QCS: &str = "qcs"; // height (u64 BE) -> encoded QC
const CF_COMMITS: &str = "commits"; // height (u64 BE) -> state root (32)
const CF_STATE: &str = "state"; // raw key -> raw value
const CF_TX_INDEX: &str = "tx_index"; // tx hash (32) -> height(8 BE) | index(4 BE)
const CF_META: &str = "meta"; // "latest_height" -> u64 BE, "state_root" -> 32

fn height_key(h: u64) -> [u8; 8] {
    h.to_be_bytes()
}

/// RocksDB-backed store. Each commit is one atomic batch: block + QC +
/// tx index + latest-height advance go down together or not at all.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_QCS, Options::default()),
            ColumnFamilyDescriptor::new(CF_COMMITS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
            ColumnFamilyDescriptor::new(CF_TX_INDEX, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(name).expect("column family opened at startup")
    }

    fn read_hash(&self, cf: &str, key: &[u8]) -> Result<Option<Hash>, StoreError> {
        match self.db.get_cf(self.cf(cf), key)? {
            None => Ok(None),
            Some(bytes) => Hash::from_slice(&bytes)
                .map(Some)
                .ok_or(StoreError::Corrupt("hash record length != 32")),
        }
    }
}

impl Store for RocksStore {
    fn get_block(&self, height: u64) -> Result<Option<(Block, QuorumCertificate)>, StoreError> {
        let key = height_key(height);
        let block_bytes = match self.db.get_cf(self.cf(CF_BLOCKS), key)? {
            None => return Ok(None),
            Some(b) => b,
        };
        let qc_bytes = self
            .db
            .get_cf(self.cf(CF_QCS), key)?
            .ok_or(StoreError::Corrupt("block without QC"))?;
        Ok(Some((decode_block(&block_bytes)?, decode_qc(&qc_bytes)?)))
    }

    fn get_latest_height(&self) -> Result<u64, StoreError> {
        match self.db.get_cf(self.cf(CF_META), b"latest_height")? {
            None => Ok(0),
            Some(bytes) => {
                if bytes.len() != 8 {
                    return Err(StoreError::Corrupt("latest_height length != 8"));
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(buf))
            }
        }
    }

    fn save_block(&self, block: &Block, qc: &QuorumCertificate) -> Result<(), StoreError> {
        let height = block.header.height;
        let key = height_key(height);

        // First write at a height wins; a committed block never changes.
        if self.db.get_cf(self.cf(CF_BLOCKS), key)?.is_some() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_BLOCKS), key, encode_block(block));
        batch.put_cf(self.cf(CF_QCS), key, encode_qc(qc));
        for (i, tx) in block.transactions.iter().enumerate() {
            let mut loc = [0u8; 12];
            loc[..8].copy_from_slice(&height.to_be_bytes());
            loc[8..].copy_from_slice(&(i as u32).to_be_bytes());
            batch.put_cf(self.cf(CF_TX_INDEX), sha256(tx).0, loc);
        }
        if height > self.get_latest_height()? {
            batch.put_cf(self.cf(CF_META), b"latest_height", key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn has_block(&self, height: u64) -> Result<bool, StoreError> {
        Ok(self.db.get_cf(self.cf(CF_BLOCKS), height_key(height))?.is_some())
    }

    fn get_commit_state_root(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        self.read_hash(CF_COMMITS, &height_key(height))
    }

    fn save_commit(&self, height: u64, state_root: Hash) -> Result<(), StoreError> {
        self.db.put_cf(self.cf(CF_COMMITS), height_key(height), state_root.0)?;
        Ok(())
    }

    fn get_state_root(&self) -> Result<Hash, StoreError> {
        Ok(self.read_hash(CF_META, b"state_root")?.unwrap_or(Hash::ZERO))
    }

    fn set_state_root(&self, root: Hash) -> Result<(), StoreError> {
        self.db.put_cf(self.cf(CF_META), b"state_root", root.0)?;
        Ok(())
    }

    fn apply_write_set(&self, writes: &WriteSet) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for (k, v) in writes {
            batch.put_cf(self.cf(CF_STATE), k, v);
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get_cf(self.cf(CF_STATE), key)?)
    }

    fn get_tx_location(&self, tx_hash: Hash) -> Result<Option<(u64, u32)>, StoreError> {
        match self.db.get_cf(self.cf(CF_TX_INDEX), tx_hash.0)? {
            None => Ok(None),
            Some(bytes) => {
                if bytes.len() != 12 {
                    return Err(StoreError::Corrupt("tx location length != 12"));
                }
                let mut h = [0u8; 8];
                h.copy_from_slice(&bytes[..8]);
                let mut i = [0u8; 4];
                i.copy_from_slice(&bytes[8..]);
                Ok(Some((u64::from_be_bytes(h), u32::from_be_bytes(i))))
            }
        }
    }
}
