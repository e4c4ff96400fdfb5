use crate::crypto::hash::sha256;
use crate::types::codec::Encoder;
use crate::types::{Address, Hash, QuorumCertificate};

/// Block metadata agreed on by consensus.
///
/// `block_time` is logical: stamped by the proposer at construction and
/// never observed by execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub round: u64,
    pub parent_hash: Hash,
    pub state_root: Hash,
    pub tx_root: Hash,
    pub proposer_id: Address,
    pub block_time: u64,
    pub chain_id: Vec<u8>,
    pub block_hash: Hash,
}

/// A block: header, opaque transaction payloads, and the QC certifying the
/// parent block. Back references are by content hash, never by pointer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Vec<u8>>,
    pub qc: Option<QuorumCertificate>,
}

#[derive(thiserror::Error, Debug)]
pub enum BlockError {
    #[error("block height must be > 0 for non-genesis blocks")]
    ZeroHeight,
    #[error("block chain_id must not be empty")]
    EmptyChainId,
    #[error("block proposer_id must not be zero")]
    ZeroProposer,
}

impl BlockHeader {
    /// Canonical block hash: SHA-256 over the canonical encoding of the
    /// header with `block_hash` itself left out.
    pub fn compute_hash(&self) -> Hash {
        let mut e = Encoder::new();
        e.put_u64(self.height);
        e.put_u64(self.round);
        e.put_bytes32(&self.parent_hash.0);
        e.put_bytes32(&self.state_root.0);
        e.put_bytes32(&self.tx_root.0);
        e.put_bytes32(&self.proposer_id.0);
        e.put_u64(self.block_time);
        e.put_vec(&self.chain_id);
        sha256(&e.into_bytes())
    }
}

impl Block {
    /// Structural validity. Genesis (height 0, round 0, zero parent) is
    /// exempt from the non-genesis rules.
    pub fn validate(&self) -> Result<(), BlockError> {
        let h = &self.header;
        if h.height == 0 && h.round == 0 && h.parent_hash.is_zero() {
            return Ok(());
        }
        if h.height == 0 {
            return Err(BlockError::ZeroHeight);
        }
        if h.chain_id.is_empty() {
            return Err(BlockError::EmptyChainId);
        }
        if h.proposer_id.is_zero() {
            return Err(BlockError::ZeroProposer);
        }
        Ok(())
    }

    /// The header hash, computing it if the field was never filled in.
    pub fn hash(&self) -> Hash {
        if self.header.block_hash.is_zero() {
            self.header.compute_hash()
        } else {
            self.header.block_hash
        }
    }
}
