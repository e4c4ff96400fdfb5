//! BFT consensus engine: propose/vote/commit rounds, QC formation,
//! locking, two-chain commit, view change with exponential timeout
//! backoff, and equivocation evidence.

pub mod engine;
pub mod evidence;
pub mod state;
pub mod timeout;
pub mod vote_set;

mod proposal;
mod round;

use crate::types::{Block, Hash, Proposal, QuorumCertificate, TimeoutMessage, Vote};

pub use engine::{Engine, EngineConfig};
pub use evidence::EvidencePool;
pub use state::{ConsensusState, RoundStep};
pub use timeout::TimeoutScheduler;
pub use vote_set::{VoteSet, VoteSetError};

/// Invokes deterministic execution for a proposed block.
pub trait ExecutionAdapter: Send + Sync {
    fn execute_block(&self, block: &Block, prev_state_root: Hash) -> anyhow::Result<ExecutionResult>;
}

/// Output of block execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    pub state_root: Hash,
    pub gas_used: u64,
}

/// Outbound gossip surface consumed by the engine. Broadcast failures are
/// transient-local: logged, never fatal (gossip is redundant).
pub trait Transport: Send + Sync {
    fn broadcast_proposal(&self, proposal: &Proposal) -> anyhow::Result<()>;
    fn broadcast_vote(&self, vote: &Vote) -> anyhow::Result<()>;
    fn broadcast_timeout(&self, msg: &TimeoutMessage) -> anyhow::Result<()>;
}

/// Supplies transactions for block building.
pub trait TxProvider: Send + Sync {
    fn reap_max_txs(&self, max_bytes: usize) -> Vec<Vec<u8>>;
}

/// Published to subscribers when a block is finalized by the two-chain
/// rule. Delivery is non-blocking; slow subscribers miss events rather
/// than stalling commit.
#[derive(Clone, Debug)]
pub struct CommitEvent {
    pub block: Block,
    pub qc: QuorumCertificate,
    pub state_root: Hash,
    pub height: u64,
}
