use std::fmt;

use crate::consensus::vote_set::VoteSet;
use crate::types::{Block, Proposal, QuorumCertificate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStep {
    Propose,
    Vote,
    Commit,
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStep::Propose => write!(f, "Propose"),
            RoundStep::Vote => write!(f, "Vote"),
            RoundStep::Commit => write!(f, "Commit"),
        }
    }
}

/// Per-height consensus state. Owned exclusively by the engine and
/// mutated only from its event loop.
#[derive(Clone, Debug)]
pub struct ConsensusState {
    pub height: u64,
    pub round: u64,
    pub step: RoundStep,

    /// A validator locks on a block once it has seen a QC for it. While
    /// locked it only votes for blocks extending the lock, unless a QC at
    /// a higher round justifies unlocking. This is the safety core.
    pub locked_block: Option<Block>,
    pub locked_round: u64,
    pub highest_qc: Option<QuorumCertificate>,

    pub proposal: Option<Proposal>,
    pub vote_set: VoteSet,

    pub last_commit_height: u64,
    pub last_commit_qc: Option<QuorumCertificate>,
}

impl ConsensusState {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            round: 0,
            step: RoundStep::Propose,
            locked_block: None,
            locked_round: 0,
            highest_qc: None,
            proposal: None,
            vote_set: VoteSet::new(height, 0),
            last_commit_height: 0,
            last_commit_qc: None,
        }
    }

    /// Reset per-round state; locks and commit tracking survive.
    pub fn reset_for_new_round(&mut self, round: u64) {
        self.round = round;
        self.step = RoundStep::Propose;
        self.proposal = None;
        self.vote_set = VoteSet::new(self.height, round);
    }

    /// Advance to a new height; locks are restored by the caller.
    pub fn reset_for_new_height(&mut self, height: u64) {
        self.height = height;
        self.round = 0;
        self.step = RoundStep::Propose;
        self.proposal = None;
        self.vote_set = VoteSet::new(height, 0);
    }

    pub fn is_locked(&self) -> bool {
        self.locked_block.is_some()
    }

    pub fn lock(&mut self, block: Block, round: u64) {
        self.locked_block = Some(block);
        self.locked_round = round;
    }

    pub fn unlock(&mut self) {
        self.locked_block = None;
        self.locked_round = 0;
    }

    pub fn update_highest_qc(&mut self, qc: QuorumCertificate) {
        match &self.highest_qc {
            Some(current) if qc.round <= current.round => {}
            _ => self.highest_qc = Some(qc),
        }
    }
}
