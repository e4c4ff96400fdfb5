use std::collections::BTreeMap;

use crate::types::{is_equivocation, Address, SlashingEvidence, ValidatorSet, Vote};

#[derive(thiserror::Error, Debug)]
pub enum VoteSetError {
    #[error("vote for (h={got_height}, r={got_round}) does not match set (h={height}, r={round})")]
    WrongHeightRound { got_height: u64, got_round: u64, height: u64, round: u64 },
    #[error("vote from unknown validator {0}")]
    UnknownValidator(Address),
    #[error("invalid vote signature from {0}")]
    InvalidSignature(Address),
    #[error("equivocation detected from {0}")]
    Equivocation(Address, Box<SlashingEvidence>),
    #[error("cannot build QC without quorum")]
    NoQuorum,
}

/// Collects verified votes for one (height, round).
///
/// At most one distinct block hash per voter: a second identical vote is
/// an idempotent no-op, a second conflicting vote is rejected and yields
/// DoubleVote evidence.
#[derive(Clone, Debug)]
pub struct VoteSet {
    height: u64,
    round: u64,
    votes: BTreeMap<Address, Vote>,
    vote_power: u64,
}

impl VoteSet {
    pub fn new(height: u64, round: u64) -> Self {
        Self { height, round, votes: BTreeMap::new(), vote_power: 0 }
    }

    /// Add a vote. Returns true when accumulated power has reached quorum
    /// (including via an idempotent duplicate).
    pub fn add_vote(
        &mut self,
        valset: &ValidatorSet,
        vote: Vote,
    ) -> Result<bool, VoteSetError> {
        if vote.height != self.height || vote.round != self.round {
            return Err(VoteSetError::WrongHeightRound {
                got_height: vote.height,
                got_round: vote.round,
                height: self.height,
                round: self.round,
            });
        }

        let val = valset
            .get_by_address(&vote.voter_id)
            .ok_or(VoteSetError::UnknownValidator(vote.voter_id))?;

        if !vote.verify(&val.public_key) {
            return Err(VoteSetError::InvalidSignature(vote.voter_id));
        }

        if let Some(existing) = self.votes.get(&vote.voter_id) {
            if is_equivocation(existing, &vote) {
                let evidence = SlashingEvidence::double_vote(existing.clone(), vote.clone());
                return Err(VoteSetError::Equivocation(vote.voter_id, Box::new(evidence)));
            }
            // Same block from the same voter: no double-counting.
            return Ok(self.has_quorum(valset));
        }

        self.vote_power = self.vote_power.saturating_add(val.voting_power);
        self.votes.insert(vote.voter_id, vote);

        Ok(self.has_quorum(valset))
    }

    pub fn has_quorum(&self, valset: &ValidatorSet) -> bool {
        valset.has_quorum(self.vote_power)
    }

    pub fn voting_power(&self) -> u64 {
        self.vote_power
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Snapshot the accepted votes into an immutable QC. Vote order is
    /// ascending voter address, so every node builds identical bytes.
    pub fn make_qc(
        &self,
        valset: &ValidatorSet,
    ) -> Result<crate::types::QuorumCertificate, VoteSetError> {
        if !self.has_quorum(valset) || self.votes.is_empty() {
            return Err(VoteSetError::NoQuorum);
        }
        let votes: Vec<Vote> = self.votes.values().cloned().collect();
        let block_hash = votes[0].block_hash;
        Ok(crate::types::QuorumCertificate { block_hash, round: self.round, votes })
    }
}
