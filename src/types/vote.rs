use crate::crypto::ed25519;
use crate::types::{Address, Hash, Proposal};

/// A validator's vote for a block at (height, round).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub block_hash: Hash,
    pub height: u64,
    pub round: u64,
    pub voter_id: Address,
    pub signature: [u8; 64],
}

impl Vote {
    /// Canonical bytes signed for this vote:
    /// block_hash(32) || height(8 LE) || round(8 LE).
    pub fn signing_payload(&self) -> [u8; 48] {
        let mut buf = [0u8; 48];
        buf[..32].copy_from_slice(&self.block_hash.0);
        buf[32..40].copy_from_slice(&self.height.to_le_bytes());
        buf[40..48].copy_from_slice(&self.round.to_le_bytes());
        buf
    }

    pub fn verify(&self, public_key: &[u8; 32]) -> bool {
        if self.signature == [0u8; 64] {
            return false;
        }
        ed25519::verify_bytes(public_key, &self.signing_payload(), &self.signature)
    }
}

/// Same voter, same (height, round), different block hash.
pub fn is_equivocation(a: &Vote, b: &Vote) -> bool {
    a.voter_id == b.voter_id
        && a.height == b.height
        && a.round == b.round
        && a.block_hash != b.block_hash
}

/// Broadcast when a validator's round timer expires. Carries the sender's
/// highest known QC so lagging peers can catch up on view change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutMessage {
    pub height: u64,
    pub round: u64,
    pub voter_id: Address,
    pub signature: [u8; 64],
    pub high_qc: Option<crate::types::QuorumCertificate>,
}

impl TimeoutMessage {
    /// Canonical bytes signed: height(8 LE) || round(8 LE).
    pub fn signing_payload(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.height.to_le_bytes());
        buf[8..16].copy_from_slice(&self.round.to_le_bytes());
        buf
    }

    pub fn verify(&self, public_key: &[u8; 32]) -> bool {
        if self.signature == [0u8; 64] {
            return false;
        }
        ed25519::verify_bytes(public_key, &self.signing_payload(), &self.signature)
    }
}

/// Proof of validator misbehaviour, pending inclusion in a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashingEvidence {
    pub kind: EvidenceKind,
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvidenceKind {
    /// Two distinct-block votes from one validator at the same (height, round).
    DoubleVote {
        vote_a: Vote,
        vote_b: Vote,
        validator_id: Address,
    },
    /// Two distinct proposals from one validator at the same (height, round).
    DoubleProposal {
        proposal_a: Box<Proposal>,
        proposal_b: Box<Proposal>,
        validator_id: Address,
    },
}

impl SlashingEvidence {
    pub fn double_vote(vote_a: Vote, vote_b: Vote) -> Self {
        let validator_id = vote_a.voter_id;
        let height = vote_a.height;
        SlashingEvidence {
            kind: EvidenceKind::DoubleVote { vote_a, vote_b, validator_id },
            height,
            timestamp: 0,
        }
    }

    pub fn double_proposal(proposal_a: Proposal, proposal_b: Proposal) -> Self {
        let validator_id = proposal_a.proposer_id;
        let height = proposal_a.block.header.height;
        SlashingEvidence {
            kind: EvidenceKind::DoubleProposal {
                proposal_a: Box::new(proposal_a),
                proposal_b: Box::new(proposal_b),
                validator_id,
            },
            height,
            timestamp: 0,
        }
    }

    pub fn validator_id(&self) -> Address {
        match &self.kind {
            EvidenceKind::DoubleVote { validator_id, .. } => *validator_id,
            EvidenceKind::DoubleProposal { validator_id, .. } => *validator_id,
        }
    }
}
