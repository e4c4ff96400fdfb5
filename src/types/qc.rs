use std::collections::BTreeSet;

use crate::types::{Address, Hash, ValidatorSet, Vote};

/// Proof that validators holding >= 2f+1 voting power voted for one block
/// at one round. Votes are held by value; a QC embedded in a block
/// certifies that block's parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub block_hash: Hash,
    pub round: u64,
    pub votes: Vec<Vote>,
}

#[derive(thiserror::Error, Debug)]
pub enum QcError {
    #[error("QC has no votes")]
    Empty,
    #[error("vote {0}: block hash mismatch")]
    HashMismatch(usize),
    #[error("vote {0}: unknown validator {1}")]
    UnknownValidator(usize, Address),
    #[error("vote {0}: duplicate vote from {1}")]
    DuplicateVoter(usize, Address),
    #[error("vote {0}: invalid signature from {1}")]
    InvalidSignature(usize, Address),
    #[error("insufficient voting power: got {got}, need {need}")]
    InsufficientPower { got: u64, need: u64 },
}

impl QuorumCertificate {
    /// Check the QC against a validator set: every vote references this
    /// QC's block hash, comes from a distinct known validator, carries a
    /// valid signature, and the summed power reaches quorum.
    pub fn verify(&self, valset: &ValidatorSet) -> Result<(), QcError> {
        if self.votes.is_empty() {
            return Err(QcError::Empty);
        }

        let mut seen: BTreeSet<Address> = BTreeSet::new();
        let mut power = 0u64;

        for (i, vote) in self.votes.iter().enumerate() {
            if vote.block_hash != self.block_hash {
                return Err(QcError::HashMismatch(i));
            }
            let val = valset
                .get_by_address(&vote.voter_id)
                .ok_or(QcError::UnknownValidator(i, vote.voter_id))?;
            if !seen.insert(vote.voter_id) {
                return Err(QcError::DuplicateVoter(i, vote.voter_id));
            }
            if !vote.verify(&val.public_key) {
                return Err(QcError::InvalidSignature(i, vote.voter_id));
            }
            power = power.saturating_add(val.voting_power);
        }

        if !valset.has_quorum(power) {
            return Err(QcError::InsufficientPower { got: power, need: valset.quorum() });
        }
        Ok(())
    }

    /// Total power of signers present in the validator set.
    pub fn voting_power(&self, valset: &ValidatorSet) -> u64 {
        self.votes
            .iter()
            .filter_map(|v| valset.get_by_address(&v.voter_id))
            .map(|v| v.voting_power)
            .sum()
    }
}

/// Pick the preferred QC when two candidates compete (ties on view-change
/// re-entry). Higher round wins; ties break to the lexicographically
/// greater block hash so every node picks the same side.
pub fn fork_choice<'a>(
    a: Option<&'a QuorumCertificate>,
    b: Option<&'a QuorumCertificate>,
) -> Option<&'a QuorumCertificate> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(x), Some(y)) => {
            if x.round != y.round {
                if x.round > y.round {
                    Some(x)
                } else {
                    Some(y)
                }
            } else if x.block_hash.0 >= y.block_hash.0 {
                Some(x)
            } else {
                Some(y)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qc(round: u64, hash_byte: u8) -> QuorumCertificate {
        QuorumCertificate { block_hash: Hash([hash_byte; 32]), round, votes: vec![] }
    }

    #[test]
    fn fork_choice_prefers_higher_round() {
        let low = qc(1, 0xFF);
        let high = qc(2, 0x00);
        assert_eq!(fork_choice(Some(&low), Some(&high)), Some(&high));
        assert_eq!(fork_choice(Some(&high), Some(&low)), Some(&high));
    }

    #[test]
    fn fork_choice_tie_breaks_on_greater_hash() {
        let small = qc(3, 0x01);
        let big = qc(3, 0x02);
        assert_eq!(fork_choice(Some(&small), Some(&big)), Some(&big));
        assert_eq!(fork_choice(Some(&big), Some(&small)), Some(&big));
    }

    #[test]
    fn fork_choice_handles_missing_sides() {
        let only = qc(1, 1);
        assert_eq!(fork_choice(None, Some(&only)), Some(&only));
        assert_eq!(fork_choice(Some(&only), None), Some(&only));
        assert_eq!(fork_choice(None, None), None);
    }
}
