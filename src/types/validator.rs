use crate::types::Address;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub address: Address,
    pub public_key: [u8; 32],
    pub voting_power: u64,
}

/// Fixed validator set for an epoch. Entry order is the genesis order and
/// determines proposer rotation.
#[derive(Clone, Debug)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    total_power: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ValidatorSetError {
    #[error("validator set must not be empty")]
    Empty,
    #[error("validator {0} has zero voting power")]
    ZeroPower(Address),
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Result<Self, ValidatorSetError> {
        if validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        let mut total = 0u64;
        for v in &validators {
            if v.voting_power == 0 {
                return Err(ValidatorSetError::ZeroPower(v.address));
            }
            total = total.saturating_add(v.voting_power);
        }
        Ok(Self { validators, total_power: total })
    }

    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    /// Quorum threshold: 2f+1 where f = (total_power - 1) / 3.
    pub fn quorum(&self) -> u64 {
        let f = (self.total_power - 1) / 3;
        2 * f + 1
    }

    pub fn has_quorum(&self, voting_power: u64) -> bool {
        voting_power >= self.quorum()
    }

    /// Deterministic proposer rotation: validators[(height + round) % n].
    pub fn proposer(&self, height: u64, round: u64) -> &Validator {
        let idx = height.wrapping_add(round) % self.validators.len() as u64;
        &self.validators[idx as usize]
    }

    pub fn get_by_address(&self, addr: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == *addr)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.get_by_address(addr).is_some()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }
}
