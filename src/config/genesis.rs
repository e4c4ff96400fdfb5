//! Genesis document: the fixed entry validator set and chain parameters.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Address, Hash, Validator, ValidatorSet};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub chain_id: String,
    /// Logical timestamp only; never read by execution.
    pub genesis_time: u64,
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub app_state_root: String,
    pub consensus_params: ConsensusParams,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: String,
    pub pub_key: String,
    pub power: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub max_block_size: usize,
    pub max_block_gas: u64,
    pub max_validators: usize,
}

impl GenesisDoc {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path)?;
        let doc: GenesisDoc = serde_json::from_slice(&data)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chain_id.is_empty() {
            anyhow::bail!("genesis: chain_id must not be empty");
        }
        if self.genesis_time == 0 {
            anyhow::bail!("genesis: genesis_time must not be zero");
        }
        if self.validators.is_empty() {
            anyhow::bail!("genesis: must have at least one validator");
        }

        for (i, v) in self.validators.iter().enumerate() {
            if v.power == 0 {
                anyhow::bail!("genesis: validator {}: power must be > 0", i);
            }
            let addr = hex::decode(&v.address)
                .map_err(|e| anyhow::anyhow!("genesis: validator {}: invalid address hex: {}", i, e))?;
            if addr.len() != 32 {
                anyhow::bail!("genesis: validator {}: address must be 32 bytes, got {}", i, addr.len());
            }
            let pk = hex::decode(&v.pub_key)
                .map_err(|e| anyhow::anyhow!("genesis: validator {}: invalid pub_key hex: {}", i, e))?;
            if pk.len() != 32 {
                anyhow::bail!("genesis: validator {}: pub_key must be 32 bytes, got {}", i, pk.len());
            }
        }

        if self.consensus_params.max_validators == 0 {
            anyhow::bail!("genesis: consensus_params.max_validators must be > 0");
        }
        if self.validators.len() > self.consensus_params.max_validators {
            anyhow::bail!(
                "genesis: too many validators: got {}, max {}",
                self.validators.len(),
                self.consensus_params.max_validators
            );
        }

        Ok(())
    }

    pub fn to_validator_set(&self) -> anyhow::Result<ValidatorSet> {
        let mut validators = Vec::with_capacity(self.validators.len());
        for (i, gv) in self.validators.iter().enumerate() {
            let addr_bytes = hex::decode(&gv.address)?;
            let address = Address::from_slice(&addr_bytes)
                .ok_or_else(|| anyhow::anyhow!("validator {}: address must be 32 bytes", i))?;

            let pk_bytes = hex::decode(&gv.pub_key)?;
            let public_key: [u8; 32] = pk_bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("validator {}: pub_key must be 32 bytes", i))?;

            validators.push(Validator { address, public_key, voting_power: gv.power });
        }
        Ok(ValidatorSet::new(validators)?)
    }

    pub fn app_state_root_hash(&self) -> anyhow::Result<Hash> {
        if self.app_state_root.is_empty() {
            return Ok(Hash::ZERO);
        }
        Hash::from_hex(&self.app_state_root)
            .ok_or_else(|| anyhow::anyhow!("genesis: invalid app_state_root"))
    }
}
