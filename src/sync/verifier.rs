use crate::sync::SyncError;
use crate::types::{Block, QuorumCertificate, ValidatorSet};

/// Validates blocks during sync: structural checks, height continuity,
/// and QC verification under the validator set.
pub struct Verifier {
    valset: ValidatorSet,
}

impl Verifier {
    pub fn new(valset: ValidatorSet) -> Self {
        Self { valset }
    }

    pub fn verify_block(
        &self,
        block: &Block,
        qc: &QuorumCertificate,
        expected_height: u64,
    ) -> Result<(), SyncError> {
        if block.header.height != expected_height {
            return Err(SyncError::InvalidBlock {
                height: expected_height,
                reason: format!(
                    "height mismatch: got {}, want {}",
                    block.header.height, expected_height
                ),
            });
        }

        block.validate().map_err(|e| SyncError::InvalidBlock {
            height: expected_height,
            reason: e.to_string(),
        })?;

        qc.verify(&self.valset).map_err(|e| SyncError::InvalidBlock {
            height: expected_height,
            reason: format!("invalid QC: {}", e),
        })?;

        Ok(())
    }
}
