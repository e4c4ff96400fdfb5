use crate::crypto::ed25519;
use crate::types::{Address, Block};

/// Broadcast by the round leader: the proposed block plus a signature
/// binding it to the round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub block: Block,
    pub round: u64,
    pub proposer_id: Address,
    pub signature: [u8; 64],
}

impl Proposal {
    /// Canonical bytes signed: block_hash(32) || round(8 LE).
    pub fn signing_payload(&self) -> [u8; 40] {
        let mut buf = [0u8; 40];
        buf[..32].copy_from_slice(&self.block.hash().0);
        buf[32..40].copy_from_slice(&self.round.to_le_bytes());
        buf
    }

    pub fn verify(&self, public_key: &[u8; 32]) -> bool {
        if self.signature == [0u8; 64] {
            return false;
        }
        ed25519::verify_bytes(public_key, &self.signing_payload(), &self.signature)
    }
}
