pub mod ed25519;
pub mod hash;

pub use hash::{compute_merkle_root, compute_tx_root, sha256};
