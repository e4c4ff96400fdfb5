//! Deterministic native executor, used when no sandbox artifact is
//! configured. Exists so the engine always has a testable default; a
//! production deployment ships a WASM artifact instead.

use crate::crypto::hash::sha256;
use crate::execution::types::{
    ExecutionRequest, ExecutionResponse, ExecutionStatus, Receipt, API_VERSION,
};
use crate::storage::WriteSet;
use crate::types::Hash;

/// Per-tx gas: flat base plus one unit per payload byte.
const TX_BASE_GAS: u64 = 1000;

pub struct NativeExecutor;

impl NativeExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute deterministically: each transaction is written at
    /// key = H(tx), and the new root folds the sorted tx hashes into the
    /// previous root. Same (prev_root, block) always gives the same
    /// (root, gas) pair.
    pub fn execute(&self, request: &ExecutionRequest) -> (ExecutionResponse, WriteSet) {
        let mut gas_used = 0u64;
        let mut writes = WriteSet::new();
        let mut receipts = Vec::with_capacity(request.transactions.len());

        for (i, tx) in request.transactions.iter().enumerate() {
            let tx_gas = TX_BASE_GAS + tx.len() as u64;
            gas_used = gas_used.saturating_add(tx_gas);

            if gas_used > request.limits.gas_limit {
                return (
                    ExecutionResponse::failure(ExecutionStatus::OutOfGas, request.prev_state_root),
                    WriteSet::new(),
                );
            }

            writes.insert(sha256(tx).0.to_vec(), tx.clone());
            receipts.push(Receipt {
                tx_index: i as u32,
                success: true,
                gas_used: tx_gas,
                result_code: 0,
                return_data: Vec::new(),
            });
        }

        let new_state_root = compute_state_root(request.prev_state_root, &request.transactions);

        (
            ExecutionResponse {
                api_version: API_VERSION,
                status: ExecutionStatus::Ok,
                new_state_root,
                gas_used,
                receipts,
                events: Vec::new(),
                logs: Vec::new(),
            },
            writes,
        )
    }
}

impl Default for NativeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// new_root = H(prev_root || u64_be(n_txs) || concat(sorted(H(tx_i)))).
///
/// Unlike tx_root this fold is order-independent: tx hashes are sorted
/// before folding. The two rules intentionally differ; harmonizing them
/// would be a versioned protocol change.
pub fn compute_state_root(prev_root: Hash, txs: &[Vec<u8>]) -> Hash {
    if txs.is_empty() {
        return prev_root;
    }

    let mut tx_hashes: Vec<[u8; 32]> = txs.iter().map(|tx| sha256(tx).0).collect();
    tx_hashes.sort_unstable();

    let mut buf = Vec::with_capacity(32 + 8 + 32 * tx_hashes.len());
    buf.extend_from_slice(&prev_root.0);
    buf.extend_from_slice(&(tx_hashes.len() as u64).to_be_bytes());
    for h in &tx_hashes {
        buf.extend_from_slice(h);
    }
    sha256(&buf)
}
