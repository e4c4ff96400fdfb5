//! Proposer-side block construction and non-proposer proposal validation.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::consensus::engine::EngineInner;
use crate::crypto::{compute_tx_root, ed25519};
use crate::types::{Block, BlockHeader, Hash, Proposal};

impl EngineInner {
    /// Build a block proposal:
    /// reap transactions, extend the highest QC, execute to obtain the
    /// state root, hash the header, sign over (block_hash || round).
    pub(crate) fn create_proposal(&mut self) -> anyhow::Result<Proposal> {
        let txs = match &self.tx_provider {
            Some(provider) => provider.reap_max_txs(self.max_block_bytes),
            None => Vec::new(),
        };

        let parent_hash = self
            .state
            .highest_qc
            .as_ref()
            .map(|qc| qc.block_hash)
            .unwrap_or(Hash::ZERO);

        // Committed state at the previous height; zero before the first
        // commit.
        let prev_state_root = match &self.store {
            Some(store) => store
                .get_commit_state_root(self.state.height.saturating_sub(1))
                .unwrap_or(None)
                .unwrap_or(Hash::ZERO),
            None => Hash::ZERO,
        };

        let tx_root = compute_tx_root(&txs);

        // Logical time, stamped at construction only. Execution never
        // reads the proposer's clock.
        let block_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let header = BlockHeader {
            height: self.state.height,
            round: self.state.round,
            parent_hash,
            state_root: Hash::ZERO,
            tx_root,
            proposer_id: self.address,
            block_time,
            chain_id: self.chain_id.clone(),
            block_hash: Hash::ZERO,
        };

        let mut block = Block {
            header,
            transactions: txs,
            qc: self.state.highest_qc.clone(),
        };

        if let Some(executor) = &self.executor {
            let started = std::time::Instant::now();
            let result = executor
                .execute_block(&block, prev_state_root)
                .map_err(|e| anyhow::anyhow!("execute block: {}", e))?;
            if let Some(m) = &self.metrics {
                m.consensus_block_execution_duration.observe(started.elapsed().as_secs_f64());
            }
            block.header.state_root = result.state_root;
        }

        // Hash after every field is final.
        block.header.block_hash = block.header.compute_hash();

        let mut proposal = Proposal {
            block,
            round: self.state.round,
            proposer_id: self.address,
            signature: [0u8; 64],
        };
        proposal.signature = ed25519::sign(&self.signing_key, &proposal.signing_payload());

        Ok(proposal)
    }

    /// Validate a received proposal:
    /// height and round match, proposer is the deterministic one for this
    /// round, the signature verifies, the embedded QC verifies, and the
    /// locking rule holds.
    pub(crate) fn validate_proposal(&self, proposal: &Proposal) -> anyhow::Result<()> {
        let block = &proposal.block;

        if block.header.height != self.state.height {
            anyhow::bail!(
                "proposal height {} != expected {}",
                block.header.height,
                self.state.height
            );
        }
        if proposal.round != self.state.round {
            anyhow::bail!("proposal round {} != expected {}", proposal.round, self.state.round);
        }

        let expected = self.valset.proposer(self.state.height, self.state.round);
        if proposal.proposer_id != expected.address {
            anyhow::bail!(
                "wrong proposer: got {}, expected {}",
                proposal.proposer_id,
                expected.address
            );
        }

        if !proposal.verify(&expected.public_key) {
            anyhow::bail!("invalid proposal signature");
        }

        if let Some(qc) = &block.qc {
            qc.verify(&self.valset)
                .map_err(|e| anyhow::anyhow!("embedded QC invalid: {}", e))?;
        }

        // Locking rule: while locked on L at round r_L, only vote for a
        // proposal that extends L, or one justified by a QC from a round
        // past r_L.
        if self.state.is_locked() {
            let locked_hash = self
                .state
                .locked_block
                .as_ref()
                .map(|b| b.hash())
                .unwrap_or(Hash::ZERO);

            let extends_locked = block.header.parent_hash == locked_hash;
            let has_higher_qc = block
                .qc
                .as_ref()
                .map(|qc| qc.round > self.state.locked_round)
                .unwrap_or(false);

            if !extends_locked && !has_higher_qc {
                anyhow::bail!(
                    "proposal does not extend locked block and has no higher QC (locked_round={})",
                    self.state.locked_round
                );
            }
        }

        Ok(())
    }
}
