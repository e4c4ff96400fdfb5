//! Round-step transitions: Propose → Vote → quorum → two-chain commit →
//! next height, plus the view-change path on timeout.

use tracing::{error, info, warn};

use crate::consensus::engine::{EngineInner, TimeoutInput};
use crate::consensus::state::RoundStep;
use crate::consensus::vote_set::VoteSetError;
use crate::consensus::CommitEvent;
use crate::crypto::ed25519;
use crate::storage::wal::WalEntryKind;
use crate::types::codec::{encode_proposal, encode_timeout, encode_vote};
use crate::types::{Block, QuorumCertificate, TimeoutMessage, Vote};

impl EngineInner {
    /// Transition to a new round: per-round state is reset, locks and
    /// commit tracking survive.
    pub(crate) fn enter_new_round(&mut self, round: u64) {
        info!(height = self.state.height, round, "entering new round");
        self.state.reset_for_new_round(round);
        if let Some(m) = &self.metrics {
            m.consensus_round.set(round as i64);
        }
        self.enter_propose();
    }

    /// Begin the proposal phase. The proposer builds and broadcasts a
    /// block and votes on it immediately; everyone else arms the round
    /// timer and waits.
    pub(crate) fn enter_propose(&mut self) {
        self.state.step = RoundStep::Propose;
        if let Some(m) = &self.metrics {
            m.consensus_height.set(self.state.height as i64);
            m.consensus_round.set(self.state.round as i64);
        }

        let proposer = self.valset.proposer(self.state.height, self.state.round);

        if proposer.address == self.address {
            info!(
                height = self.state.height,
                round = self.state.round,
                "we are proposer, creating proposal"
            );

            let proposal = match self.create_proposal() {
                Ok(p) => p,
                Err(e) => {
                    // Proposer path aborts; fall through to the timeout so
                    // the height is not stuck.
                    error!(error = %e, "failed to create proposal");
                    self.schedule_round_timeout();
                    return;
                }
            };

            self.state.proposal = Some(proposal.clone());
            self.wal_write(WalEntryKind::Proposal, encode_proposal(&proposal));

            if let Some(transport) = &self.transport {
                if let Err(e) = transport.broadcast_proposal(&proposal) {
                    error!(error = %e, "failed to broadcast proposal");
                }
            }

            self.enter_vote();
        } else {
            self.schedule_round_timeout();
        }
    }

    /// Begin the vote phase: sign a vote for the accepted proposal, count
    /// it, broadcast it.
    pub(crate) fn enter_vote(&mut self) {
        self.state.step = RoundStep::Vote;

        let proposal = match &self.state.proposal {
            Some(p) => p,
            None => return,
        };

        let block_hash = proposal.block.hash();
        let mut vote = Vote {
            block_hash,
            height: self.state.height,
            round: self.state.round,
            voter_id: self.address,
            signature: [0u8; 64],
        };
        vote.signature = ed25519::sign(&self.signing_key, &vote.signing_payload());
        self.wal_write(WalEntryKind::Vote, encode_vote(&vote));

        let quorum = match self.state.vote_set.add_vote(&self.valset, vote.clone()) {
            Ok(q) => q,
            Err(VoteSetError::Equivocation(voter, evidence)) => {
                warn!(validator = %voter, "own vote equivocated");
                self.evidence.add_evidence(*evidence);
                false
            }
            Err(e) => {
                error!(error = %e, "failed to add own vote");
                false
            }
        };

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.broadcast_vote(&vote) {
                error!(error = %e, "failed to broadcast vote");
            }
        }

        if quorum {
            self.on_quorum_reached();
        }
    }

    /// The local round timer fired: broadcast a timeout message carrying
    /// our highest QC and move to the next round.
    pub(crate) fn handle_timeout(&mut self, height: u64, round: u64) {
        if height != self.state.height || round != self.state.round {
            return;
        }

        info!(height, round, "round timed out");
        if let Some(m) = &self.metrics {
            m.consensus_timeouts.inc();
        }

        let mut tm = TimeoutMessage {
            height,
            round,
            voter_id: self.address,
            signature: [0u8; 64],
            high_qc: self.state.highest_qc.clone(),
        };
        tm.signature = ed25519::sign(&self.signing_key, &tm.signing_payload());
        self.wal_write(WalEntryKind::Timeout, encode_timeout(&tm));

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.broadcast_timeout(&tm) {
                error!(error = %e, "failed to broadcast timeout");
            }
        }

        self.enter_new_round(round + 1);
    }

    /// A QC formed from the collected votes.
    ///
    /// Two-chain rule: the QC certifies the current block; if that block
    /// itself embeds a QC for its parent, the parent is final. Then lock
    /// on the current block, adopt the new QC, reset backoff, and advance.
    pub(crate) fn on_quorum_reached(&mut self) {
        let qc = match self.state.vote_set.make_qc(&self.valset) {
            Ok(qc) => qc,
            Err(e) => {
                error!(error = %e, "failed to make QC");
                return;
            }
        };

        let block = match &self.state.proposal {
            Some(p) => p.block.clone(),
            None => {
                error!("quorum without proposal");
                return;
            }
        };

        info!(
            height = self.state.height,
            round = self.state.round,
            "quorum reached, QC formed"
        );

        if let (Some(parent_qc), Some(locked)) = (&block.qc, &self.state.locked_block) {
            let locked = locked.clone();
            let parent_qc = parent_qc.clone();
            self.persist_commit(locked, parent_qc);
            if self.halted.is_some() {
                return;
            }
        }

        // The QC we just formed certifies the newest block; it supersedes
        // any QC from an earlier height regardless of round numbers.
        // Round-guarded adoption only applies to QCs carried by peers'
        // timeout messages within the current height.
        self.state.highest_qc = Some(qc);
        self.state.lock(block, self.state.round);
        self.timeouts.reset(self.state.round);

        self.advance_height();
    }

    /// Finalize a committed block: persist, track, publish.
    ///
    /// A store failure here is fatal — a commit-claim on disk must be
    /// real, so the engine halts instead of advancing past it.
    pub(crate) fn persist_commit(&mut self, block: Block, qc: QuorumCertificate) {
        let height = block.header.height;
        let state_root = block.header.state_root;

        info!(height, hash = %block.hash(), "committing block");

        if let Some(store) = &self.store {
            let started = std::time::Instant::now();
            if let Err(e) = store.save_block(&block, &qc) {
                error!(height, error = %e, "failed to save block");
                self.halted = Some(format!("save block at height {}: {}", height, e));
                return;
            }
            if let Err(e) = store.save_commit(height, state_root) {
                error!(height, error = %e, "failed to save commit");
                self.halted = Some(format!("save commit at height {}: {}", height, e));
                return;
            }
            if let Some(m) = &self.metrics {
                m.consensus_block_persist_duration.observe(started.elapsed().as_secs_f64());
            }
        }

        self.state.last_commit_height = height;
        self.state.last_commit_qc = Some(qc.clone());
        if let Some(m) = &self.metrics {
            m.consensus_commits.inc();
        }

        // Entries at or below the committed height can never matter again.
        if let Some(wal) = &self.wal {
            if let Err(e) = wal.lock().unwrap().truncate_below(height + 1) {
                warn!(error = %e, "wal truncate failed");
            }
        }

        let event = CommitEvent { block, qc, state_root, height };
        // Never stall commit on a slow or absent subscriber.
        let _ = self.commit_tx.try_send(event);
    }

    /// Move to the next height, preserving locks and QC state, and signal
    /// the event loop asynchronously. The signal (rather than a direct
    /// call) breaks the recursion a single validator would otherwise hit
    /// when its own vote completes a QC.
    pub(crate) fn advance_height(&mut self) {
        let next_height = self.state.height + 1;

        let locked_block = self.state.locked_block.take();
        let locked_round = self.state.locked_round;
        let highest_qc = self.state.highest_qc.take();
        let last_commit_height = self.state.last_commit_height;
        let last_commit_qc = self.state.last_commit_qc.take();

        self.state.reset_for_new_height(next_height);

        self.state.locked_block = locked_block;
        self.state.locked_round = locked_round;
        self.state.highest_qc = highest_qc;
        self.state.last_commit_height = last_commit_height;
        self.state.last_commit_qc = last_commit_qc;

        let _ = self.next_height_tx.try_send(());
    }

    /// Arm the round timer; expiry posts a timeout event into the queue.
    /// Stale fires are discarded by the (height, round) check upstream.
    pub(crate) fn schedule_round_timeout(&mut self) {
        let tx = self.timeout_tx.clone();
        self.timeouts.schedule(self.state.height, self.state.round, move |height, round| {
            let _ = tx.try_send(TimeoutInput::TimerFired { height, round });
        });
    }
}
