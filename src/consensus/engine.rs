use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use ed25519_dalek::SigningKey;
use tracing::{debug, error, info, warn};

use crate::consensus::evidence::EvidencePool;
use crate::consensus::state::{ConsensusState, RoundStep};
use crate::consensus::timeout::TimeoutScheduler;
use crate::consensus::vote_set::VoteSetError;
use crate::consensus::{CommitEvent, ExecutionAdapter, Transport, TxProvider};
use crate::crypto::ed25519;
use crate::metrics::Metrics;
use crate::storage::wal::{Wal, WalEntry, WalEntryKind};
use crate::storage::Store;
use crate::types::{
    Address, Proposal, QuorumCertificate, SlashingEvidence, TimeoutMessage, ValidatorSet, Vote,
};

// Inbound buffer capacities. Overflow drops the message: honest traffic
// is re-gossiped, and a flooding peer must not stall the loop.
const PROPOSAL_BUFFER: usize = 16;
const VOTE_BUFFER: usize = 64;
const TIMEOUT_BUFFER: usize = 16;
const NEXT_HEIGHT_BUFFER: usize = 1;
const COMMIT_BUFFER: usize = 16;

pub struct EngineConfig {
    pub signing_key: SigningKey,
    /// Derived from the signing key when not set explicitly.
    pub address: Option<Address>,
    pub validator_set: ValidatorSet,
    pub chain_id: Vec<u8>,
    pub store: Option<Arc<dyn Store>>,
    pub executor: Option<Arc<dyn ExecutionAdapter>>,
    pub transport: Option<Arc<dyn Transport>>,
    pub tx_provider: Option<Arc<dyn TxProvider>>,
    pub metrics: Option<Arc<Metrics>>,
    /// Write-ahead log for own signed messages; crash inspection surface.
    pub wal: Option<Arc<Mutex<Wal>>>,
    pub base_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_block_bytes: usize,
}

impl EngineConfig {
    pub fn new(signing_key: SigningKey, validator_set: ValidatorSet) -> Self {
        Self {
            signing_key,
            address: None,
            validator_set,
            chain_id: Vec::new(),
            store: None,
            executor: None,
            transport: None,
            tx_provider: None,
            metrics: None,
            wal: None,
            base_timeout_ms: 3000,
            max_timeout_ms: 60_000,
            max_block_bytes: 1 << 20,
        }
    }
}

/// Timer fires and peer timeout messages share one inbound queue.
pub(crate) enum TimeoutInput {
    TimerFired { height: u64, round: u64 },
    PeerTimeout(TimeoutMessage),
}

/// The consensus engine.
///
/// A single-writer state machine: all state mutation happens through the
/// event-loop task draining the bounded inbound queues in arrival order.
/// The internal mutex only guards the external accessor surface (the
/// synchronous `handle_*` methods used by tests and the loop itself).
pub struct Engine {
    pub(crate) inner: Arc<Mutex<EngineInner>>,
    proposal_tx: Sender<Proposal>,
    proposal_rx: Receiver<Proposal>,
    vote_tx: Sender<Vote>,
    vote_rx: Receiver<Vote>,
    timeout_tx: Sender<TimeoutInput>,
    timeout_rx: Receiver<TimeoutInput>,
    next_height_rx: Receiver<()>,
    commit_rx: Receiver<CommitEvent>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<Metrics>>,
}

pub(crate) struct EngineInner {
    pub(crate) state: ConsensusState,
    pub(crate) valset: ValidatorSet,
    pub(crate) signing_key: SigningKey,
    pub(crate) address: Address,
    pub(crate) chain_id: Vec<u8>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) executor: Option<Arc<dyn ExecutionAdapter>>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) tx_provider: Option<Arc<dyn TxProvider>>,
    pub(crate) metrics: Option<Arc<Metrics>>,
    pub(crate) timeouts: TimeoutScheduler,
    pub(crate) evidence: Arc<EvidencePool>,
    pub(crate) wal: Option<Arc<Mutex<Wal>>>,
    pub(crate) max_block_bytes: usize,
    pub(crate) timeout_tx: Sender<TimeoutInput>,
    pub(crate) next_height_tx: Sender<()>,
    pub(crate) commit_tx: Sender<CommitEvent>,
    /// Set when a durability failure makes continuing unsafe.
    pub(crate) halted: Option<String>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> anyhow::Result<Self> {
        if cfg.validator_set.is_empty() {
            anyhow::bail!("consensus: validator set required");
        }

        let derived = ed25519::address_from_pubkey(&cfg.signing_key.verifying_key());
        let address = cfg.address.unwrap_or(derived);

        let start_height = match &cfg.store {
            Some(store) => store.get_latest_height().unwrap_or(0) + 1,
            None => 1,
        };

        let (proposal_tx, proposal_rx) = bounded(PROPOSAL_BUFFER);
        let (vote_tx, vote_rx) = bounded(VOTE_BUFFER);
        let (timeout_tx, timeout_rx) = bounded(TIMEOUT_BUFFER);
        let (next_height_tx, next_height_rx) = bounded(NEXT_HEIGHT_BUFFER);
        let (commit_tx, commit_rx) = bounded(COMMIT_BUFFER);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let inner = EngineInner {
            state: ConsensusState::new(start_height),
            valset: cfg.validator_set,
            signing_key: cfg.signing_key,
            address,
            chain_id: cfg.chain_id,
            store: cfg.store,
            executor: cfg.executor,
            transport: cfg.transport,
            tx_provider: cfg.tx_provider,
            metrics: cfg.metrics.clone(),
            timeouts: TimeoutScheduler::new(cfg.base_timeout_ms, cfg.max_timeout_ms),
            evidence: Arc::new(EvidencePool::new()),
            wal: cfg.wal,
            max_block_bytes: cfg.max_block_bytes,
            timeout_tx: timeout_tx.clone(),
            next_height_tx,
            commit_tx,
            halted: None,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            proposal_tx,
            proposal_rx,
            vote_tx,
            vote_rx,
            timeout_tx,
            timeout_rx,
            next_height_rx,
            commit_rx,
            shutdown_tx,
            shutdown_rx,
            thread: Mutex::new(None),
            metrics: cfg.metrics,
        })
    }

    /// Launch the event loop and enter the first round.
    pub fn start(&self) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let proposal_rx = self.proposal_rx.clone();
        let vote_rx = self.vote_rx.clone();
        let timeout_rx = self.timeout_rx.clone();
        let next_height_rx = self.next_height_rx.clone();
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = std::thread::Builder::new()
            .name("consensus".into())
            .spawn(move || {
                event_loop(inner, proposal_rx, vote_rx, timeout_rx, next_height_rx, shutdown_rx)
            })?;
        *self.thread.lock().unwrap() = Some(handle);

        self.inner.lock().unwrap().enter_propose();
        Ok(())
    }

    /// Cancel the loop, stop timers, and join the loop thread.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.lock().unwrap().timeouts.stop();
    }

    /// Non-blocking queueing from the transport. Dropped with a warning
    /// when the inbound buffer is full.
    pub fn submit_proposal(&self, proposal: Proposal) {
        if self.proposal_tx.try_send(proposal).is_err() {
            warn!("proposal channel full, dropping");
            if let Some(m) = &self.metrics {
                m.channel_drops.inc();
            }
        }
    }

    pub fn submit_vote(&self, vote: Vote) {
        if self.vote_tx.try_send(vote).is_err() {
            warn!("vote channel full, dropping");
            if let Some(m) = &self.metrics {
                m.channel_drops.inc();
            }
        }
    }

    pub fn submit_timeout_msg(&self, msg: TimeoutMessage) {
        if self.timeout_tx.try_send(TimeoutInput::PeerTimeout(msg)).is_err() {
            warn!("timeout channel full, dropping");
            if let Some(m) = &self.metrics {
                m.channel_drops.inc();
            }
        }
    }

    /// Commit event stream. Finite per run, non-restartable; publication
    /// never blocks on subscriber back-pressure.
    pub fn subscribe_commits(&self) -> Receiver<CommitEvent> {
        self.commit_rx.clone()
    }

    // --- Synchronous handler surface (tests and the event loop) ---

    pub fn handle_proposal(&self, proposal: Proposal) {
        self.inner.lock().unwrap().handle_proposal(proposal);
    }

    pub fn handle_vote(&self, vote: Vote) {
        self.inner.lock().unwrap().handle_vote(vote);
    }

    pub fn handle_timeout_msg(&self, msg: TimeoutMessage) {
        self.inner.lock().unwrap().handle_timeout_msg(msg);
    }

    pub fn enter_propose(&self) {
        self.inner.lock().unwrap().enter_propose();
    }

    /// Process a pending next-height signal synchronously. Used by tests
    /// to step through the two-chain commit rule.
    pub fn drain_next_height(&self) -> bool {
        if self.next_height_rx.try_recv().is_ok() {
            self.inner.lock().unwrap().enter_propose();
            true
        } else {
            false
        }
    }

    // --- Accessors ---

    pub fn address(&self) -> Address {
        self.inner.lock().unwrap().address
    }

    pub fn height(&self) -> u64 {
        self.inner.lock().unwrap().state.height
    }

    pub fn round(&self) -> u64 {
        self.inner.lock().unwrap().state.round
    }

    pub fn step(&self) -> RoundStep {
        self.inner.lock().unwrap().state.step
    }

    pub fn last_commit_height(&self) -> u64 {
        self.inner.lock().unwrap().state.last_commit_height
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().unwrap().state.is_locked()
    }

    pub fn locked_round(&self) -> u64 {
        self.inner.lock().unwrap().state.locked_round
    }

    pub fn highest_qc(&self) -> Option<QuorumCertificate> {
        self.inner.lock().unwrap().state.highest_qc.clone()
    }

    pub fn proposal(&self) -> Option<Proposal> {
        self.inner.lock().unwrap().state.proposal.clone()
    }

    pub fn evidence(&self) -> Arc<EvidencePool> {
        self.inner.lock().unwrap().evidence.clone()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.lock().unwrap().halted.is_some()
    }
}

fn event_loop(
    inner: Arc<Mutex<EngineInner>>,
    proposal_rx: Receiver<Proposal>,
    vote_rx: Receiver<Vote>,
    timeout_rx: Receiver<TimeoutInput>,
    next_height_rx: Receiver<()>,
    shutdown_rx: Receiver<()>,
) {
    loop {
        select! {
            recv(shutdown_rx) -> _ => break,
            recv(proposal_rx) -> msg => match msg {
                Ok(p) => inner.lock().unwrap().handle_proposal(p),
                Err(_) => break,
            },
            recv(vote_rx) -> msg => match msg {
                Ok(v) => inner.lock().unwrap().handle_vote(v),
                Err(_) => break,
            },
            recv(timeout_rx) -> msg => match msg {
                Ok(TimeoutInput::TimerFired { height, round }) => {
                    inner.lock().unwrap().handle_timeout(height, round)
                }
                Ok(TimeoutInput::PeerTimeout(tm)) => {
                    inner.lock().unwrap().handle_timeout_msg(tm)
                }
                Err(_) => break,
            },
            recv(next_height_rx) -> msg => match msg {
                Ok(()) => inner.lock().unwrap().enter_propose(),
                Err(_) => break,
            },
        }

        let guard = inner.lock().unwrap();
        if let Some(reason) = &guard.halted {
            error!(reason = %reason, "consensus halted");
            break;
        }
    }
}

impl EngineInner {
    /// Record an own signed message before it leaves the process.
    pub(crate) fn wal_write(&self, kind: WalEntryKind, data: Vec<u8>) {
        if let Some(wal) = &self.wal {
            let entry =
                WalEntry { height: self.state.height, round: self.state.round, kind, data };
            if let Err(e) = wal.lock().unwrap().write_entry(&entry) {
                warn!(error = %e, "wal write failed");
            }
        }
    }

    /// Process a received proposal message.
    pub(crate) fn handle_proposal(&mut self, proposal: Proposal) {
        if let Some(m) = &self.metrics {
            m.consensus_proposals_received.inc();
        }

        if proposal.block.header.height != self.state.height {
            debug!(
                got = proposal.block.header.height,
                want = self.state.height,
                "ignoring proposal for wrong height"
            );
            return;
        }
        if proposal.round != self.state.round {
            debug!(
                got = proposal.round,
                want = self.state.round,
                "ignoring proposal for wrong round"
            );
            return;
        }

        // First proposal for the round wins. A second, different block
        // signed by the round's proposer is slashable equivocation.
        if let Some(existing) = &self.state.proposal {
            if existing.block.hash() != proposal.block.hash() {
                let expected = self.valset.proposer(self.state.height, self.state.round);
                if proposal.proposer_id == expected.address
                    && proposal.verify(&expected.public_key)
                {
                    warn!(proposer = %proposal.proposer_id, "double proposal detected");
                    self.evidence.add_evidence(SlashingEvidence::double_proposal(
                        existing.clone(),
                        proposal,
                    ));
                    if let Some(m) = &self.metrics {
                        m.consensus_equivocations.inc();
                    }
                }
            }
            return;
        }

        if let Err(e) = self.validate_proposal(&proposal) {
            warn!(error = %e, "invalid proposal");
            return;
        }

        self.state.proposal = Some(proposal);

        if self.state.step == RoundStep::Propose {
            self.enter_vote();
        }
    }

    /// Process a received vote message.
    pub(crate) fn handle_vote(&mut self, vote: Vote) {
        if let Some(m) = &self.metrics {
            m.consensus_votes_received.inc();
        }

        if vote.height != self.state.height || vote.round != self.state.round {
            return;
        }

        let quorum = match self.state.vote_set.add_vote(&self.valset, vote) {
            Ok(q) => q,
            Err(VoteSetError::Equivocation(voter, evidence)) => {
                warn!(validator = %voter, "equivocation detected");
                self.evidence.add_evidence(*evidence);
                if let Some(m) = &self.metrics {
                    m.consensus_equivocations.inc();
                }
                return;
            }
            Err(e) => {
                debug!(error = %e, "failed to add vote");
                return;
            }
        };

        if quorum && self.state.step == RoundStep::Vote {
            self.on_quorum_reached();
        }
    }

    /// Process a received timeout message from a peer. A carried QC is
    /// adopted only after verifying; f+1 peers ahead of us pull us to
    /// their round.
    pub(crate) fn handle_timeout_msg(&mut self, msg: TimeoutMessage) {
        let val = match self.valset.get_by_address(&msg.voter_id) {
            Some(v) => v,
            None => {
                debug!(voter = %msg.voter_id, "timeout from unknown validator");
                return;
            }
        };
        if !msg.verify(&val.public_key) {
            debug!(voter = %msg.voter_id, "timeout with invalid signature");
            return;
        }

        if let Some(high_qc) = &msg.high_qc {
            let is_higher = self
                .state
                .highest_qc
                .as_ref()
                .map(|qc| high_qc.round > qc.round)
                .unwrap_or(true);
            if is_higher {
                match high_qc.verify(&self.valset) {
                    Ok(()) => self.state.update_highest_qc(high_qc.clone()),
                    Err(e) => {
                        debug!(error = %e, "timeout carried invalid QC");
                        return;
                    }
                }
            }
        }

        if msg.height == self.state.height && msg.round > self.state.round {
            info!(
                from_round = self.state.round,
                to_round = msg.round,
                "received timeout for future round, advancing"
            );
            self.enter_new_round(msg.round);
        }
    }
}
