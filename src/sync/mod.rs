//! Block synchronization for nodes catching up: fast sync (fetch,
//! verify, re-execute) for small gaps, snapshot sync for large ones.
//! Consensus must not propose until the syncer reports CaughtUp.

pub mod fetcher;
pub mod snapshot;
pub mod verifier;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::consensus::ExecutionAdapter;
use crate::metrics::Metrics;
use crate::storage::Store;
use crate::types::{Block, Hash, QuorumCertificate, ValidatorSet};

pub use fetcher::Fetcher;
pub use snapshot::SnapshotSyncer;
pub use verifier::Verifier;

/// Gap above which snapshot sync is chosen over fast sync.
pub const SNAPSHOT_THRESHOLD: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncState {
    Idle = 0,
    FastSync = 1,
    SnapshotSync = 2,
    CaughtUp = 3,
}

impl SyncState {
    fn from_u8(v: u8) -> SyncState {
        match v {
            1 => SyncState::FastSync,
            2 => SyncState::SnapshotSync,
            3 => SyncState::CaughtUp,
            _ => SyncState::Idle,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "Idle"),
            SyncState::FastSync => write!(f, "FastSync"),
            SyncState::SnapshotSync => write!(f, "SnapshotSync"),
            SyncState::CaughtUp => write!(f, "CaughtUp"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("fetch block {height}: {reason}")]
    Fetch { height: u64, reason: String },
    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },
    #[error("state root mismatch at height {height}: got {got}, want {want}")]
    StateRootMismatch { height: u64, got: Hash, want: Hash },
    #[error("snapshot root mismatch: got {got}, want {want}")]
    SnapshotRootMismatch { got: Hash, want: Hash },
    #[error("no committed root to verify snapshot against")]
    NoCommittedRoot,
    #[error("execute block {height}: {reason}")]
    Execution { height: u64, reason: String },
    #[error(transparent)]
    Store(#[from] crate::storage::StoreError),
    #[error("cancelled")]
    Cancelled,
}

/// Block and snapshot retrieval from peers. Implemented over the gossip
/// layer in production and by in-memory providers in tests.
pub trait BlockProvider: Send + Sync {
    fn get_block(&self, height: u64) -> Result<(Block, QuorumCertificate), SyncError>;
    fn get_latest_height(&self) -> Result<u64, SyncError>;
    fn get_state_snapshot(&self, height: u64)
        -> Result<(Hash, BTreeMap<Vec<u8>, Vec<u8>>), SyncError>;
}

/// Cooperative cancellation for long sync loops.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drives a node from its local height to the network's. Fails fast on
/// any invalid block so the caller can pick a different peer.
pub struct BlockSyncer {
    store: Arc<dyn Store>,
    provider: Arc<dyn BlockProvider>,
    executor: Arc<dyn ExecutionAdapter>,
    verifier: Verifier,
    state: AtomicU8,
    target_height: AtomicU64,
    local_height: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl BlockSyncer {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn BlockProvider>,
        executor: Arc<dyn ExecutionAdapter>,
        valset: ValidatorSet,
    ) -> Self {
        Self {
            store,
            provider,
            executor,
            verifier: Verifier::new(valset),
            state: AtomicU8::new(SyncState::Idle as u8),
            target_height: AtomicU64::new(0),
            local_height: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run sync to the network's latest height:
    /// gap > SNAPSHOT_THRESHOLD chooses snapshot sync, anything smaller
    /// fast sync. Ends in CaughtUp and hands off to consensus.
    pub fn run(&self, cancel: &CancelToken) -> Result<(), SyncError> {
        let local = self.store.get_latest_height().unwrap_or(0);
        self.local_height.store(local, Ordering::SeqCst);

        let target = self.provider.get_latest_height()?;
        self.target_height.store(target, Ordering::SeqCst);

        info!(local_height = local, target_height = target, "sync starting");

        if local >= target {
            self.set_state(SyncState::CaughtUp);
            info!("already caught up");
            return Ok(());
        }

        let gap = target - local;
        if gap > SNAPSHOT_THRESHOLD {
            self.snapshot_sync(cancel, target)
        } else {
            self.fast_sync(cancel, local + 1, target)
        }
    }

    /// Download, verify, and re-execute every block in the range. A block
    /// whose execution does not reproduce its header state root is
    /// rejected before anything is persisted.
    fn fast_sync(&self, cancel: &CancelToken, start: u64, end: u64) -> Result<(), SyncError> {
        self.set_state(SyncState::FastSync);
        info!(start, end, "fast sync starting");

        let mut prev_root = self.store.get_state_root().unwrap_or(Hash::ZERO);

        for height in start..=end {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let (block, qc) = self.provider.get_block(height)?;

            self.verifier.verify_block(&block, &qc, height)?;

            let result = self
                .executor
                .execute_block(&block, prev_root)
                .map_err(|e| SyncError::Execution { height, reason: e.to_string() })?;

            if result.state_root != block.header.state_root {
                return Err(SyncError::StateRootMismatch {
                    height,
                    got: result.state_root,
                    want: block.header.state_root,
                });
            }

            self.store.save_block(&block, &qc)?;
            self.store.save_commit(height, result.state_root)?;
            self.store.set_state_root(result.state_root)?;

            prev_root = result.state_root;
            self.local_height.store(height, Ordering::SeqCst);
            if let Some(m) = &self.metrics {
                m.sync_height.set(height as i64);
            }

            debug!(height, state_root = %result.state_root, "synced block");
        }

        self.set_state(SyncState::CaughtUp);
        info!(height = end, "fast sync complete");
        Ok(())
    }

    fn snapshot_sync(&self, cancel: &CancelToken, target: u64) -> Result<(), SyncError> {
        self.set_state(SyncState::SnapshotSync);
        info!(target, "snapshot sync starting");

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let syncer = SnapshotSyncer::new(self.provider.clone(), self.store.clone());
        syncer.sync_to_height(target)?;

        self.local_height.store(target, Ordering::SeqCst);
        if let Some(m) = &self.metrics {
            m.sync_height.set(target as i64);
        }
        self.set_state(SyncState::CaughtUp);
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.state() == SyncState::CaughtUp
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: SyncState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    pub fn current_height(&self) -> u64 {
        self.local_height.load(Ordering::SeqCst)
    }

    pub fn target_height(&self) -> u64 {
        self.target_height.load(Ordering::SeqCst)
    }
}
