use std::sync::Arc;

use tracing::info;

use crate::storage::Store;
use crate::sync::{BlockProvider, SyncError};
use crate::types::Hash;

/// Snapshot-based state sync for nodes far behind: fetch the key/value
/// set at the target height, verify its root against the committed root,
/// apply atomically, advance the state-root cursor.
pub struct SnapshotSyncer {
    provider: Arc<dyn BlockProvider>,
    store: Arc<dyn Store>,
}

impl SnapshotSyncer {
    pub fn new(provider: Arc<dyn BlockProvider>, store: Arc<dyn Store>) -> Self {
        Self { provider, store }
    }

    pub fn sync_to_height(&self, target_height: u64) -> Result<(), SyncError> {
        info!(target_height, "starting snapshot sync");

        let (snapshot_root, state_data) = self.provider.get_state_snapshot(target_height)?;

        // The committed root is the trust anchor. If we do not have it
        // yet, fetch the block at the target height to obtain it.
        let committed_root = match self.store.get_commit_state_root(target_height)? {
            Some(root) => root,
            None => {
                let (block, qc) = self.provider.get_block(target_height)?;
                self.store.save_block(&block, &qc)?;
                block.header.state_root
            }
        };

        verify_snapshot(committed_root, snapshot_root)?;

        self.store.apply_write_set(&state_data)?;
        self.store.set_state_root(snapshot_root)?;
        self.store.save_commit(target_height, snapshot_root)?;

        info!(height = target_height, state_root = %snapshot_root, "snapshot sync complete");
        Ok(())
    }
}

/// A snapshot is only as good as its root: reject unless it matches the
/// committed root exactly.
pub fn verify_snapshot(committed_root: Hash, snapshot_root: Hash) -> Result<(), SyncError> {
    if committed_root.is_zero() {
        return Err(SyncError::NoCommittedRoot);
    }
    if snapshot_root != committed_root {
        return Err(SyncError::SnapshotRootMismatch { got: snapshot_root, want: committed_root });
    }
    Ok(())
}
