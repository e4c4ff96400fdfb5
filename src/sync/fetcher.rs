use std::sync::Arc;

use crate::storage::Store;
use crate::sync::{BlockProvider, CancelToken, SyncError};

/// Bulk block downloader: pulls a height range from a peer provider into
/// the store without executing. Used to backfill history behind a
/// snapshot; heights already present are skipped.
pub struct Fetcher {
    provider: Arc<dyn BlockProvider>,
    store: Arc<dyn Store>,
}

impl Fetcher {
    pub fn new(provider: Arc<dyn BlockProvider>, store: Arc<dyn Store>) -> Self {
        Self { provider, store }
    }

    /// Fetch [start, end] inclusive. Returns the number of heights now
    /// present locally (fetched or already held).
    pub fn fetch_blocks(
        &self,
        cancel: &CancelToken,
        start: u64,
        end: u64,
    ) -> Result<usize, SyncError> {
        if start > end {
            return Err(SyncError::Fetch {
                height: start,
                reason: format!("invalid range: start {} > end {}", start, end),
            });
        }

        let mut fetched = 0;
        for height in start..=end {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            if self.store.has_block(height)? {
                fetched += 1;
                continue;
            }

            let (block, qc) = self.provider.get_block(height)?;
            self.store.save_block(&block, &qc)?;
            fetched += 1;
        }

        Ok(fetched)
    }

    pub fn fetch_latest_height(&self) -> Result<u64, SyncError> {
        self.provider.get_latest_height()
    }
}
