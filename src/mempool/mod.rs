//! Mempool: admit, validate, order, and evict unconfirmed transactions;
//! feed the proposer a deterministic fee-ordered sequence; resist spam
//! and replay.

pub mod cache;
pub mod ordering;
pub mod validation;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::debug;

use crate::consensus::TxProvider;
use crate::metrics::Metrics;
use crate::storage::{Store, StoreError};
use crate::types::{Address, Hash};

pub use cache::EvictionCache;
pub use ordering::{PriorityIndex, PriorityKey};
pub use validation::{build_tx, encode_nonce, nonce_key, parse_tx, verify_signature};

#[derive(Clone, Debug)]
pub struct MempoolConfig {
    pub max_size: usize,
    pub max_tx_bytes: usize,
    pub cache_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_tx_bytes: 1024 * 1024,
            cache_size: 10_000,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MempoolError {
    #[error("tx too small: {got} < {min}")]
    TooSmall { got: usize, min: usize },
    #[error("tx exceeds max size: {got} > {max}")]
    TooLarge { got: usize, max: usize },
    #[error("zero sender address")]
    ZeroSender,
    #[error("empty signature")]
    EmptySignature,
    #[error("duplicate transaction")]
    Duplicate,
    #[error("transaction recently processed")]
    RecentlyProcessed,
    #[error("nonce too low: got {got}, expected >= {expected}")]
    NonceTooLow { got: u64, expected: u64 },
    #[error("nonce gap too large: got {got}, expected ~{expected}")]
    NonceGap { got: u64, expected: u64 },
    #[error("mempool full and tx fee too low")]
    FullAndFeeTooLow,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A validated transaction held in the pool.
#[derive(Clone, Debug)]
pub struct MempoolTx {
    pub hash: Hash,
    pub raw: Vec<u8>,
    pub fee: u64,
    pub nonce: u64,
    pub sender: Address,
    pub size: usize,
    pub added_at: Instant,
    pub signature: [u8; 64],
}

struct Pool {
    by_hash: BTreeMap<Hash, MempoolTx>,
    priority: PriorityIndex,
}

/// The mempool. One lock guards the pool maps; the eviction cache keeps
/// its own lock. No path acquires both in an order-sensitive way.
pub struct Mempool {
    pool: RwLock<Pool>,
    cache: EvictionCache,
    cfg: MempoolConfig,
    state: Option<Arc<dyn Store>>,
    metrics: Option<Arc<Metrics>>,
}

impl Mempool {
    pub fn new(cfg: MempoolConfig, state: Option<Arc<dyn Store>>) -> Self {
        Self {
            pool: RwLock::new(Pool { by_hash: BTreeMap::new(), priority: PriorityIndex::new() }),
            cache: EvictionCache::new(cfg.cache_size),
            cfg,
            state,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate and admit a transaction. Stateless checks, duplicate and
    /// recently-processed checks, stateful nonce checks, then capacity:
    /// a full pool only accepts a tx that outbids its lowest-fee member.
    pub fn add_tx(&self, raw: &[u8]) -> Result<Hash, MempoolError> {
        let result = self.add_tx_inner(raw);
        if result.is_err() {
            if let Some(m) = &self.metrics {
                m.mempool_rejected.inc();
            }
        }
        result
    }

    fn add_tx_inner(&self, raw: &[u8]) -> Result<Hash, MempoolError> {
        let tx = validation::validate_stateless(raw, &self.cfg)?;

        let mut pool = self.pool.write().unwrap();

        if pool.by_hash.contains_key(&tx.hash) {
            return Err(MempoolError::Duplicate);
        }
        if self.cache.contains(&tx.hash) {
            return Err(MempoolError::RecentlyProcessed);
        }

        if let Some(state) = &self.state {
            validation::validate_stateful(&tx, state.as_ref())?;
        }

        if pool.by_hash.len() >= self.cfg.max_size {
            let lowest = match pool.priority.lowest() {
                Some(k) => *k,
                None => return Err(MempoolError::FullAndFeeTooLow),
            };
            if tx.fee <= lowest.fee {
                return Err(MempoolError::FullAndFeeTooLow);
            }
            pool.by_hash.remove(&lowest.hash);
            pool.priority.remove(lowest.fee, lowest.hash);
            self.cache.add(lowest.hash);
        }

        let hash = tx.hash;
        debug!(hash = %hash, fee = tx.fee, pool_size = pool.by_hash.len() + 1, "transaction added to mempool");

        pool.priority.insert(tx.fee, hash);
        pool.by_hash.insert(hash, tx);

        if let Some(m) = &self.metrics {
            m.mempool_size.set(pool.by_hash.len() as i64);
        }

        Ok(hash)
    }

    /// Deterministic reap: descending fee, ascending hash on ties. A tx
    /// that would push the cumulative size past `max_bytes` is skipped,
    /// not truncated, so identical pools reap identically regardless of
    /// admission order.
    pub fn reap_max_txs(&self, max_bytes: usize) -> Vec<Vec<u8>> {
        let pool = self.pool.read().unwrap();

        let mut result = Vec::new();
        let mut total = 0usize;

        for key in pool.priority.iter() {
            let tx = match pool.by_hash.get(&key.hash) {
                Some(tx) => tx,
                None => continue,
            };
            if total + tx.size > max_bytes {
                continue;
            }
            result.push(tx.raw.clone());
            total += tx.size;
        }

        result
    }

    /// Drop committed transactions and remember them in the eviction
    /// cache so late gossip cannot re-admit them.
    pub fn remove_txs(&self, hashes: &[Hash]) {
        let mut pool = self.pool.write().unwrap();
        for hash in hashes {
            if let Some(tx) = pool.by_hash.remove(hash) {
                pool.priority.remove(tx.fee, tx.hash);
            }
            self.cache.add(*hash);
        }
        if let Some(m) = &self.metrics {
            m.mempool_size.set(pool.by_hash.len() as i64);
        }
    }

    pub fn size(&self) -> usize {
        self.pool.read().unwrap().by_hash.len()
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.pool.read().unwrap().by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<MempoolTx> {
        self.pool.read().unwrap().by_hash.get(hash).cloned()
    }

    pub fn flush(&self) {
        let mut pool = self.pool.write().unwrap();
        pool.by_hash.clear();
        pool.priority = PriorityIndex::new();
    }
}

impl TxProvider for Mempool {
    fn reap_max_txs(&self, max_bytes: usize) -> Vec<Vec<u8>> {
        Mempool::reap_max_txs(self, max_bytes)
    }
}
