use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// All Prometheus metrics for the node.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<std::sync::Mutex<Registry>>,

    // Consensus
    pub consensus_height: Gauge<i64, AtomicI64>,
    pub consensus_round: Gauge<i64, AtomicI64>,
    pub consensus_proposals_received: Counter,
    pub consensus_votes_received: Counter,
    pub consensus_timeouts: Counter,
    pub consensus_equivocations: Counter,
    pub consensus_commits: Counter,
    pub consensus_block_execution_duration: Histogram,
    pub consensus_block_persist_duration: Histogram,

    // Channels / transport
    pub channel_drops: Counter,
    pub transport_dropped: Counter,

    // Mempool
    pub mempool_size: Gauge<i64, AtomicI64>,
    pub mempool_rejected: Counter,

    // Sync
    pub sync_height: Gauge<i64, AtomicI64>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let consensus_height = Gauge::<i64, AtomicI64>::default();
        registry.register("bedrock_consensus_height", "Current consensus height", consensus_height.clone());

        let consensus_round = Gauge::<i64, AtomicI64>::default();
        registry.register("bedrock_consensus_round", "Current consensus round", consensus_round.clone());

        let consensus_proposals_received = Counter::default();
        registry.register("bedrock_consensus_proposals_received_total", "Proposals received", consensus_proposals_received.clone());

        let consensus_votes_received = Counter::default();
        registry.register("bedrock_consensus_votes_received_total", "Votes received", consensus_votes_received.clone());

        let consensus_timeouts = Counter::default();
        registry.register("bedrock_consensus_timeouts_total", "Round timeouts fired", consensus_timeouts.clone());

        let consensus_equivocations = Counter::default();
        registry.register("bedrock_consensus_equivocations_total", "Equivocations detected", consensus_equivocations.clone());

        let consensus_commits = Counter::default();
        registry.register("bedrock_consensus_commits_total", "Blocks committed", consensus_commits.clone());

        let consensus_block_execution_duration = Histogram::new(exponential_buckets(0.001, 2.0, 14));
        registry.register("bedrock_consensus_block_execution_duration_seconds", "Block execution time", consensus_block_execution_duration.clone());

        let consensus_block_persist_duration = Histogram::new(exponential_buckets(0.001, 2.0, 12));
        registry.register("bedrock_consensus_block_persist_duration_seconds", "Block persist time", consensus_block_persist_duration.clone());

        let channel_drops = Counter::default();
        registry.register("bedrock_channel_drops_total", "Messages dropped due to full inbound channel", channel_drops.clone());

        let transport_dropped = Counter::default();
        registry.register("bedrock_transport_dropped_total", "Messages dropped by first-stage validation", transport_dropped.clone());

        let mempool_size = Gauge::<i64, AtomicI64>::default();
        registry.register("bedrock_mempool_size", "Transactions in the mempool", mempool_size.clone());

        let mempool_rejected = Counter::default();
        registry.register("bedrock_mempool_rejected_total", "Transactions rejected at admission", mempool_rejected.clone());

        let sync_height = Gauge::<i64, AtomicI64>::default();
        registry.register("bedrock_sync_height", "Latest synced height", sync_height.clone());

        Self {
            registry: Arc::new(std::sync::Mutex::new(registry)),
            consensus_height,
            consensus_round,
            consensus_proposals_received,
            consensus_votes_received,
            consensus_timeouts,
            consensus_equivocations,
            consensus_commits,
            consensus_block_execution_duration,
            consensus_block_persist_duration,
            channel_drops,
            transport_dropped,
            mempool_size,
            mempool_rejected,
            sync_height,
        }
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        let registry = self.registry.lock().unwrap();
        prometheus_client::encoding::text::encode(&mut buf, &registry).unwrap();
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
