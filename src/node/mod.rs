//! The Node owns and wires all subsystems: store, execution adapter,
//! mempool, consensus engine, optional syncer, and the metrics exporter.
//! Lifecycle runs through the service manager: ordered start with
//! rollback, reverse-order stop.

pub mod services;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tracing::{info, warn};

use crate::crypto::sha256;

use crate::config::{GenesisDoc, NodeConfig};
use crate::consensus::{Engine, EngineConfig, ExecutionAdapter};
use crate::execution::{AdapterConfig, ExecutionLimits, SandboxConfig, WasmAdapter};
use crate::mempool::{Mempool, MempoolConfig};
use crate::metrics::{Metrics, MetricsConfig, MetricsServer};
use crate::storage::{MemStore, RocksStore, Store, Wal};
use crate::sync::{BlockProvider, BlockSyncer, CancelToken};
use crate::types::ValidatorSet;

pub use services::{Service, ServiceManager};

pub struct Node {
    store: Arc<dyn Store>,
    mempool: Arc<Mempool>,
    engine: Arc<Engine>,
    syncer: Option<Arc<BlockSyncer>>,
    metrics: Arc<Metrics>,
    services: ServiceManager,
    sync_cancel: CancelToken,
}

impl Node {
    /// Wire all subsystems without starting them. A block provider is
    /// optional; without one the node starts consensus immediately.
    pub fn new(
        cfg: &NodeConfig,
        genesis: &GenesisDoc,
        signing_key: SigningKey,
        provider: Option<Arc<dyn BlockProvider>>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let valset: ValidatorSet = genesis.to_validator_set()?;
        let metrics = Arc::new(Metrics::new());

        // 1. Storage. The durable backend also gets a consensus WAL.
        let mut wal = None;
        let store: Arc<dyn Store> = match cfg.storage.backend.as_str() {
            "memory" => Arc::new(MemStore::new()),
            _ => {
                let path = format!("{}/{}", cfg.node.data_dir, cfg.storage.db_path);
                let wal_path = Path::new(&cfg.node.data_dir).join("wal.log");
                let recovered = Wal::read_all(&wal_path)
                    .map_err(|e| anyhow::anyhow!("node: read wal: {}", e))?;
                if !recovered.is_empty() {
                    info!(entries = recovered.len(), "recovered consensus wal");
                }
                wal = Some(Arc::new(std::sync::Mutex::new(
                    Wal::open(&wal_path).map_err(|e| anyhow::anyhow!("node: open wal: {}", e))?,
                )));
                Arc::new(RocksStore::open(Path::new(&path))?)
            }
        };

        // Seed the state-root cursor from genesis on a fresh store.
        let genesis_root = genesis.app_state_root_hash()?;
        if !genesis_root.is_zero() && store.get_state_root()?.is_zero() {
            store.set_state_root(genesis_root)?;
        }

        // 2. Execution adapter; native fallback when no artifact is
        // configured or present.
        let adapter_cfg = AdapterConfig {
            wasm_path: cfg.execution.wasm_path.as_ref().map(Into::into),
            limits: ExecutionLimits {
                gas_limit: cfg.execution.gas_limit,
                ..Default::default()
            },
            sandbox: SandboxConfig {
                fuel_limit: cfg.execution.fuel_limit,
                max_memory_pages: cfg.execution.max_memory_pages,
                ..Default::default()
            },
        };
        let executor: Arc<dyn ExecutionAdapter> =
            Arc::new(WasmAdapter::new(adapter_cfg, store.clone())?);

        // 3. Mempool.
        let mempool = Arc::new(
            Mempool::new(
                MempoolConfig {
                    max_size: cfg.mempool.max_size,
                    max_tx_bytes: cfg.mempool.max_tx_bytes,
                    cache_size: cfg.mempool.cache_size,
                },
                Some(store.clone()),
            )
            .with_metrics(metrics.clone()),
        );

        // 4. Consensus engine.
        let mut engine_cfg = EngineConfig::new(signing_key, valset.clone());
        engine_cfg.chain_id = cfg.node.chain_id.as_bytes().to_vec();
        engine_cfg.store = Some(store.clone());
        engine_cfg.executor = Some(executor.clone());
        engine_cfg.tx_provider = Some(mempool.clone());
        engine_cfg.metrics = Some(metrics.clone());
        engine_cfg.wal = wal;
        engine_cfg.base_timeout_ms = cfg.consensus.base_timeout_ms;
        engine_cfg.max_timeout_ms = cfg.consensus.max_timeout_ms;
        engine_cfg.max_block_bytes = cfg.consensus.max_block_bytes;
        let engine = Arc::new(Engine::new(engine_cfg)?);

        // 5. Block syncer, when a peer provider is wired in.
        let syncer = provider.map(|p| {
            Arc::new(
                BlockSyncer::new(store.clone(), p, executor.clone(), valset.clone())
                    .with_metrics(metrics.clone()),
            )
        });

        // 6. Lifecycle ordering: the commit listener must be draining
        // before consensus can publish, observability comes up last.
        let mut services = ServiceManager::new();
        services.add(Box::new(CommitService {
            mempool: mempool.clone(),
            commits: engine.subscribe_commits(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }));
        services.add(Box::new(EngineService { engine: engine.clone() }));
        if cfg.observability.metrics_enabled {
            services.add(Box::new(MetricsService {
                config: MetricsConfig { listen_addr: cfg.observability.metrics_listen_addr.clone() },
                metrics: Some(metrics.clone()),
            }));
        }

        Ok(Self {
            store,
            mempool,
            engine,
            syncer,
            metrics,
            services,
            sync_cancel: CancelToken::new(),
        })
    }

    /// Bring the node up. When a syncer is configured it runs to
    /// CaughtUp first — consensus must not propose while behind.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if let Some(syncer) = &self.syncer {
            info!("running block sync before consensus start");
            syncer
                .run(&self.sync_cancel)
                .map_err(|e| anyhow::anyhow!("node: sync: {}", e))?;
        }

        self.services.start_all()?;
        info!("node started");
        Ok(())
    }

    /// Shut down in reverse start order. Not an error path.
    pub fn stop(&mut self) {
        info!("node stopping");
        self.sync_cancel.cancel();
        self.services.stop_all();
        if self.engine.is_halted() {
            warn!("engine halted on a durability failure before shutdown");
        }
        info!("node stopped");
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn mempool(&self) -> Arc<Mempool> {
        self.mempool.clone()
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    pub fn syncer(&self) -> Option<Arc<BlockSyncer>> {
        self.syncer.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// True when the node can no longer make progress safely.
    pub fn is_halted(&self) -> bool {
        self.engine.is_halted()
    }
}

struct EngineService {
    engine: Arc<Engine>,
}

impl Service for EngineService {
    fn name(&self) -> &str {
        "consensus"
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.engine.start()
    }

    fn stop(&mut self) {
        self.engine.stop();
    }
}

/// Applies commits to the mempool: transactions included in a finalized
/// block are removed and remembered in the eviction cache.
struct CommitService {
    mempool: Arc<Mempool>,
    commits: crossbeam_channel::Receiver<crate::consensus::CommitEvent>,
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Service for CommitService {
    fn name(&self) -> &str {
        "commit-listener"
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let mempool = self.mempool.clone();
        let commits = self.commits.clone();
        let stop = self.stop.clone();
        let handle = std::thread::Builder::new().name("commit-listener".into()).spawn(move || {
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                match commits.recv_timeout(std::time::Duration::from_millis(100)) {
                    Ok(event) => {
                        let hashes: Vec<crate::types::Hash> =
                            event.block.transactions.iter().map(|tx| sha256(tx)).collect();
                        if !hashes.is_empty() {
                            mempool.remove_txs(&hashes);
                        }
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct MetricsService {
    config: MetricsConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Service for MetricsService {
    fn name(&self) -> &str {
        "metrics"
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let metrics = match self.metrics.take() {
            Some(m) => m,
            None => return Ok(()),
        };
        let server = MetricsServer::new(self.config.clone(), metrics);
        std::thread::Builder::new().name("metrics".into()).spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "metrics runtime failed");
                    return;
                }
            };
            if let Err(e) = rt.block_on(server.run()) {
                warn!(error = %e, "metrics server error");
            }
        })?;
        Ok(())
    }

    fn stop(&mut self) {
        // Exporter thread lives until process exit; nothing to flush.
    }
}
