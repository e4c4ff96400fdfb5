//! Node configuration: TOML file with per-field defaults, overridden by
//! `BEDROCK_<SECTION>_<FIELD>` environment variables. Defaults cover a
//! missing file entirely.

pub mod genesis;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use genesis::{ConsensusParams, GenesisDoc, GenesisValidator};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
    #[serde(default)]
    pub mempool: MempoolSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub observability: ObservabilitySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_moniker")]
    pub moniker: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusSection {
    #[serde(default = "default_base_timeout_ms")]
    pub base_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_max_block_bytes")]
    pub max_block_bytes: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MempoolSection {
    #[serde(default = "default_mempool_max_size")]
    pub max_size: usize,
    #[serde(default = "default_max_tx_bytes")]
    pub max_tx_bytes: usize,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub wasm_path: Option<String>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_fuel_limit")]
    pub fuel_limit: u64,
    #[serde(default = "default_max_memory_pages")]
    pub max_memory_pages: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservabilitySection {
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub metrics_listen_addr: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub module_levels: Option<String>,
}

fn default_moniker() -> String { "bedrock-node".to_string() }
fn default_chain_id() -> String { "bedrock-devnet".to_string() }
fn default_data_dir() -> String { "data".to_string() }
fn default_base_timeout_ms() -> u64 { 3000 }
fn default_max_timeout_ms() -> u64 { 60_000 }
fn default_max_block_bytes() -> usize { 1 << 20 }
fn default_mempool_max_size() -> usize { 10_000 }
fn default_max_tx_bytes() -> usize { 1024 * 1024 }
fn default_cache_size() -> usize { 10_000 }
fn default_backend() -> String { "rocksdb".to_string() }
fn default_db_path() -> String { "data/blockstore".to_string() }
fn default_gas_limit() -> u64 { 100_000_000 }
fn default_fuel_limit() -> u64 { 100_000_000 }
fn default_max_memory_pages() -> u32 { 4096 }
fn default_metrics_listen() -> String { "0.0.0.0:26660".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            moniker: default_moniker(),
            chain_id: default_chain_id(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            base_timeout_ms: default_base_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            max_block_bytes: default_max_block_bytes(),
        }
    }
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self {
            max_size: default_mempool_max_size(),
            max_tx_bytes: default_max_tx_bytes(),
            cache_size: default_cache_size(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self { backend: default_backend(), db_path: default_db_path() }
    }
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            wasm_path: None,
            gas_limit: default_gas_limit(),
            fuel_limit: default_fuel_limit(),
            max_memory_pages: default_max_memory_pages(),
        }
    }
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self { metrics_enabled: false, metrics_listen_addr: default_metrics_listen() }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { format: default_log_format(), level: default_log_level(), module_levels: None }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: NodeConfig = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// File if present, defaults otherwise; env overrides win either way.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(_) => {
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `BEDROCK_<SECTION>_<FIELD>` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }
        fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            env(name).and_then(|v| v.parse().ok())
        }

        if let Some(v) = env("BEDROCK_NODE_MONIKER") {
            self.node.moniker = v;
        }
        if let Some(v) = env("BEDROCK_NODE_CHAIN_ID") {
            self.node.chain_id = v;
        }
        if let Some(v) = env("BEDROCK_NODE_DATA_DIR") {
            self.node.data_dir = v;
        }
        if let Some(v) = env_parse("BEDROCK_CONSENSUS_BASE_TIMEOUT_MS") {
            self.consensus.base_timeout_ms = v;
        }
        if let Some(v) = env_parse("BEDROCK_CONSENSUS_MAX_TIMEOUT_MS") {
            self.consensus.max_timeout_ms = v;
        }
        if let Some(v) = env_parse("BEDROCK_CONSENSUS_MAX_BLOCK_BYTES") {
            self.consensus.max_block_bytes = v;
        }
        if let Some(v) = env_parse("BEDROCK_MEMPOOL_MAX_SIZE") {
            self.mempool.max_size = v;
        }
        if let Some(v) = env_parse("BEDROCK_MEMPOOL_MAX_TX_BYTES") {
            self.mempool.max_tx_bytes = v;
        }
        if let Some(v) = env_parse("BEDROCK_MEMPOOL_CACHE_SIZE") {
            self.mempool.cache_size = v;
        }
        if let Some(v) = env("BEDROCK_STORAGE_BACKEND") {
            self.storage.backend = v;
        }
        if let Some(v) = env("BEDROCK_STORAGE_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Some(v) = env("BEDROCK_EXECUTION_WASM_PATH") {
            self.execution.wasm_path = Some(v);
        }
        if let Some(v) = env_parse("BEDROCK_EXECUTION_GAS_LIMIT") {
            self.execution.gas_limit = v;
        }
        if let Some(v) = env_parse("BEDROCK_EXECUTION_FUEL_LIMIT") {
            self.execution.fuel_limit = v;
        }
        if let Some(v) = env_parse("BEDROCK_EXECUTION_MAX_MEMORY_PAGES") {
            self.execution.max_memory_pages = v;
        }
        if let Some(v) = env_parse("BEDROCK_OBSERVABILITY_METRICS_ENABLED") {
            self.observability.metrics_enabled = v;
        }
        if let Some(v) = env("BEDROCK_OBSERVABILITY_METRICS_LISTEN_ADDR") {
            self.observability.metrics_listen_addr = v;
        }
        if let Some(v) = env("BEDROCK_LOGGING_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = env("BEDROCK_LOGGING_LEVEL") {
            self.logging.level = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node.moniker.is_empty() {
            anyhow::bail!("config: node.moniker must not be empty");
        }
        if self.node.chain_id.is_empty() {
            anyhow::bail!("config: node.chain_id must not be empty");
        }
        if self.consensus.base_timeout_ms == 0 {
            anyhow::bail!("config: consensus.base_timeout_ms must be > 0");
        }
        if self.consensus.max_block_bytes == 0 {
            anyhow::bail!("config: consensus.max_block_bytes must be > 0");
        }
        match self.storage.backend.as_str() {
            "rocksdb" | "memory" => {}
            other => anyhow::bail!("config: storage.backend must be 'rocksdb' or 'memory', got {:?}", other),
        }
        if self.storage.db_path.is_empty() {
            anyhow::bail!("config: storage.db_path must not be empty");
        }
        Ok(())
    }
}
