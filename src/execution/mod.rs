//! Deterministic execution boundary: the adapter consensus calls to turn
//! a proposed block into a state root, backed by either the WASM sandbox
//! or the native fallback executor.

pub mod gas;
pub mod host;
pub mod native;
pub mod sandbox;
pub mod types;
pub mod validation;
pub mod wire;

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::consensus::{ExecutionAdapter, ExecutionResult};
use crate::crypto::hash::sha256;
use crate::storage::{Store, WriteSet};
use crate::types::{Block, Hash};

pub use native::NativeExecutor;
pub use sandbox::{Sandbox, SandboxConfig, SandboxError};
pub use types::{
    ErrorCode, ExecutionLimits, ExecutionRequest, ExecutionResponse, ExecutionStatus, API_VERSION,
};

#[derive(Clone, Debug)]
pub struct AdapterConfig {
    /// Path to the WASM artifact; native fallback when absent or missing.
    pub wasm_path: Option<std::path::PathBuf>,
    pub limits: ExecutionLimits,
    pub sandbox: SandboxConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            wasm_path: None,
            limits: ExecutionLimits::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

enum Backend {
    Sandbox(Sandbox),
    Native(NativeExecutor),
}

/// `ExecutionAdapter` implementation over the sandbox or native backend.
///
/// On a successful execution the buffered writes are committed to the
/// state layer and the state-root cursor advances; on any failure the
/// writes are discarded.
pub struct WasmAdapter {
    backend: Backend,
    limits: ExecutionLimits,
    store: Arc<dyn Store>,
}

impl WasmAdapter {
    pub fn new(cfg: AdapterConfig, store: Arc<dyn Store>) -> Result<Self, SandboxError> {
        let backend = match &cfg.wasm_path {
            Some(path) if path.exists() => {
                Backend::Sandbox(Sandbox::from_file(path, cfg.sandbox.clone())?)
            }
            _ => Backend::Native(NativeExecutor::new()),
        };
        Ok(Self { backend, limits: cfg.limits, store })
    }

    /// Native-only adapter, the default for nodes without an artifact.
    pub fn native(limits: ExecutionLimits, store: Arc<dyn Store>) -> Self {
        Self { backend: Backend::Native(NativeExecutor::new()), limits, store }
    }

    fn build_request(&self, block: &Block, prev_state_root: Hash) -> ExecutionRequest {
        let block_hash = block.hash();
        ExecutionRequest {
            api_version: API_VERSION,
            chain_id: block.header.chain_id.clone(),
            block_height: block.header.height,
            block_time: block.header.block_time,
            block_hash,
            prev_state_root,
            transactions: block.transactions.clone(),
            limits: self.limits.clone(),
            // Derived from the header alone so every validator seeds alike.
            execution_seed: Some(Hash(sha256(&block_hash.0).0)),
        }
    }

    fn validate_response(
        &self,
        resp: &ExecutionResponse,
        tx_count: usize,
    ) -> anyhow::Result<()> {
        if resp.api_version != API_VERSION {
            anyhow::bail!("unrecognized api_version {}", resp.api_version);
        }
        if resp.gas_used > self.limits.gas_limit {
            anyhow::bail!(
                "gas_used {} exceeds limit {}",
                resp.gas_used,
                self.limits.gas_limit
            );
        }
        if resp.receipts.len() > tx_count {
            anyhow::bail!("{} receipts for {} transactions", resp.receipts.len(), tx_count);
        }
        if resp.events.len() > self.limits.max_events as usize {
            anyhow::bail!("{} events exceed limit {}", resp.events.len(), self.limits.max_events);
        }
        Ok(())
    }
}

impl ExecutionAdapter for WasmAdapter {
    fn execute_block(&self, block: &Block, prev_state_root: Hash) -> anyhow::Result<ExecutionResult> {
        let request = self.build_request(block, prev_state_root);

        debug!(
            height = request.block_height,
            tx_count = request.transactions.len(),
            "executing block"
        );

        let (response, writes): (ExecutionResponse, WriteSet) = match &self.backend {
            Backend::Sandbox(sb) => sb.execute(&request, self.store.clone())?,
            Backend::Native(native) => native.execute(&request),
        };

        self.validate_response(&response, request.transactions.len())?;

        if !response.status.is_ok() {
            anyhow::bail!("execution failed at height {}: {}", request.block_height, response.status);
        }

        self.store.apply_write_set(&writes)?;
        self.store.set_state_root(response.new_state_root)?;

        debug!(
            height = request.block_height,
            gas_used = response.gas_used,
            state_root = %response.new_state_root,
            "block executed"
        );

        Ok(ExecutionResult {
            state_root: response.new_state_root,
            gas_used: response.gas_used,
        })
    }
}

/// Configurable executor double for engine and sync tests.
pub struct MockExecutor {
    pub next_state_root: Hash,
    pub next_gas_used: u64,
    pub should_fail: bool,
    calls: Mutex<MockCalls>,
}

#[derive(Default, Clone)]
pub struct MockCalls {
    pub count: usize,
    pub last_prev_root: Hash,
    pub last_height: u64,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            next_state_root: Hash::ZERO,
            next_gas_used: 0,
            should_fail: false,
            calls: Mutex::new(MockCalls::default()),
        }
    }

    pub fn returning(state_root: Hash) -> Self {
        Self { next_state_root: state_root, ..Self::new() }
    }

    pub fn failing() -> Self {
        Self { should_fail: true, ..Self::new() }
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionAdapter for MockExecutor {
    fn execute_block(&self, block: &Block, prev_state_root: Hash) -> anyhow::Result<ExecutionResult> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.count += 1;
            calls.last_prev_root = prev_state_root;
            calls.last_height = block.header.height;
        }
        if self.should_fail {
            anyhow::bail!("mock execution failed");
        }
        Ok(ExecutionResult { state_root: self.next_state_root, gas_used: self.next_gas_used })
    }
}
