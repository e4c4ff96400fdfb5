//! Deterministic WASM sandbox around wasmtime.
//!
//! Each block execution gets a fresh instance with instruction fuel, a
//! memory cap, and no ambient authority: the guest sees exactly the
//! `bedrock_host` functions and nothing else. Lifecycle per execution:
//! instantiate, `bedrock_init`, `bedrock_execute_block`, read the
//! response, `bedrock_free`, discard the instance.

use std::path::Path;
use std::sync::Arc;

use wasmtime::{Caller, Config, Engine, Linker, Memory, Module, Store as WasmStore, Trap};

use crate::execution::gas::{
    gas_cost_emit_event, gas_cost_hash_blake3, gas_cost_log, gas_cost_state_delete,
    gas_cost_state_get, gas_cost_state_set, G_GAS_REMAINING, G_GET_CONTEXT, G_HOST_FREE,
    G_VERIFY_BLS_AGG, G_VERIFY_ED25519,
};
use crate::execution::host::{HostAllocator, HostLimits, HostState, HOST_ALLOC_PAGES};
use crate::execution::types::{
    ErrorCode, ExecutionContext, ExecutionRequest, ExecutionResponse, API_VERSION,
};
use crate::execution::validation::{validate_artifact, ValidationError, ValidationLimits};
use crate::execution::wire::{decode_response, decode_single_event, encode_request};
use crate::storage::{Store, WriteSet};

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub fuel_limit: u64,
    pub max_memory_pages: u32,
    pub validation: ValidationLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            fuel_limit: 100_000_000,
            max_memory_pages: 4096,
            validation: ValidationLimits::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("invalid artifact: {0}")]
    Validation(#[from] ValidationError),
    #[error("wasm error: {0}")]
    Wasm(String),
    #[error("guest memory error: {0}")]
    Memory(String),
    #[error("bedrock_init failed with code {0}")]
    InitFailed(i32),
    #[error("bedrock_execute_block failed with code {0}")]
    ExecutionFailed(i32),
    #[error("instruction fuel exhausted")]
    OutOfFuel,
    #[error("guest trapped: {0}")]
    GuestTrap(String),
    #[error("bad response: {0}")]
    Response(String),
}

impl From<wasmtime::Error> for SandboxError {
    fn from(e: wasmtime::Error) -> Self {
        SandboxError::Wasm(e.to_string())
    }
}

/// A loaded, validated execution artifact ready to run blocks.
pub struct Sandbox {
    engine: Engine,
    module: Module,
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(wasm_bytes: &[u8], config: SandboxConfig) -> Result<Self, SandboxError> {
        validate_artifact(wasm_bytes, &config.validation)?;
        let engine = deterministic_engine()?;
        let module = Module::new(&engine, wasm_bytes)?;
        Ok(Self { engine, module, config })
    }

    pub fn from_file(path: &Path, config: SandboxConfig) -> Result<Self, SandboxError> {
        let bytes = std::fs::read(path).map_err(|e| SandboxError::Memory(e.to_string()))?;
        Self::new(&bytes, config)
    }

    /// Run one block. Returns the guest's response plus the surviving
    /// write set; the caller decides whether to commit either.
    pub fn execute(
        &self,
        request: &ExecutionRequest,
        committed: Arc<dyn Store>,
    ) -> Result<(ExecutionResponse, WriteSet), SandboxError> {
        let req_bytes = encode_request(request);
        let context = ExecutionContext::from_request(request);
        let limits = HostLimits {
            gas_limit: request.limits.gas_limit,
            max_events: request.limits.max_events,
            max_write_bytes: request.limits.max_write_bytes,
            ..Default::default()
        };

        let mut store = WasmStore::new(&self.engine, HostState::new(committed, context, limits));
        store.set_fuel(self.config.fuel_limit)?;

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;

        let instance = linker.instantiate(&mut store, &self.module)?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| SandboxError::Memory("no memory export".into()))?;

        // Reserve a host-owned region above the guest's initial memory for
        // buffers handed back through state_get/get_context.
        let current_pages = memory.size(&store);
        memory
            .grow(&mut store, HOST_ALLOC_PAGES)
            .map_err(|e| SandboxError::Memory(format!("initial grow: {}", e)))?;
        let alloc_base = current_pages as usize * 65536;
        let alloc_capacity = HOST_ALLOC_PAGES as usize * 65536;
        store.data_mut().host_alloc = HostAllocator::new(alloc_base, alloc_capacity);

        // bedrock_init(version_ptr, version_len) -> i32
        let version_ptr = host_write(&memory, &mut store, &API_VERSION.to_le_bytes())?;
        let init_fn = instance.get_typed_func::<(i32, i32), i32>(&mut store, "bedrock_init")?;
        let init_result = map_trap(init_fn.call(&mut store, (version_ptr, 4)))?;
        if init_result != 0 {
            return Err(SandboxError::InitFailed(init_result));
        }

        // bedrock_execute_block(req_ptr, req_len, resp_ptr_ptr, resp_len_ptr) -> i32
        let req_ptr = host_write(&memory, &mut store, &req_bytes)?;
        let resp_slots = host_write(&memory, &mut store, &[0u8; 8])?;
        let (resp_ptr_ptr, resp_len_ptr) = (resp_slots, resp_slots + 4);

        let exec_fn = instance
            .get_typed_func::<(i32, i32, i32, i32), i32>(&mut store, "bedrock_execute_block")?;
        let exec_result = map_trap(exec_fn.call(
            &mut store,
            (req_ptr, req_bytes.len() as i32, resp_ptr_ptr, resp_len_ptr),
        ))?;
        if exec_result != 0 {
            return Err(SandboxError::ExecutionFailed(exec_result));
        }

        let (resp_ptr, resp_len) = {
            let data = memory.data(&store);
            let rp = read_i32(data, resp_ptr_ptr)
                .map_err(|_| SandboxError::Memory("read resp ptr".into()))?;
            let rl = read_i32(data, resp_len_ptr)
                .map_err(|_| SandboxError::Memory("read resp len".into()))?;
            (rp, rl)
        };
        let resp_bytes = {
            let data = memory.data(&store);
            read_bytes(data, resp_ptr, resp_len)
                .map_err(|_| SandboxError::Memory("read response".into()))?
        };

        // bedrock_free(ptr, len): release the guest's response buffer.
        let free_fn = instance.get_typed_func::<(i32, i32), ()>(&mut store, "bedrock_free")?;
        let _ = map_trap(free_fn.call(&mut store, (resp_ptr, resp_len)));

        let response =
            decode_response(&resp_bytes).map_err(|e| SandboxError::Response(e.to_string()))?;

        let host_state = store.into_data();
        Ok((response, host_state.overlay.into_write_set()))
    }
}

fn deterministic_engine() -> Result<Engine, SandboxError> {
    let mut cfg = Config::new();
    cfg.consume_fuel(true);
    cfg.wasm_threads(false);
    cfg.wasm_simd(false);
    cfg.wasm_relaxed_simd(false);
    cfg.wasm_multi_memory(false);
    cfg.cranelift_nan_canonicalization(true);
    Ok(Engine::new(&cfg)?)
}

fn map_trap<T>(result: Result<T, wasmtime::Error>) -> Result<T, SandboxError> {
    result.map_err(|e| {
        if let Some(trap) = e.downcast_ref::<Trap>() {
            if *trap == Trap::OutOfFuel {
                return SandboxError::OutOfFuel;
            }
        }
        SandboxError::GuestTrap(e.to_string())
    })
}

// ---- guest memory helpers ----

fn validate_range(mem_len: usize, ptr: i32, len: i32) -> Result<(usize, usize), ()> {
    if ptr < 0 || len < 0 {
        return Err(());
    }
    let (ptr, len) = (ptr as usize, len as usize);
    if ptr.checked_add(len).map(|end| end <= mem_len) != Some(true) {
        return Err(());
    }
    Ok((ptr, len))
}

fn read_bytes(data: &[u8], ptr: i32, len: i32) -> Result<Vec<u8>, ()> {
    let (ptr, len) = validate_range(data.len(), ptr, len)?;
    Ok(data[ptr..ptr + len].to_vec())
}

fn read_i32(data: &[u8], ptr: i32) -> Result<i32, ()> {
    let (ptr, _) = validate_range(data.len(), ptr, 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[ptr..ptr + 4]);
    Ok(i32::from_le_bytes(buf))
}

fn write_i32(data: &mut [u8], ptr: i32, v: i32) -> Result<(), ()> {
    let (ptr, _) = validate_range(data.len(), ptr, 4)?;
    data[ptr..ptr + 4].copy_from_slice(&v.to_le_bytes());
    Ok(())
}

fn write_bytes(data: &mut [u8], ptr: i32, bytes: &[u8]) -> Result<(), ()> {
    let (ptr, len) = validate_range(data.len(), ptr, bytes.len() as i32)?;
    data[ptr..ptr + len].copy_from_slice(bytes);
    Ok(())
}

fn get_memory(caller: &mut Caller<'_, HostState>) -> Option<Memory> {
    caller.get_export("memory").and_then(|e| e.into_memory())
}

/// Allocate `bytes` in the host region of guest memory and return the
/// guest pointer. Grows memory if the bump region is exhausted.
fn host_alloc_write(
    memory: &Memory,
    caller: &mut Caller<'_, HostState>,
    bytes: &[u8],
) -> Result<i32, ErrorCode> {
    let (ptr, new_bump, new_cap, grow_pages) = caller.data().host_alloc.compute_alloc(bytes.len());
    if grow_pages > 0 && memory.grow(&mut *caller, grow_pages).is_err() {
        return Err(ErrorCode::Internal);
    }
    {
        let data = memory.data_mut(&mut *caller);
        if ptr + bytes.len() > data.len() {
            return Err(ErrorCode::Internal);
        }
        data[ptr..ptr + bytes.len()].copy_from_slice(bytes);
    }
    caller.data_mut().host_alloc.commit(new_bump, new_cap);
    Ok(ptr as i32)
}

fn host_write(
    memory: &Memory,
    store: &mut WasmStore<HostState>,
    bytes: &[u8],
) -> Result<i32, SandboxError> {
    let (ptr, new_bump, new_cap, grow_pages) = store.data().host_alloc.compute_alloc(bytes.len());
    if grow_pages > 0 {
        memory
            .grow(&mut *store, grow_pages)
            .map_err(|e| SandboxError::Memory(e.to_string()))?;
    }
    {
        let data = memory.data_mut(&mut *store);
        if ptr + bytes.len() > data.len() {
            return Err(SandboxError::Memory("alloc past end of memory".into()));
        }
        data[ptr..ptr + bytes.len()].copy_from_slice(bytes);
    }
    store.data_mut().host_alloc.commit(new_bump, new_cap);
    Ok(ptr as i32)
}

// ---- host functions ----

/// Register the `bedrock_host` functions. Every function charges gas via
/// the host meter, validates pointers against linear memory, and returns
/// an i32 error code (0 = OK).
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), SandboxError> {
    linker.func_wrap(
        "bedrock_host",
        "state_get",
        |mut caller: Caller<'_, HostState>,
         key_ptr: i32,
         key_len: i32,
         out_ptr_ptr: i32,
         out_len_ptr: i32|
         -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let key = {
                let data = memory.data(&caller);
                if validate_range(data.len(), out_ptr_ptr, 4).is_err()
                    || validate_range(data.len(), out_len_ptr, 4).is_err()
                {
                    return ErrorCode::BadPointer.as_i32();
                }
                match read_bytes(data, key_ptr, key_len) {
                    Ok(k) => k,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                }
            };

            if let Err(code) = caller.data_mut().gas_meter.charge(gas_cost_state_get(key.len())) {
                return code.as_i32();
            }

            let value = match caller.data().state_get(&key) {
                Ok(v) => v,
                Err(code) => return code.as_i32(),
            };

            match value {
                Some(val) => {
                    let ptr = match host_alloc_write(&memory, &mut caller, &val) {
                        Ok(p) => p,
                        Err(code) => return code.as_i32(),
                    };
                    let data = memory.data_mut(&mut caller);
                    if write_i32(data, out_ptr_ptr, ptr).is_err()
                        || write_i32(data, out_len_ptr, val.len() as i32).is_err()
                    {
                        return ErrorCode::BadPointer.as_i32();
                    }
                }
                None => {
                    let data = memory.data_mut(&mut caller);
                    if write_i32(data, out_ptr_ptr, 0).is_err()
                        || write_i32(data, out_len_ptr, 0).is_err()
                    {
                        return ErrorCode::BadPointer.as_i32();
                    }
                }
            }

            ErrorCode::Ok.as_i32()
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "state_set",
        |mut caller: Caller<'_, HostState>,
         key_ptr: i32,
         key_len: i32,
         val_ptr: i32,
         val_len: i32|
         -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let (key, value) = {
                let data = memory.data(&caller);
                let key = match read_bytes(data, key_ptr, key_len) {
                    Ok(k) => k,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                };
                let value = match read_bytes(data, val_ptr, val_len) {
                    Ok(v) => v,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                };
                (key, value)
            };

            if let Err(code) = caller
                .data_mut()
                .gas_meter
                .charge(gas_cost_state_set(key.len(), value.len()))
            {
                return code.as_i32();
            }

            match caller.data_mut().state_set(&key, &value) {
                Ok(()) => ErrorCode::Ok.as_i32(),
                Err(code) => code.as_i32(),
            }
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "state_delete",
        |mut caller: Caller<'_, HostState>, key_ptr: i32, key_len: i32| -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let key = {
                let data = memory.data(&caller);
                match read_bytes(data, key_ptr, key_len) {
                    Ok(k) => k,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                }
            };

            if let Err(code) =
                caller.data_mut().gas_meter.charge(gas_cost_state_delete(key.len()))
            {
                return code.as_i32();
            }

            match caller.data_mut().state_delete(&key) {
                Ok(()) => ErrorCode::Ok.as_i32(),
                Err(code) => code.as_i32(),
            }
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "emit_event",
        |mut caller: Caller<'_, HostState>, evt_ptr: i32, evt_len: i32| -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let evt_bytes = {
                let data = memory.data(&caller);
                match read_bytes(data, evt_ptr, evt_len) {
                    Ok(b) => b,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                }
            };

            if let Err(code) =
                caller.data_mut().gas_meter.charge(gas_cost_emit_event(evt_bytes.len()))
            {
                return code.as_i32();
            }

            let event = match decode_single_event(&evt_bytes) {
                Ok(e) => e,
                Err(_) => return ErrorCode::InvalidEncoding.as_i32(),
            };

            match caller.data_mut().add_event(event) {
                Ok(()) => ErrorCode::Ok.as_i32(),
                Err(code) => code.as_i32(),
            }
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "log",
        |mut caller: Caller<'_, HostState>, level: i32, msg_ptr: i32, msg_len: i32| -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let msg_bytes = {
                let data = memory.data(&caller);
                match read_bytes(data, msg_ptr, msg_len) {
                    Ok(b) => b,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                }
            };

            if let Err(code) = caller.data_mut().gas_meter.charge(gas_cost_log(msg_bytes.len())) {
                return code.as_i32();
            }

            let message = match std::str::from_utf8(&msg_bytes) {
                Ok(s) => s.to_string(),
                Err(_) => return ErrorCode::InvalidEncoding.as_i32(),
            };

            caller.data_mut().add_log(level as u32, message);
            ErrorCode::Ok.as_i32()
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "hash_blake3",
        |mut caller: Caller<'_, HostState>,
         in_ptr: i32,
         in_len: i32,
         out_ptr: i32,
         out_len: i32|
         -> i32 {
            if out_len != 32 {
                return ErrorCode::BadPointer.as_i32();
            }
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let input = {
                let data = memory.data(&caller);
                if validate_range(data.len(), out_ptr, 32).is_err() {
                    return ErrorCode::BadPointer.as_i32();
                }
                match read_bytes(data, in_ptr, in_len) {
                    Ok(b) => b,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                }
            };

            if let Err(code) =
                caller.data_mut().gas_meter.charge(gas_cost_hash_blake3(input.len()))
            {
                return code.as_i32();
            }

            let digest = blake3::hash(&input);
            let data = memory.data_mut(&mut caller);
            if write_bytes(data, out_ptr, digest.as_bytes()).is_err() {
                return ErrorCode::BadPointer.as_i32();
            }
            ErrorCode::Ok.as_i32()
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "verify_ed25519",
        |mut caller: Caller<'_, HostState>,
         msg_ptr: i32,
         msg_len: i32,
         sig_ptr: i32,
         sig_len: i32,
         pk_ptr: i32,
         pk_len: i32|
         -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            let (msg, sig_bytes, pk_bytes) = {
                let data = memory.data(&caller);
                let msg = match read_bytes(data, msg_ptr, msg_len) {
                    Ok(b) => b,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                };
                let sig = match read_bytes(data, sig_ptr, sig_len) {
                    Ok(b) => b,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                };
                let pk = match read_bytes(data, pk_ptr, pk_len) {
                    Ok(b) => b,
                    Err(_) => return ErrorCode::BadPointer.as_i32(),
                };
                (msg, sig, pk)
            };

            if sig_bytes.len() != 64 || pk_bytes.len() != 32 {
                return ErrorCode::BadPointer.as_i32();
            }

            if let Err(code) = caller.data_mut().gas_meter.charge(G_VERIFY_ED25519) {
                return code.as_i32();
            }

            let mut pk = [0u8; 32];
            pk.copy_from_slice(&pk_bytes);
            let mut sig = [0u8; 64];
            sig.copy_from_slice(&sig_bytes);

            let vk = match ed25519_dalek::VerifyingKey::from_bytes(&pk) {
                Ok(k) => k,
                Err(_) => return ErrorCode::CryptoFailed.as_i32(),
            };
            let signature = ed25519_dalek::Signature::from_bytes(&sig);
            match vk.verify_strict(&msg, &signature) {
                Ok(()) => ErrorCode::Ok.as_i32(),
                Err(_) => ErrorCode::SigInvalid.as_i32(),
            }
        },
    )?;

    // Reserved at ApiVersion 1: the aggregation path arrives with a
    // version bump, until then the call is metered and rejected.
    linker.func_wrap(
        "bedrock_host",
        "verify_bls_agg",
        |mut caller: Caller<'_, HostState>,
         _msg_ptr: i32,
         _msg_len: i32,
         _sig_ptr: i32,
         _sig_len: i32,
         _pks_ptr: i32,
         _pks_len: i32|
         -> i32 {
            if let Err(code) = caller.data_mut().gas_meter.charge(G_VERIFY_BLS_AGG) {
                return code.as_i32();
            }
            ErrorCode::CryptoFailed.as_i32()
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "gas_remaining",
        |mut caller: Caller<'_, HostState>, out_ptr: i32| -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            {
                let data = memory.data(&caller);
                if validate_range(data.len(), out_ptr, 8).is_err() {
                    return ErrorCode::BadPointer.as_i32();
                }
            }

            if let Err(code) = caller.data_mut().gas_meter.charge(G_GAS_REMAINING) {
                return code.as_i32();
            }

            let remaining = caller.data().gas_meter.remaining();
            let data = memory.data_mut(&mut caller);
            if write_bytes(data, out_ptr, &remaining.to_le_bytes()).is_err() {
                return ErrorCode::BadPointer.as_i32();
            }
            ErrorCode::Ok.as_i32()
        },
    )?;

    // Guest buffers live in the bump region and die with the instance.
    linker.func_wrap(
        "bedrock_host",
        "host_free",
        |mut caller: Caller<'_, HostState>, _ptr: i32, _len: i32| -> i32 {
            if let Err(code) = caller.data_mut().gas_meter.charge(G_HOST_FREE) {
                return code.as_i32();
            }
            ErrorCode::Ok.as_i32()
        },
    )?;

    linker.func_wrap(
        "bedrock_host",
        "get_context",
        |mut caller: Caller<'_, HostState>, out_ptr_ptr: i32, out_len_ptr: i32| -> i32 {
            let memory = match get_memory(&mut caller) {
                Some(m) => m,
                None => return ErrorCode::Internal.as_i32(),
            };

            {
                let data = memory.data(&caller);
                if validate_range(data.len(), out_ptr_ptr, 4).is_err()
                    || validate_range(data.len(), out_len_ptr, 4).is_err()
                {
                    return ErrorCode::BadPointer.as_i32();
                }
            }

            if let Err(code) = caller.data_mut().gas_meter.charge(G_GET_CONTEXT) {
                return code.as_i32();
            }

            let ctx_bytes = caller.data().encoded_context.clone();
            let ptr = match host_alloc_write(&memory, &mut caller, &ctx_bytes) {
                Ok(p) => p,
                Err(code) => return code.as_i32(),
            };
            let data = memory.data_mut(&mut caller);
            if write_i32(data, out_ptr_ptr, ptr).is_err()
                || write_i32(data, out_len_ptr, ctx_bytes.len() as i32).is_err()
            {
                return ErrorCode::BadPointer.as_i32();
            }
            ErrorCode::Ok.as_i32()
        },
    )?;

    Ok(())
}
