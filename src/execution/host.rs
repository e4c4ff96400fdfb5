//! Per-execution host state: the write overlay, resource limits, and the
//! bump allocator for guest-visible buffers. One `HostState` lives inside
//! the wasmtime `Store` for exactly one block execution and is discarded
//! with the instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::execution::gas::GasMeter;
use crate::execution::types::{ErrorCode, Event, ExecutionContext, LogLine, MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::execution::wire::encode_context;
use crate::storage::{Store, StoreError, WriteSet};

/// Resource limits for one execution, combining the request limits with
/// host-fixed key/value/log bounds.
#[derive(Clone, Debug)]
pub struct HostLimits {
    pub gas_limit: u64,
    pub max_events: u32,
    pub max_write_bytes: u32,
    pub max_key_len: usize,
    pub max_value_len: usize,
    pub max_log_lines: u32,
    pub max_log_line_len: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            gas_limit: 10_000_000,
            max_events: 1024,
            max_write_bytes: 4 * 1024 * 1024,
            max_key_len: MAX_KEY_LEN,
            max_value_len: MAX_VALUE_LEN,
            max_log_lines: 256,
            max_log_line_len: 1024,
        }
    }
}

/// Buffered writes for the current block. `None` is a delete tombstone:
/// visible to intra-block reads, dropped at the committed-store boundary.
// TODO: carry tombstones through Store::apply_write_set once the store
// surface grows a delete operation.
#[derive(Default)]
pub struct StateOverlay {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    write_bytes: u64,
}

pub enum OverlayResult {
    Found(Vec<u8>),
    Deleted,
    NotInOverlay,
}

impl StateOverlay {
    pub fn get(&self, key: &[u8]) -> OverlayResult {
        match self.entries.get(key) {
            Some(Some(v)) => OverlayResult::Found(v.clone()),
            Some(None) => OverlayResult::Deleted,
            None => OverlayResult::NotInOverlay,
        }
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.write_bytes = self
            .write_bytes
            .saturating_add(key.len() as u64)
            .saturating_add(value.len() as u64);
        self.entries.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.write_bytes = self.write_bytes.saturating_add(key.len() as u64);
        self.entries.insert(key, None);
    }

    pub fn total_write_bytes(&self) -> u64 {
        self.write_bytes
    }

    /// Snapshot the surviving writes (tombstones dropped).
    pub fn into_write_set(self) -> WriteSet {
        self.entries
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect()
    }
}

/// Host-side bump allocator over a reserved region of guest memory.
/// Buffers handed to the guest (state_get results, context) live here;
/// `host_free` is a no-op because the instance dies after the block.
#[derive(Clone, Debug)]
pub struct HostAllocator {
    base: usize,
    bump: usize,
    capacity: usize,
}

pub const HOST_ALLOC_PAGES: u64 = 16; // 1 MiB initial region
const WASM_PAGE: usize = 65536;

impl HostAllocator {
    pub fn new(base: usize, capacity: usize) -> Self {
        Self { base, bump: 0, capacity }
    }

    /// Plan an allocation. Returns (absolute ptr, new bump, new capacity,
    /// pages to grow). The caller grows guest memory first, then commits.
    pub fn compute_alloc(&self, len: usize) -> (usize, usize, usize, u64) {
        let aligned = (len + 7) & !7;
        let ptr = self.base + self.bump;
        let new_bump = self.bump + aligned;
        if new_bump <= self.capacity {
            return (ptr, new_bump, self.capacity, 0);
        }
        let shortfall = new_bump - self.capacity;
        let grow_pages = shortfall.div_ceil(WASM_PAGE) as u64;
        let new_capacity = self.capacity + grow_pages as usize * WASM_PAGE;
        (ptr, new_bump, new_capacity, grow_pages)
    }

    pub fn commit(&mut self, new_bump: usize, new_capacity: usize) {
        self.bump = new_bump;
        self.capacity = new_capacity;
    }
}

/// Everything the host functions can touch during one execution.
pub struct HostState {
    pub gas_meter: GasMeter,
    pub overlay: StateOverlay,
    pub committed: Arc<dyn Store>,
    pub context: ExecutionContext,
    pub encoded_context: Vec<u8>,
    pub limits: HostLimits,
    pub events: Vec<Event>,
    pub logs: Vec<LogLine>,
    pub event_count: u32,
    pub host_alloc: HostAllocator,
}

impl HostState {
    pub fn new(committed: Arc<dyn Store>, context: ExecutionContext, limits: HostLimits) -> Self {
        let gas_meter = GasMeter::new(limits.gas_limit);
        let encoded_context = encode_context(&context);
        Self {
            gas_meter,
            overlay: StateOverlay::default(),
            committed,
            context,
            encoded_context,
            limits,
            events: Vec::new(),
            logs: Vec::new(),
            event_count: 0,
            host_alloc: HostAllocator::new(0, 0),
        }
    }

    /// Read-your-writes: overlay first, committed state second.
    pub fn state_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ErrorCode> {
        match self.overlay.get(key) {
            OverlayResult::Found(v) => Ok(Some(v)),
            OverlayResult::Deleted => Ok(None),
            OverlayResult::NotInOverlay => {
                self.committed.get(key).map_err(|_: StoreError| ErrorCode::Internal)
            }
        }
    }

    pub fn state_set(&mut self, key: &[u8], value: &[u8]) -> Result<(), ErrorCode> {
        if key.is_empty() || key.len() > self.limits.max_key_len {
            return Err(ErrorCode::KeyTooLarge);
        }
        if value.len() > self.limits.max_value_len {
            return Err(ErrorCode::ValueTooLarge);
        }
        self.overlay.set(key.to_vec(), value.to_vec());
        if self.overlay.total_write_bytes() > self.limits.max_write_bytes as u64 {
            return Err(ErrorCode::WriteLimit);
        }
        Ok(())
    }

    pub fn state_delete(&mut self, key: &[u8]) -> Result<(), ErrorCode> {
        if key.is_empty() || key.len() > self.limits.max_key_len {
            return Err(ErrorCode::KeyTooLarge);
        }
        self.overlay.delete(key.to_vec());
        Ok(())
    }

    pub fn add_event(&mut self, event: Event) -> Result<(), ErrorCode> {
        self.event_count += 1;
        if self.event_count > self.limits.max_events {
            return Err(ErrorCode::EventLimit);
        }
        self.events.push(event);
        Ok(())
    }

    /// Best-effort log capture, bounded so a hostile guest cannot balloon
    /// host memory. Never consensus-critical.
    pub fn add_log(&mut self, level: u32, message: String) {
        if self.logs.len() as u32 >= self.limits.max_log_lines {
            return;
        }
        let mut message = message;
        message.truncate(self.limits.max_log_line_len);
        self.logs.push(LogLine { level, message });
    }
}
