//! Execution boundary types: the request/response pair crossing into the
//! sandbox, resource limits, and the guest-visible error codes.

use std::fmt;

use crate::types::Hash;

/// Current execution ABI version. Monotone; a bump gates incompatible
/// host-call or wire changes (e.g. the BLS aggregation path).
pub const API_VERSION: u32 = 1;

/// Maximum state key length accepted by the host.
pub const MAX_KEY_LEN: usize = 1024;
/// Maximum state value length accepted by the host.
pub const MAX_VALUE_LEN: usize = 256 * 1024;

/// Guest-visible error codes. Values are part of the ABI and must not be
/// renumbered.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Ok = 0,
    BadPointer = 1,
    InvalidEncoding = 2,
    KeyTooLarge = 3,
    ValueTooLarge = 4,
    WriteLimit = 5,
    EventLimit = 6,
    OutOfGas = 7,
    SigInvalid = 8,
    CryptoFailed = 9,
    Internal = 10,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::BadPointer => "ERR_BAD_POINTER",
            ErrorCode::InvalidEncoding => "ERR_INVALID_ENCODING",
            ErrorCode::KeyTooLarge => "ERR_KEY_TOO_LARGE",
            ErrorCode::ValueTooLarge => "ERR_VALUE_TOO_LARGE",
            ErrorCode::WriteLimit => "ERR_WRITE_LIMIT",
            ErrorCode::EventLimit => "ERR_EVENT_LIMIT",
            ErrorCode::OutOfGas => "ERR_OUT_OF_GAS",
            ErrorCode::SigInvalid => "ERR_SIG_INVALID",
            ErrorCode::CryptoFailed => "ERR_CRYPTO_FAILED",
            ErrorCode::Internal => "ERR_INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Per-block resource limits enforced by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub gas_limit: u64,
    pub max_events: u32,
    pub max_write_bytes: u32,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            gas_limit: 10_000_000,
            max_events: 1024,
            max_write_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Input to the execution engine. All fields are identical across
/// validators for the same block; nothing here comes from local clocks
/// or local configuration that could diverge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub api_version: u32,
    pub chain_id: Vec<u8>,
    pub block_height: u64,
    pub block_time: u64,
    pub block_hash: Hash,
    pub prev_state_root: Hash,
    pub transactions: Vec<Vec<u8>>,
    pub limits: ExecutionLimits,
    /// Deterministic seed, derived only from the block header.
    pub execution_seed: Option<Hash>,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok = 0,
    InvalidBlock = 1,
    ExecutionError = 2,
    OutOfGas = 3,
}

impl ExecutionStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::InvalidBlock),
            2 => Some(Self::ExecutionError),
            3 => Some(Self::OutOfGas),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::InvalidBlock => write!(f, "INVALID_BLOCK"),
            Self::ExecutionError => write!(f, "EXECUTION_ERROR"),
            Self::OutOfGas => write!(f, "OUT_OF_GAS"),
        }
    }
}

/// Output of the execution engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResponse {
    pub api_version: u32,
    pub status: ExecutionStatus,
    pub new_state_root: Hash,
    pub gas_used: u64,
    pub receipts: Vec<Receipt>,
    pub events: Vec<Event>,
    pub logs: Vec<LogLine>,
}

impl ExecutionResponse {
    /// A failure response carrying no state transition.
    pub fn failure(status: ExecutionStatus, prev_state_root: Hash) -> Self {
        Self {
            api_version: API_VERSION,
            status,
            new_state_root: prev_state_root,
            gas_used: 0,
            receipts: Vec::new(),
            events: Vec::new(),
            logs: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_index: u32,
    pub success: bool,
    pub gas_used: u64,
    pub result_code: u32,
    pub return_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub tx_index: u32,
    pub event_type: String,
    pub attributes: Vec<EventAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventAttribute {
    pub key: String,
    pub value: Vec<u8>,
}

/// Debug log line from the guest. Never consensus-critical; the host may
/// drop these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub level: u32,
    pub message: String,
}

/// Context handed to the guest via `get_context`. Identical across
/// validators for the same block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    pub chain_id: Vec<u8>,
    pub block_height: u64,
    pub block_time: u64,
    pub block_hash: Hash,
    pub gas_limit: u64,
    pub max_events: u32,
    pub max_write_bytes: u32,
    pub api_version: u32,
    pub execution_seed: Option<Hash>,
}

impl ExecutionContext {
    pub fn from_request(req: &ExecutionRequest) -> Self {
        Self {
            chain_id: req.chain_id.clone(),
            block_height: req.block_height,
            block_time: req.block_time,
            block_hash: req.block_hash,
            gas_limit: req.limits.gas_limit,
            max_events: req.limits.max_events,
            max_write_bytes: req.limits.max_write_bytes,
            api_version: req.api_version,
            execution_seed: req.execution_seed,
        }
    }
}
