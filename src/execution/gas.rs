//! Deterministic gas accounting: fixed base costs per host call plus a
//! per-byte surcharge on inputs and outputs. Guest compute is metered
//! separately via wasmtime fuel.

use crate::execution::types::ErrorCode;

pub const G_STATE_GET: u64 = 200;
pub const G_STATE_SET: u64 = 500;
pub const G_STATE_DEL: u64 = 300;
pub const G_PER_BYTE: u64 = 3;
pub const G_EMIT_EVENT: u64 = 100;
pub const G_HASH_BLAKE3: u64 = 50;
pub const G_VERIFY_ED25519: u64 = 2000;
pub const G_VERIFY_BLS_AGG: u64 = 5000;
pub const G_LOG: u64 = 10;
pub const G_GET_CONTEXT: u64 = 50;
pub const G_GAS_REMAINING: u64 = 5;
pub const G_HOST_FREE: u64 = 5;

pub fn gas_cost_state_get(key_len: usize) -> u64 {
    G_STATE_GET.saturating_add((key_len as u64).saturating_mul(G_PER_BYTE))
}

pub fn gas_cost_state_set(key_len: usize, val_len: usize) -> u64 {
    let byte_cost = ((key_len + val_len) as u64).saturating_mul(G_PER_BYTE);
    G_STATE_SET.saturating_add(byte_cost)
}

pub fn gas_cost_state_delete(key_len: usize) -> u64 {
    G_STATE_DEL.saturating_add((key_len as u64).saturating_mul(G_PER_BYTE))
}

pub fn gas_cost_emit_event(event_len: usize) -> u64 {
    G_EMIT_EVENT.saturating_add((event_len as u64).saturating_mul(G_PER_BYTE))
}

pub fn gas_cost_log(msg_len: usize) -> u64 {
    G_LOG.saturating_add((msg_len as u64).saturating_mul(G_PER_BYTE))
}

pub fn gas_cost_hash_blake3(input_len: usize) -> u64 {
    G_HASH_BLAKE3.saturating_add((input_len as u64).saturating_mul(G_PER_BYTE))
}

/// Authoritative host-side gas counter. Charging is checked before it is
/// applied: on `OutOfGas` the consumed count is unchanged, the meter is
/// never left half-charged.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: u64,
    consumed: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, consumed: 0 }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), ErrorCode> {
        let new_consumed = match self.consumed.checked_add(amount) {
            Some(v) if v <= self.limit => v,
            _ => return Err(ErrorCode::OutOfGas),
        };
        self.consumed = new_consumed;
        Ok(())
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.consumed)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_and_remaining() {
        let mut meter = GasMeter::new(1000);
        meter.charge(100).unwrap();
        assert_eq!(meter.consumed(), 100);
        assert_eq!(meter.remaining(), 900);
    }

    #[test]
    fn exact_limit_exhausts() {
        let mut meter = GasMeter::new(500);
        meter.charge(500).unwrap();
        assert!(meter.is_exhausted());
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn over_limit_leaves_meter_unchanged() {
        let mut meter = GasMeter::new(100);
        meter.charge(60).unwrap();
        assert_eq!(meter.charge(41), Err(ErrorCode::OutOfGas));
        assert_eq!(meter.consumed(), 60);
    }

    #[test]
    fn overflow_protected() {
        let mut meter = GasMeter::new(u64::MAX);
        meter.charge(u64::MAX - 1).unwrap();
        assert_eq!(meter.charge(2), Err(ErrorCode::OutOfGas));
        assert_eq!(meter.consumed(), u64::MAX - 1);
    }

    #[test]
    fn byte_surcharges() {
        assert_eq!(gas_cost_state_get(10), 200 + 30);
        assert_eq!(gas_cost_state_set(10, 20), 500 + 90);
        assert_eq!(gas_cost_state_delete(10), 300 + 30);
        assert_eq!(gas_cost_emit_event(50), 100 + 150);
    }
}
