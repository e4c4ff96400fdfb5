//! First-stage (cheap) inbound validation: ban list, message size,
//! per-type token-bucket rate limit, self-echo suppression. Anything that
//! survives goes to the consensus engine for the domain stage (full
//! signature verification, voter-in-set, schema).

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Instant;

use crate::types::codec::FrameType;
use crate::types::Address;

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    pub max_msg_bytes: usize,
    /// Sustained messages per second allowed per frame type.
    pub rate_per_sec: u64,
    /// Burst capacity per frame type.
    pub burst: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { max_msg_bytes: 4 * 1024 * 1024, rate_per_sec: 100, burst: 200 }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RejectReason {
    #[error("message too large: {got} > {max}")]
    TooLarge { got: usize, max: usize },
    #[error("sender is banned")]
    Banned,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("own message echoed back")]
    SelfEcho,
}

struct TokenBucket {
    tokens: u64,
    capacity: u64,
    rate_per_sec: u64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_sec: u64, capacity: u64) -> Self {
        Self { tokens: capacity, capacity, rate_per_sec, last_refill: Instant::now() }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as u64;
        if elapsed_ms > 0 {
            let refill = elapsed_ms.saturating_mul(self.rate_per_sec) / 1000;
            if refill > 0 {
                self.tokens = (self.tokens + refill).min(self.capacity);
                self.last_refill = now;
            }
        }
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }
}

/// The cheap first validation stage, shared by the dispatcher.
pub struct InboundValidator {
    cfg: ValidatorConfig,
    self_address: Address,
    banned: Mutex<BTreeSet<Address>>,
    buckets: Mutex<[TokenBucket; 3]>,
}

impl InboundValidator {
    pub fn new(cfg: ValidatorConfig, self_address: Address) -> Self {
        let bucket = || TokenBucket::new(cfg.rate_per_sec, cfg.burst);
        Self {
            buckets: Mutex::new([bucket(), bucket(), bucket()]),
            banned: Mutex::new(BTreeSet::new()),
            self_address,
            cfg,
        }
    }

    pub fn ban(&self, addr: Address) {
        self.banned.lock().unwrap().insert(addr);
    }

    pub fn unban(&self, addr: &Address) {
        self.banned.lock().unwrap().remove(addr);
    }

    pub fn is_banned(&self, addr: &Address) -> bool {
        self.banned.lock().unwrap().contains(addr)
    }

    pub fn check_size(&self, len: usize) -> Result<(), RejectReason> {
        if len > self.cfg.max_msg_bytes {
            return Err(RejectReason::TooLarge { got: len, max: self.cfg.max_msg_bytes });
        }
        Ok(())
    }

    pub fn check_sender(&self, frame: FrameType, sender: &Address) -> Result<(), RejectReason> {
        if *sender == self.self_address {
            return Err(RejectReason::SelfEcho);
        }
        if self.is_banned(sender) {
            return Err(RejectReason::Banned);
        }

        let idx = match frame {
            FrameType::Proposal => 0,
            FrameType::Vote => 1,
            FrameType::Timeout => 2,
        };
        if !self.buckets.lock().unwrap()[idx].try_take() {
            return Err(RejectReason::RateLimited);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address([b; 32])
    }

    #[test]
    fn size_limit() {
        let v = InboundValidator::new(
            ValidatorConfig { max_msg_bytes: 10, ..Default::default() },
            addr(1),
        );
        assert!(v.check_size(10).is_ok());
        assert_eq!(v.check_size(11), Err(RejectReason::TooLarge { got: 11, max: 10 }));
    }

    #[test]
    fn banned_sender_rejected() {
        let v = InboundValidator::new(ValidatorConfig::default(), addr(1));
        v.ban(addr(2));
        assert_eq!(v.check_sender(FrameType::Vote, &addr(2)), Err(RejectReason::Banned));
        v.unban(&addr(2));
        assert!(v.check_sender(FrameType::Vote, &addr(2)).is_ok());
    }

    #[test]
    fn self_echo_suppressed() {
        let v = InboundValidator::new(ValidatorConfig::default(), addr(1));
        assert_eq!(v.check_sender(FrameType::Proposal, &addr(1)), Err(RejectReason::SelfEcho));
    }

    #[test]
    fn burst_exhaustion_rate_limits() {
        let v = InboundValidator::new(
            ValidatorConfig { rate_per_sec: 1, burst: 2, ..Default::default() },
            addr(1),
        );
        assert!(v.check_sender(FrameType::Vote, &addr(2)).is_ok());
        assert!(v.check_sender(FrameType::Vote, &addr(2)).is_ok());
        assert_eq!(v.check_sender(FrameType::Vote, &addr(2)), Err(RejectReason::RateLimited));
        // Other frame types have their own bucket.
        assert!(v.check_sender(FrameType::Proposal, &addr(2)).is_ok());
    }
}
