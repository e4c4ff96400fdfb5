//! Inbound dispatcher: decode raw gossip frames, run first-stage
//! validation, enqueue surviving domain objects onto the consensus
//! inbound channels. Overflow and rejects drop with a metric increment;
//! the engine stays live under flood.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::consensus::Engine;
use crate::metrics::Metrics;
use crate::transport::validation::{InboundValidator, RejectReason};
use crate::types::codec::{decode_frame, CodecError, FrameType, WireMessage};

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    #[error("undecodable frame: {0}")]
    Codec(#[from] CodecError),
}

pub struct Dispatcher {
    engine: Arc<Engine>,
    validator: Arc<InboundValidator>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, validator: Arc<InboundValidator>) -> Self {
        Self { engine, validator, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate and route one raw frame.
    pub fn dispatch(&self, raw: &[u8]) -> Result<(), DispatchError> {
        let result = self.dispatch_inner(raw);
        if result.is_err() {
            if let Some(m) = &self.metrics {
                m.transport_dropped.inc();
            }
        }
        result
    }

    fn dispatch_inner(&self, raw: &[u8]) -> Result<(), DispatchError> {
        self.validator.check_size(raw.len())?;

        let msg = decode_frame(raw)?;

        match msg {
            WireMessage::Proposal(p) => {
                self.validator.check_sender(FrameType::Proposal, &p.proposer_id)?;
                self.engine.submit_proposal(p);
            }
            WireMessage::Vote(v) => {
                self.validator.check_sender(FrameType::Vote, &v.voter_id)?;
                self.engine.submit_vote(v);
            }
            WireMessage::Timeout(tm) => {
                self.validator.check_sender(FrameType::Timeout, &tm.voter_id)?;
                self.engine.submit_timeout_msg(tm);
            }
        }
        Ok(())
    }

    /// Drain a subscription stream until it closes.
    pub fn run(&self, rx: Receiver<Vec<u8>>) {
        for raw in rx.iter() {
            if let Err(e) = self.dispatch(&raw) {
                debug!(error = %e, "dropped inbound message");
            }
        }
    }
}
