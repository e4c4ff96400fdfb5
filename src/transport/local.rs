//! In-memory transport for multi-validator tests: broadcasting delivers
//! the message to every other registered engine's inbound queues.

use std::sync::{Arc, Mutex};

use crate::consensus::{Engine, Transport};
use crate::types::{Address, Proposal, TimeoutMessage, Vote};

#[derive(Default)]
pub struct LocalHub {
    peers: Mutex<Vec<(Address, Arc<Engine>)>>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A broadcast handle for one peer. The engine itself is attached via
    /// `register` once constructed, so the transport can be handed to the
    /// engine's own config first.
    pub fn transport(self: &Arc<Self>, address: Address) -> LocalTransport {
        LocalTransport { hub: self.clone(), self_address: address }
    }

    pub fn register(&self, address: Address, engine: Arc<Engine>) {
        self.peers.lock().unwrap().push((address, engine));
    }
}

/// One peer's handle on the hub.
pub struct LocalTransport {
    hub: Arc<LocalHub>,
    self_address: Address,
}

impl Transport for LocalTransport {
    fn broadcast_proposal(&self, proposal: &Proposal) -> anyhow::Result<()> {
        for (addr, engine) in self.hub.peers.lock().unwrap().iter() {
            if *addr != self.self_address {
                engine.submit_proposal(proposal.clone());
            }
        }
        Ok(())
    }

    fn broadcast_vote(&self, vote: &Vote) -> anyhow::Result<()> {
        for (addr, engine) in self.hub.peers.lock().unwrap().iter() {
            if *addr != self.self_address {
                engine.submit_vote(vote.clone());
            }
        }
        Ok(())
    }

    fn broadcast_timeout(&self, msg: &TimeoutMessage) -> anyhow::Result<()> {
        for (addr, engine) in self.hub.peers.lock().unwrap().iter() {
            if *addr != self.self_address {
                engine.submit_timeout_msg(msg.clone());
            }
        }
        Ok(())
    }
}
