//! Multi-validator liveness over the in-memory transport hub: two live
//! engines exchange proposals, votes, and timeout messages until blocks
//! finalize on both. View change recovers any transient stall.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;

use bedrock::consensus::{Engine, EngineConfig};
use bedrock::crypto::ed25519;
use bedrock::execution::MockExecutor;
use bedrock::storage::MemStore;
use bedrock::transport::LocalHub;
use bedrock::types::{Address, Hash, Validator, ValidatorSet};

struct TestValidator {
    key: SigningKey,
    address: Address,
}

fn new_validator(seed: u8) -> TestValidator {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let address = ed25519::address_from_pubkey(&key.verifying_key());
    TestValidator { key, address }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn two_validators_commit_over_the_hub() {
    let vals: Vec<_> = vec![new_validator(1), new_validator(2)];
    let valset = ValidatorSet::new(
        vals.iter()
            .map(|v| Validator {
                address: v.address,
                public_key: v.key.verifying_key().to_bytes(),
                voting_power: 100,
            })
            .collect(),
    )
    .unwrap();
    // Both votes are required: total 200, f = 66, quorum = 133.
    assert_eq!(valset.quorum(), 133);

    let hub = LocalHub::new();
    let mut engines: Vec<Arc<Engine>> = Vec::new();

    for v in &vals {
        let mut cfg = EngineConfig::new(v.key.clone(), valset.clone());
        cfg.chain_id = b"liveness-chain".to_vec();
        cfg.store = Some(Arc::new(MemStore::new()));
        cfg.executor = Some(Arc::new(MockExecutor::returning(Hash([0xEE; 32]))));
        cfg.transport = Some(Arc::new(hub.transport(v.address)));
        // Short rounds so a missed hand-off recovers quickly.
        cfg.base_timeout_ms = 300;
        let engine = Arc::new(Engine::new(cfg).unwrap());
        hub.register(v.address, engine.clone());
        engines.push(engine);
    }

    for engine in &engines {
        engine.start().unwrap();
    }

    let reached = wait_until(Duration::from_secs(15), || {
        engines.iter().all(|e| e.last_commit_height() >= 2)
    });

    for engine in &engines {
        engine.stop();
    }

    assert!(
        reached,
        "both validators should finalize height 2: got {:?}",
        engines.iter().map(|e| e.last_commit_height()).collect::<Vec<_>>()
    );
    for engine in &engines {
        assert!(!engine.is_halted());
    }
}
