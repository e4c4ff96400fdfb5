//! Two-stage inbound validation through the dispatcher: cheap transport
//! checks first, then full domain validation inside the running engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;

use bedrock::consensus::{Engine, EngineConfig};
use bedrock::crypto::ed25519;
use bedrock::execution::MockExecutor;
use bedrock::storage::MemStore;
use bedrock::transport::{DispatchError, Dispatcher, InboundValidator, RejectReason, ValidatorConfig};
use bedrock::types::codec::{encode_frame, WireMessage};
use bedrock::types::{
    Address, Block, BlockHeader, Hash, Proposal, Validator, ValidatorSet, Vote,
};

const CHAIN_ID: &[u8] = b"transport-chain";

struct TestValidator {
    key: SigningKey,
    address: Address,
}

fn new_validator(seed: u8) -> TestValidator {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let address = ed25519::address_from_pubkey(&key.verifying_key());
    TestValidator { key, address }
}

fn make_valset(vals: &[TestValidator]) -> ValidatorSet {
    ValidatorSet::new(
        vals.iter()
            .map(|v| Validator {
                address: v.address,
                public_key: v.key.verifying_key().to_bytes(),
                voting_power: 100,
            })
            .collect(),
    )
    .unwrap()
}

fn sign_vote(v: &TestValidator, block_hash: Hash, height: u64, round: u64) -> Vote {
    let mut vote = Vote {
        block_hash,
        height,
        round,
        voter_id: v.address,
        signature: [0u8; 64],
    };
    vote.signature = ed25519::sign(&v.key, &vote.signing_payload());
    vote
}

fn make_proposal(v: &TestValidator, height: u64) -> Proposal {
    let mut block = Block {
        header: BlockHeader {
            height,
            round: 0,
            parent_hash: Hash::ZERO,
            state_root: Hash([0xAB; 32]),
            tx_root: Hash::ZERO,
            proposer_id: v.address,
            block_time: 1,
            chain_id: CHAIN_ID.to_vec(),
            block_hash: Hash::ZERO,
        },
        transactions: vec![],
        qc: None,
    };
    block.header.block_hash = block.header.compute_hash();

    let mut proposal = Proposal { block, round: 0, proposer_id: v.address, signature: [0u8; 64] };
    proposal.signature = ed25519::sign(&v.key, &proposal.signing_payload());
    proposal
}

/// A 4-validator engine for vals[0], with the event loop running.
fn running_engine(vals: &[TestValidator]) -> Arc<Engine> {
    let mut cfg = EngineConfig::new(vals[0].key.clone(), make_valset(vals));
    cfg.chain_id = CHAIN_ID.to_vec();
    cfg.store = Some(Arc::new(MemStore::new()));
    cfg.executor = Some(Arc::new(MockExecutor::returning(Hash([0xAB; 32]))));
    cfg.base_timeout_ms = 60_000;
    let engine = Arc::new(Engine::new(cfg).unwrap());
    engine.start().unwrap();
    engine
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn valid_proposal_flows_to_engine() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let engine = running_engine(&vals);

    let validator = Arc::new(InboundValidator::new(ValidatorConfig::default(), vals[0].address));
    let dispatcher = Dispatcher::new(engine.clone(), validator);

    // vals[1] is the proposer for (height 1, round 0) in a 4-set.
    let frame = encode_frame(&WireMessage::Proposal(make_proposal(&vals[1], 1)));
    dispatcher.dispatch(&frame).unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || engine.proposal().is_some()),
        "proposal should reach the engine"
    );
    engine.stop();
}

#[test]
fn equivocating_votes_produce_evidence_through_the_pipeline() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let engine = running_engine(&vals);

    let validator = Arc::new(InboundValidator::new(ValidatorConfig::default(), vals[0].address));
    let dispatcher = Dispatcher::new(engine.clone(), validator);

    let byzantine = &vals[3];
    for hash in [Hash([1; 32]), Hash([2; 32])] {
        let frame = encode_frame(&WireMessage::Vote(sign_vote(byzantine, hash, 1, 0)));
        dispatcher.dispatch(&frame).unwrap();
    }

    let pool = engine.evidence();
    assert!(
        wait_until(Duration::from_secs(2), || pool.len() == 1),
        "double vote should surface as evidence"
    );
    engine.stop();
}

#[test]
fn first_stage_rejections() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let engine = running_engine(&vals);

    let validator = Arc::new(InboundValidator::new(
        ValidatorConfig { max_msg_bytes: 4096, ..Default::default() },
        vals[0].address,
    ));
    let dispatcher = Dispatcher::new(engine.clone(), validator.clone());

    // Oversized frame.
    let huge = vec![0u8; 8192];
    assert!(matches!(
        dispatcher.dispatch(&huge),
        Err(DispatchError::Rejected(RejectReason::TooLarge { .. }))
    ));

    // Undecodable payload.
    assert!(matches!(dispatcher.dispatch(&[0x01, 0xde, 0xad]), Err(DispatchError::Codec(_))));

    // Our own message echoed back.
    let own = encode_frame(&WireMessage::Vote(sign_vote(&vals[0], Hash([1; 32]), 1, 0)));
    assert!(matches!(
        dispatcher.dispatch(&own),
        Err(DispatchError::Rejected(RejectReason::SelfEcho))
    ));

    // A banned peer's traffic.
    validator.ban(vals[2].address);
    let banned = encode_frame(&WireMessage::Vote(sign_vote(&vals[2], Hash([1; 32]), 1, 0)));
    assert!(matches!(
        dispatcher.dispatch(&banned),
        Err(DispatchError::Rejected(RejectReason::Banned))
    ));

    engine.stop();
}
