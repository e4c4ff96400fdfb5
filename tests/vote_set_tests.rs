//! Vote aggregation unit tests: signature checks, idempotent duplicates,
//! equivocation evidence, quorum accounting, and QC formation.

use ed25519_dalek::SigningKey;

use bedrock::consensus::vote_set::{VoteSet, VoteSetError};
use bedrock::crypto::ed25519;
use bedrock::types::{Address, EvidenceKind, Hash, Validator, ValidatorSet, Vote};

struct TestValidator {
    key: SigningKey,
    address: Address,
}

fn new_validator(seed: u8) -> TestValidator {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let address = ed25519::address_from_pubkey(&key.verifying_key());
    TestValidator { key, address }
}

fn make_valset(vals: &[TestValidator], power: u64) -> ValidatorSet {
    ValidatorSet::new(
        vals.iter()
            .map(|v| Validator {
                address: v.address,
                public_key: v.key.verifying_key().to_bytes(),
                voting_power: power,
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

#[test]
fn accumulates_power_to_quorum() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(1, 0);
    let hash = Hash([9; 32]);

    assert!(!vs.add_vote(&valset, sign_vote(&vals[0], hash, 1, 0)).unwrap());
    assert!(!vs.add_vote(&valset, sign_vote(&vals[1], hash, 1, 0)).unwrap());
    assert_eq!(vs.voting_power(), 200);
    // 300 >= 267
    assert!(vs.add_vote(&valset, sign_vote(&vals[2], hash, 1, 0)).unwrap());
}

#[test]
fn rejects_wrong_height_or_round() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(1, 0);

    let err = vs.add_vote(&valset, sign_vote(&vals[0], Hash([9; 32]), 2, 0)).unwrap_err();
    assert!(matches!(err, VoteSetError::WrongHeightRound { .. }));

    let err = vs.add_vote(&valset, sign_vote(&vals[0], Hash([9; 32]), 1, 1)).unwrap_err();
    assert!(matches!(err, VoteSetError::WrongHeightRound { .. }));
}

#[test]
fn rejects_unknown_voter() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(1, 0);

    let outsider = new_validator(99);
    let err = vs.add_vote(&valset, sign_vote(&outsider, Hash([9; 32]), 1, 0)).unwrap_err();
    assert!(matches!(err, VoteSetError::UnknownValidator(_)));
}

#[test]
fn rejects_invalid_signature() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(1, 0);

    let mut vote = sign_vote(&vals[0], Hash([9; 32]), 1, 0);
    vote.signature[0] ^= 0xFF;
    let err = vs.add_vote(&valset, vote).unwrap_err();
    assert!(matches!(err, VoteSetError::InvalidSignature(_)));
    assert_eq!(vs.voting_power(), 0);
}

#[test]
fn duplicate_vote_counts_once() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(1, 0);
    let hash = Hash([9; 32]);

    vs.add_vote(&valset, sign_vote(&vals[0], hash, 1, 0)).unwrap();
    vs.add_vote(&valset, sign_vote(&vals[0], hash, 1, 0)).unwrap();
    assert_eq!(vs.len(), 1);
    assert_eq!(vs.voting_power(), 100);
}

#[test]
fn equivocation_yields_double_vote_evidence() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(10, 1);

    let vote_a = sign_vote(&vals[1], Hash([1; 32]), 10, 1);
    let vote_b = sign_vote(&vals[1], Hash([2; 32]), 10, 1);

    vs.add_vote(&valset, vote_a.clone()).unwrap();
    let err = vs.add_vote(&valset, vote_b.clone()).unwrap_err();

    match err {
        VoteSetError::Equivocation(voter, evidence) => {
            assert_eq!(voter, vals[1].address);
            assert_eq!(evidence.height, 10);
            match evidence.kind {
                EvidenceKind::DoubleVote { vote_a: a, vote_b: b, validator_id } => {
                    assert_eq!(validator_id, vals[1].address);
                    assert_eq!(a, vote_a);
                    assert_eq!(b, vote_b);
                }
                _ => panic!("expected double-vote evidence"),
            }
        }
        other => panic!("expected equivocation, got {:?}", other),
    }

    // The conflicting vote never entered the set.
    assert_eq!(vs.voting_power(), 100);
}

#[test]
fn make_qc_requires_quorum() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let mut vs = VoteSet::new(1, 0);
    let hash = Hash([9; 32]);

    vs.add_vote(&valset, sign_vote(&vals[0], hash, 1, 0)).unwrap();
    assert!(matches!(vs.make_qc(&valset), Err(VoteSetError::NoQuorum)));

    vs.add_vote(&valset, sign_vote(&vals[1], hash, 1, 0)).unwrap();
    vs.add_vote(&valset, sign_vote(&vals[2], hash, 1, 0)).unwrap();

    let qc = vs.make_qc(&valset).unwrap();
    assert_eq!(qc.block_hash, hash);
    assert_eq!(qc.round, 0);
    assert_eq!(qc.votes.len(), 3);
    qc.verify(&valset).unwrap();
}

#[test]
fn qc_votes_are_address_ordered() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let hash = Hash([9; 32]);

    // Insert in two different orders; the QC must come out identical.
    let mut a = VoteSet::new(1, 0);
    a.add_vote(&valset, sign_vote(&vals[0], hash, 1, 0)).unwrap();
    a.add_vote(&valset, sign_vote(&vals[1], hash, 1, 0)).unwrap();
    a.add_vote(&valset, sign_vote(&vals[2], hash, 1, 0)).unwrap();

    let mut b = VoteSet::new(1, 0);
    b.add_vote(&valset, sign_vote(&vals[2], hash, 1, 0)).unwrap();
    b.add_vote(&valset, sign_vote(&vals[0], hash, 1, 0)).unwrap();
    b.add_vote(&valset, sign_vote(&vals[1], hash, 1, 0)).unwrap();

    assert_eq!(a.make_qc(&valset).unwrap(), b.make_qc(&valset).unwrap());
}

#[test]
fn qc_verify_rejects_tampering() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals, 100);
    let hash = Hash([9; 32]);

    let mut vs = VoteSet::new(1, 0);
    for v in &vals[..3] {
        vs.add_vote(&valset, sign_vote(v, hash, 1, 0)).unwrap();
    }
    let qc = vs.make_qc(&valset).unwrap();

    // Dropping a vote breaks quorum.
    let mut thin = qc.clone();
    thin.votes.truncate(2);
    assert!(thin.verify(&valset).is_err());

    // Duplicating a signer is rejected outright.
    let mut stuffed = qc.clone();
    let dup = stuffed.votes[0].clone();
    stuffed.votes.push(dup);
    assert!(stuffed.verify(&valset).is_err());

    // Retargeting the QC invalidates every signature.
    let mut retargeted = qc;
    retargeted.block_hash = Hash([8; 32]);
    assert!(retargeted.verify(&valset).is_err());
}
