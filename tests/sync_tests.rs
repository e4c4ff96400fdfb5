//! Block-sync tests: fast sync verification and state-root checking,
//! snapshot sync for large gaps, and the selection policy between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::SigningKey;

use bedrock::crypto::ed25519;
use bedrock::execution::MockExecutor;
use bedrock::storage::{MemStore, Store};
use bedrock::sync::{
    BlockProvider, BlockSyncer, CancelToken, SyncError, SyncState, SNAPSHOT_THRESHOLD,
};
use bedrock::types::{
    Address, Block, BlockHeader, Hash, QuorumCertificate, Validator, ValidatorSet, Vote,
};

const CHAIN_ID: &[u8] = b"sync-chain";

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

fn make_block(height: u64, parent: Hash, state_root: Hash, proposer: Address) -> Block {
    let mut block = Block {
        header: BlockHeader {
            height,
            round: 0,
            parent_hash: parent,
            state_root,
            tx_root: Hash::ZERO,
            proposer_id: proposer,
            block_time: height,
            chain_id: CHAIN_ID.to_vec(),
            block_hash: Hash::ZERO,
        },
        transactions: vec![],
        qc: None,
    };
    block.header.block_hash = block.header.compute_hash();
    block
}

/// In-memory peer serving a pre-built chain and one snapshot.
struct MockProvider {
    blocks: BTreeMap<u64, (Block, QuorumCertificate)>,
    latest: u64,
    snapshot: Option<(Hash, BTreeMap<Vec<u8>, Vec<u8>>)>,
}

impl BlockProvider for MockProvider {
    fn get_block(&self, height: u64) -> Result<(Block, QuorumCertificate), SyncError> {
        self.blocks
            .get(&height)
            .cloned()
            .ok_or(SyncError::Fetch { height, reason: "unknown height".into() })
    }

    fn get_latest_height(&self) -> Result<u64, SyncError> {
        Ok(self.latest)
    }

    fn get_state_snapshot(
        &self,
        height: u64,
    ) -> Result<(Hash, BTreeMap<Vec<u8>, Vec<u8>>), SyncError> {
        self.snapshot
            .clone()
            .ok_or(SyncError::Fetch { height, reason: "no snapshot".into() })
    }
}

/// Build a chain of `n` blocks whose state roots all equal `root`, each
/// certified by a QC from 3 of the 4 validators.
fn build_chain(vals: &[TestValidator], n: u64, root: Hash) -> BTreeMap<u64, (Block, QuorumCertificate)> {
    let mut blocks = BTreeMap::new();
    let mut parent = Hash::ZERO;
    for h in 1..=n {
        let block = make_block(h, parent, root, vals[0].address);
        let hash = block.hash();
        let votes: Vec<Vote> = vals[..3].iter().map(|v| sign_vote(v, hash, h, 0)).collect();
        let qc = QuorumCertificate { block_hash: hash, round: 0, votes };
        blocks.insert(h, (block, qc));
        parent = hash;
    }
    blocks
}

#[test]
fn fast_sync_executes_and_persists() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);
    let root = Hash([0x77; 32]);

    let provider = Arc::new(MockProvider {
        blocks: build_chain(&vals, 3, root),
        latest: 3,
        snapshot: None,
    });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::returning(root));

    let syncer = BlockSyncer::new(store.clone(), provider, executor.clone(), valset);
    syncer.run(&CancelToken::new()).unwrap();

    assert_eq!(syncer.state(), SyncState::CaughtUp);
    assert!(syncer.is_synced());
    assert_eq!(syncer.current_height(), 3);
    assert_eq!(executor.calls().count, 3);

    for h in 1..=3 {
        assert!(store.has_block(h).unwrap());
        assert_eq!(store.get_commit_state_root(h).unwrap(), Some(root));
    }
    assert_eq!(store.get_latest_height().unwrap(), 3);
    assert_eq!(store.get_state_root().unwrap(), root);
}

#[test]
fn fast_sync_rejects_state_root_mismatch() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);

    // Headers claim one root; local execution produces another.
    let claimed = Hash([0x11; 32]);
    let actual = Hash([0x22; 32]);

    let provider = Arc::new(MockProvider {
        blocks: build_chain(&vals, 1, claimed),
        latest: 1,
        snapshot: None,
    });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::returning(actual));

    let syncer = BlockSyncer::new(store.clone(), provider, executor, valset);
    let err = syncer.run(&CancelToken::new()).unwrap_err();

    match err {
        SyncError::StateRootMismatch { height, got, want } => {
            assert_eq!(height, 1);
            assert_eq!(got, actual);
            assert_eq!(want, claimed);
        }
        other => panic!("expected state root mismatch, got {:?}", other),
    }

    // Nothing was persisted for the bad height.
    assert!(!store.has_block(1).unwrap());
    assert_eq!(store.get_latest_height().unwrap(), 0);
}

#[test]
fn fast_sync_rejects_invalid_qc() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);
    let root = Hash([0x77; 32]);

    let mut blocks = build_chain(&vals, 1, root);
    // Strip the QC below quorum.
    blocks.get_mut(&1).unwrap().1.votes.truncate(1);

    let provider = Arc::new(MockProvider { blocks, latest: 1, snapshot: None });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::returning(root));

    let syncer = BlockSyncer::new(store.clone(), provider, executor, valset);
    assert!(matches!(
        syncer.run(&CancelToken::new()),
        Err(SyncError::InvalidBlock { height: 1, .. })
    ));
    assert!(!store.has_block(1).unwrap());
}

#[test]
fn snapshot_sync_for_large_gap() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);
    let target = SNAPSHOT_THRESHOLD + 50;
    let root = Hash([0x99; 32]);

    // Only the target block matters for snapshot verification.
    let block = make_block(target, Hash([0x01; 32]), root, vals[0].address);
    let hash = block.hash();
    let votes: Vec<Vote> = vals[..3].iter().map(|v| sign_vote(v, hash, target, 0)).collect();
    let qc = QuorumCertificate { block_hash: hash, round: 0, votes };

    let mut state_data = BTreeMap::new();
    state_data.insert(b"account/alice".to_vec(), b"100".to_vec());
    state_data.insert(b"account/bob".to_vec(), b"250".to_vec());

    let mut blocks = BTreeMap::new();
    blocks.insert(target, (block, qc));

    let provider = Arc::new(MockProvider {
        blocks,
        latest: target,
        snapshot: Some((root, state_data)),
    });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::returning(root));

    let syncer = BlockSyncer::new(store.clone(), provider, executor.clone(), valset);
    syncer.run(&CancelToken::new()).unwrap();

    assert_eq!(syncer.state(), SyncState::CaughtUp);
    // Snapshot sync applies state without executing blocks.
    assert_eq!(executor.calls().count, 0);
    assert_eq!(store.get_state_root().unwrap(), root);
    assert_eq!(store.get_commit_state_root(target).unwrap(), Some(root));
    assert_eq!(store.get(b"account/alice").unwrap(), Some(b"100".to_vec()));
    assert_eq!(store.get(b"account/bob").unwrap(), Some(b"250".to_vec()));
}

#[test]
fn snapshot_sync_rejects_root_mismatch() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);
    let target = SNAPSHOT_THRESHOLD + 1;

    let committed = Hash([0x99; 32]);
    let forged = Hash([0x66; 32]);

    let block = make_block(target, Hash::ZERO, committed, vals[0].address);
    let hash = block.hash();
    let votes: Vec<Vote> = vals[..3].iter().map(|v| sign_vote(v, hash, target, 0)).collect();
    let qc = QuorumCertificate { block_hash: hash, round: 0, votes };

    let mut blocks = BTreeMap::new();
    blocks.insert(target, (block, qc));

    let provider = Arc::new(MockProvider {
        blocks,
        latest: target,
        snapshot: Some((forged, BTreeMap::new())),
    });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::new());

    let syncer = BlockSyncer::new(store.clone(), provider, executor, valset);
    assert!(matches!(
        syncer.run(&CancelToken::new()),
        Err(SyncError::SnapshotRootMismatch { .. })
    ));
    assert_eq!(store.get_state_root().unwrap(), Hash::ZERO);
}

#[test]
fn already_caught_up_is_a_noop() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);

    let provider = Arc::new(MockProvider { blocks: BTreeMap::new(), latest: 0, snapshot: None });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::new());

    let syncer = BlockSyncer::new(store, provider, executor, valset);
    syncer.run(&CancelToken::new()).unwrap();
    assert_eq!(syncer.state(), SyncState::CaughtUp);
}

#[test]
fn fetcher_backfills_and_skips_known_heights() {
    use bedrock::sync::Fetcher;

    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let root = Hash([0x77; 32]);
    let chain = build_chain(&vals, 4, root);

    let store = Arc::new(MemStore::new());
    // Height 2 is already held locally.
    let (b2, qc2) = chain.get(&2).unwrap().clone();
    store.save_block(&b2, &qc2).unwrap();

    let provider = Arc::new(MockProvider { blocks: chain, latest: 4, snapshot: None });
    let fetcher = Fetcher::new(provider, store.clone());

    let fetched = fetcher.fetch_blocks(&CancelToken::new(), 1, 4).unwrap();
    assert_eq!(fetched, 4);
    for h in 1..=4 {
        assert!(store.has_block(h).unwrap());
    }
    assert_eq!(fetcher.fetch_latest_height().unwrap(), 4);

    // Reversed range is an error.
    assert!(fetcher.fetch_blocks(&CancelToken::new(), 3, 1).is_err());
}

#[test]
fn cancellation_stops_fast_sync() {
    let vals: Vec<_> = (1..=4).map(new_validator).collect();
    let valset = make_valset(&vals);
    let root = Hash([0x77; 32]);

    let provider = Arc::new(MockProvider {
        blocks: build_chain(&vals, 5, root),
        latest: 5,
        snapshot: None,
    });
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(MockExecutor::returning(root));

    let cancel = CancelToken::new();
    cancel.cancel();

    let syncer = BlockSyncer::new(store, provider, executor, valset);
    assert!(matches!(syncer.run(&cancel), Err(SyncError::Cancelled)));
}
