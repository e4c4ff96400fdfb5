//! Store contract tests, run against both the in-memory and the RocksDB
//! backends: commit atomicity, first-write-wins block stability, and the
//! state-root cursor.

use std::collections::BTreeMap;
use std::sync::Arc;

use bedrock::crypto::sha256;
use bedrock::storage::{MemStore, RocksStore, Store};
use bedrock::types::{Address, Block, BlockHeader, Hash, QuorumCertificate, Vote};

fn make_block(height: u64, seed: u8, txs: Vec<Vec<u8>>) -> (Block, QuorumCertificate) {
    let mut block = Block {
        header: BlockHeader {
            height,
            round: 0,
            parent_hash: Hash([seed; 32]),
            state_root: Hash([seed.wrapping_add(1); 32]),
            tx_root: Hash::ZERO,
            proposer_id: Address([2; 32]),
            block_time: height,
            chain_id: b"store-chain".to_vec(),
            block_hash: Hash::ZERO,
        },
        transactions: txs,
        qc: None,
    };
    block.header.block_hash = block.header.compute_hash();

    let qc = QuorumCertificate {
        block_hash: block.header.block_hash,
        round: 0,
        votes: vec![Vote {
            block_hash: block.header.block_hash,
            height,
            round: 0,
            voter_id: Address([2; 32]),
            signature: [3; 64],
        }],
    };
    (block, qc)
}

fn exercise_store(store: &dyn Store) {
    assert_eq!(store.get_latest_height().unwrap(), 0);
    assert!(store.get_block(1).unwrap().is_none());
    assert!(!store.has_block(1).unwrap());

    // Save height 1 and 2; latest height follows.
    let (b1, qc1) = make_block(1, 10, vec![b"tx-a".to_vec()]);
    let (b2, qc2) = make_block(2, 20, vec![b"tx-b".to_vec(), b"tx-c".to_vec()]);
    store.save_block(&b1, &qc1).unwrap();
    store.save_block(&b2, &qc2).unwrap();

    assert_eq!(store.get_latest_height().unwrap(), 2);
    let (got, got_qc) = store.get_block(1).unwrap().unwrap();
    assert_eq!(got, b1);
    assert_eq!(got_qc, qc1);

    // First write wins: a different block at height 1 does not replace it.
    let (fork, fork_qc) = make_block(1, 99, vec![]);
    store.save_block(&fork, &fork_qc).unwrap();
    let (still, _) = store.get_block(1).unwrap().unwrap();
    assert_eq!(still, b1, "committed block must be stable");

    // Tx locations point at (height, index).
    assert_eq!(store.get_tx_location(sha256(b"tx-a")).unwrap(), Some((1, 0)));
    assert_eq!(store.get_tx_location(sha256(b"tx-c")).unwrap(), Some((2, 1)));
    assert_eq!(store.get_tx_location(sha256(b"unknown")).unwrap(), None);

    // Commit roots and the state-root cursor.
    assert_eq!(store.get_commit_state_root(1).unwrap(), None);
    store.save_commit(1, b1.header.state_root).unwrap();
    assert_eq!(store.get_commit_state_root(1).unwrap(), Some(b1.header.state_root));

    assert_eq!(store.get_state_root().unwrap(), Hash::ZERO);
    store.set_state_root(b2.header.state_root).unwrap();
    assert_eq!(store.get_state_root().unwrap(), b2.header.state_root);

    // Write sets land as raw key/value state.
    let mut writes = BTreeMap::new();
    writes.insert(b"k1".to_vec(), b"v1".to_vec());
    writes.insert(b"k2".to_vec(), b"v2".to_vec());
    store.apply_write_set(&writes).unwrap();
    assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(store.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(store.get(b"k3").unwrap(), None);
}

#[test]
fn mem_store_contract() {
    let store = MemStore::new();
    exercise_store(&store);
}

#[test]
fn rocks_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    exercise_store(&store);
}

#[test]
fn rocks_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (b1, qc1) = make_block(1, 10, vec![b"tx".to_vec()]);

    {
        let store = RocksStore::open(dir.path()).unwrap();
        store.save_block(&b1, &qc1).unwrap();
        store.save_commit(1, b1.header.state_root).unwrap();
        store.set_state_root(b1.header.state_root).unwrap();
    }

    let store = RocksStore::open(dir.path()).unwrap();
    assert_eq!(store.get_latest_height().unwrap(), 1);
    let (got, _) = store.get_block(1).unwrap().unwrap();
    assert_eq!(got, b1);
    assert_eq!(store.get_state_root().unwrap(), b1.header.state_root);
    assert_eq!(store.get_commit_state_root(1).unwrap(), Some(b1.header.state_root));
}

#[test]
fn mem_store_is_safe_to_share() {
    let store = Arc::new(MemStore::new());
    let mut handles = Vec::new();
    for i in 0..4u8 {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            let (b, qc) = make_block(i as u64 + 1, i, vec![]);
            store.save_block(&b, &qc).unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.get_latest_height().unwrap(), 4);
}
