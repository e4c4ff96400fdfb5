//! Mempool admission, ordering, and eviction tests.

use std::sync::Arc;

use ed25519_dalek::SigningKey;

use bedrock::crypto::{ed25519, sha256};
use bedrock::mempool::{build_tx, encode_nonce, nonce_key, Mempool, MempoolConfig, MempoolError};
use bedrock::storage::{MemStore, Store};
use bedrock::types::Address;

fn signer(seed: u8) -> (SigningKey, Address) {
    let key = SigningKey::from_bytes(&[seed; 32]);
    let address = ed25519::address_from_pubkey(&key.verifying_key());
    (key, address)
}

fn tx_with_fee(seed: u8, nonce: u64, fee: u64, payload: &[u8]) -> Vec<u8> {
    let (key, address) = signer(seed);
    build_tx(address, nonce, fee, payload, &key)
}

fn pool() -> Mempool {
    Mempool::new(MempoolConfig::default(), None)
}

#[test]
fn reap_orders_by_descending_fee() {
    let mp = pool();
    mp.add_tx(&tx_with_fee(1, 0, 50, b"a")).unwrap();
    mp.add_tx(&tx_with_fee(2, 0, 300, b"b")).unwrap();
    mp.add_tx(&tx_with_fee(3, 0, 100, b"c")).unwrap();

    let reaped = mp.reap_max_txs(usize::MAX);
    let fees: Vec<u64> = reaped
        .iter()
        .map(|raw| u64::from_le_bytes(raw[40..48].try_into().unwrap()))
        .collect();
    assert_eq!(fees, vec![300, 100, 50]);
}

#[test]
fn equal_fees_tie_break_by_ascending_hash() {
    let mp = pool();
    let tx_a = tx_with_fee(1, 0, 10, b"aaaa");
    let tx_b = tx_with_fee(2, 0, 10, b"bbbb");
    mp.add_tx(&tx_a).unwrap();
    mp.add_tx(&tx_b).unwrap();

    let mut expected = vec![tx_a.clone(), tx_b.clone()];
    expected.sort_by_key(|raw| sha256(raw));

    assert_eq!(mp.reap_max_txs(usize::MAX), expected);
}

#[test]
fn reap_is_deterministic_across_insertion_orders() {
    let txs: Vec<Vec<u8>> = (1u8..=8)
        .map(|i| tx_with_fee(i, 0, (i as u64 % 3) * 7, &[i; 16]))
        .collect();

    let forward = pool();
    for tx in &txs {
        forward.add_tx(tx).unwrap();
    }
    let backward = pool();
    for tx in txs.iter().rev() {
        backward.add_tx(tx).unwrap();
    }

    for max_bytes in [usize::MAX, 400, 250, 129, 0] {
        assert_eq!(
            forward.reap_max_txs(max_bytes),
            backward.reap_max_txs(max_bytes),
            "max_bytes={}",
            max_bytes
        );
    }
}

#[test]
fn reap_skips_oversized_rather_than_truncating() {
    let mp = pool();
    let big = tx_with_fee(1, 0, 300, &[0u8; 200]); // highest fee, large
    let small = tx_with_fee(2, 0, 100, b"s");
    mp.add_tx(&big).unwrap();
    mp.add_tx(&small).unwrap();

    // Budget fits only the small tx; the big one is skipped, not cut.
    let reaped = mp.reap_max_txs(small.len());
    assert_eq!(reaped, vec![small]);
}

#[test]
fn duplicate_rejected() {
    let mp = pool();
    let tx = tx_with_fee(1, 0, 5, b"x");
    mp.add_tx(&tx).unwrap();
    assert!(matches!(mp.add_tx(&tx), Err(MempoolError::Duplicate)));
}

#[test]
fn removed_tx_cannot_be_readmitted() {
    let mp = pool();
    let tx = tx_with_fee(1, 0, 5, b"x");
    let hash = mp.add_tx(&tx).unwrap();

    mp.remove_txs(&[hash]);
    assert_eq!(mp.size(), 0);
    assert!(matches!(mp.add_tx(&tx), Err(MempoolError::RecentlyProcessed)));
}

#[test]
fn stateless_rejects_garbage() {
    let mp = pool();

    // Too small to parse.
    assert!(matches!(mp.add_tx(&[0u8; 50]), Err(MempoolError::TooSmall { .. })));

    // Zero sender.
    let (key, _) = signer(1);
    let raw = build_tx(Address::ZERO, 0, 5, b"p", &key);
    assert!(matches!(mp.add_tx(&raw), Err(MempoolError::ZeroSender)));

    // Oversized.
    let small_cfg = MempoolConfig { max_tx_bytes: 128, ..Default::default() };
    let mp = Mempool::new(small_cfg, None);
    let big = tx_with_fee(1, 0, 5, &[0u8; 256]);
    assert!(matches!(mp.add_tx(&big), Err(MempoolError::TooLarge { .. })));
}

#[test]
fn nonce_replay_protection() {
    let store = Arc::new(MemStore::new());
    let (key, address) = signer(1);

    // The sender's next expected nonce is 5.
    let mut writes = std::collections::BTreeMap::new();
    writes.insert(nonce_key(&address), encode_nonce(5));
    store.apply_write_set(&writes).unwrap();

    let mp = Mempool::new(MempoolConfig::default(), Some(store));

    // Below expected: replay.
    let old = build_tx(address, 4, 5, b"p", &key);
    assert!(matches!(mp.add_tx(&old), Err(MempoolError::NonceTooLow { got: 4, expected: 5 })));

    // At and slightly above expected: fine.
    mp.add_tx(&build_tx(address, 5, 5, b"p", &key)).unwrap();
    mp.add_tx(&build_tx(address, 69, 5, b"q", &key)).unwrap();

    // Beyond the gap cap (expected + 64): rejected.
    let far = build_tx(address, 70, 5, b"r", &key);
    assert!(matches!(mp.add_tx(&far), Err(MempoolError::NonceGap { got: 70, expected: 5 })));
}

#[test]
fn wire_signature_verifies_against_sender_key() {
    use bedrock::mempool::{parse_tx, verify_signature};

    let (key, address) = signer(1);
    let raw = build_tx(address, 3, 9, b"hello", &key);
    let tx = parse_tx(&raw).unwrap();

    assert_eq!(tx.sender, address);
    assert_eq!(tx.nonce, 3);
    assert_eq!(tx.fee, 9);
    assert_eq!(tx.payload(), b"hello");
    assert!(verify_signature(&tx, &key.verifying_key()));

    // Another key does not verify; neither does tampered payload bytes.
    let (other, _) = signer(2);
    assert!(!verify_signature(&tx, &other.verifying_key()));

    let mut tampered = raw.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xFF;
    let tampered_tx = parse_tx(&tampered).unwrap();
    assert!(!verify_signature(&tampered_tx, &key.verifying_key()));
}

#[test]
fn full_pool_evicts_lowest_fee() {
    let cfg = MempoolConfig { max_size: 2, ..Default::default() };
    let mp = Mempool::new(cfg, None);

    let low = tx_with_fee(1, 0, 10, b"low");
    let mid = tx_with_fee(2, 0, 20, b"mid");
    let low_hash = mp.add_tx(&low).unwrap();
    mp.add_tx(&mid).unwrap();

    // Cheaper than the floor: rejected outright.
    let cheaper = tx_with_fee(3, 0, 10, b"cheap");
    assert!(matches!(mp.add_tx(&cheaper), Err(MempoolError::FullAndFeeTooLow)));

    // Richer: the lowest-fee member is evicted and cached.
    let rich = tx_with_fee(4, 0, 30, b"rich");
    mp.add_tx(&rich).unwrap();
    assert_eq!(mp.size(), 2);
    assert!(!mp.has(&low_hash));
    assert!(matches!(mp.add_tx(&low), Err(MempoolError::RecentlyProcessed)));
}
