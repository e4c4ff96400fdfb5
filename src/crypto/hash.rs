use crate::types::Hash;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&out);
    Hash(bytes)
}

/// Merkle root of per-tx hashes. Empty list gives the zero hash.
pub fn compute_tx_root(txs: &[Vec<u8>]) -> Hash {
    if txs.is_empty() {
        return Hash::ZERO;
    }
    let hashes: Vec<Hash> = txs.iter().map(|tx| sha256(tx)).collect();
    compute_merkle_root(hashes)
}

/// Binary Merkle root by iterative pairing. An odd level duplicates its
/// last hash.
pub fn compute_merkle_root(mut hashes: Vec<Hash>) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }
    while hashes.len() > 1 {
        if hashes.len() % 2 != 0 {
            let last = *hashes.last().expect("non-empty level");
            hashes.push(last);
        }
        let mut next = Vec::with_capacity(hashes.len() / 2);
        for pair in hashes.chunks(2) {
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&pair[0].0);
            combined[32..].copy_from_slice(&pair[1].0);
            next.push(sha256(&combined));
        }
        hashes = next;
    }
    hashes[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tx_root_is_zero() {
        assert_eq!(compute_tx_root(&[]), Hash::ZERO);
    }

    #[test]
    fn single_tx_root_is_its_hash() {
        let txs = vec![b"tx1".to_vec()];
        assert_eq!(compute_tx_root(&txs), sha256(b"tx1"));
    }

    #[test]
    fn odd_level_duplicates_last() {
        let txs = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let ha = sha256(b"a");
        let hb = sha256(b"b");
        let hc = sha256(b"c");

        let pair = |l: Hash, r: Hash| {
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&l.0);
            combined[32..].copy_from_slice(&r.0);
            sha256(&combined)
        };
        let expected = pair(pair(ha, hb), pair(hc, hc));
        assert_eq!(compute_tx_root(&txs), expected);
    }

    #[test]
    fn root_depends_on_order() {
        let ab = compute_tx_root(&[b"a".to_vec(), b"b".to_vec()]);
        let ba = compute_tx_root(&[b"b".to_vec(), b"a".to_vec()]);
        assert_ne!(ab, ba);
    }
}
