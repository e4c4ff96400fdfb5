//! Transaction wire format and admission validation.
//!
//! Canonical layout (little-endian integers):
//!   [0:32]   sender address
//!   [32:40]  nonce
//!   [40:48]  fee
//!   [48:112] ed25519 signature
//!   [112:]   payload (at least 1 byte)
//!
//! The signature covers sender(32) || nonce(8) || fee(8) || sha256(payload).

use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::crypto::{ed25519, sha256};
use crate::mempool::{MempoolConfig, MempoolError, MempoolTx};
use crate::storage::Store;
use crate::types::Address;

pub const TX_HEADER_SIZE: usize = 32 + 8 + 8 + 64;
pub const MIN_TX_SIZE: usize = TX_HEADER_SIZE + 1;

/// State key prefix under which per-sender nonces live.
pub const NONCE_KEY_PREFIX: &str = "nonce/";

pub fn nonce_key(sender: &Address) -> Vec<u8> {
    format!("{}{}", NONCE_KEY_PREFIX, sender).into_bytes()
}

/// Maximum accepted gap between a tx nonce and the expected next nonce.
const NONCE_GAP_CAP: u64 = 64;

pub fn parse_tx(raw: &[u8]) -> Result<MempoolTx, MempoolError> {
    if raw.len() < MIN_TX_SIZE {
        return Err(MempoolError::TooSmall { got: raw.len(), min: MIN_TX_SIZE });
    }

    let sender = Address::from_slice(&raw[0..32]).expect("32-byte slice");
    let nonce = u64::from_le_bytes(raw[32..40].try_into().expect("8-byte slice"));
    let fee = u64::from_le_bytes(raw[40..48].try_into().expect("8-byte slice"));
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&raw[48..112]);

    Ok(MempoolTx {
        hash: sha256(raw),
        raw: raw.to_vec(),
        fee,
        nonce,
        sender,
        size: raw.len(),
        added_at: std::time::Instant::now(),
        signature,
    })
}

fn signing_payload(sender: &Address, nonce: u64, fee: u64, payload: &[u8]) -> [u8; 80] {
    let mut buf = [0u8; 80];
    buf[0..32].copy_from_slice(&sender.0);
    buf[32..40].copy_from_slice(&nonce.to_le_bytes());
    buf[40..48].copy_from_slice(&fee.to_le_bytes());
    buf[48..80].copy_from_slice(&sha256(payload).0);
    buf
}

/// Checks that need no state access: size bounds, parse, non-zero sender
/// and signature. The sender address is a key hash, so pubkey-based
/// verification happens against state or inside execution, not here.
pub fn validate_stateless(raw: &[u8], cfg: &MempoolConfig) -> Result<MempoolTx, MempoolError> {
    if raw.len() > cfg.max_tx_bytes {
        return Err(MempoolError::TooLarge { got: raw.len(), max: cfg.max_tx_bytes });
    }

    let tx = parse_tx(raw)?;

    if tx.sender.is_zero() {
        return Err(MempoolError::ZeroSender);
    }
    if tx.signature == [0u8; 64] {
        return Err(MempoolError::EmptySignature);
    }

    Ok(tx)
}

/// Replay protection against current state: the nonce must not be below
/// the sender's expected next nonce, and not absurdly far ahead of it.
pub fn validate_stateful(tx: &MempoolTx, state: &dyn Store) -> Result<(), MempoolError> {
    let data = state.get(&nonce_key(&tx.sender))?;

    let expected = match data {
        Some(bytes) if bytes.len() >= 8 => {
            u64::from_le_bytes(bytes[..8].try_into().expect("8-byte slice"))
        }
        _ => 0,
    };

    if tx.nonce < expected {
        return Err(MempoolError::NonceTooLow { got: tx.nonce, expected });
    }
    if tx.nonce > expected + NONCE_GAP_CAP {
        return Err(MempoolError::NonceGap { got: tx.nonce, expected });
    }

    Ok(())
}

/// Verify a transaction signature given the sender's public key.
pub fn verify_signature(tx: &MempoolTx, public_key: &VerifyingKey) -> bool {
    let payload = signing_payload(&tx.sender, tx.nonce, tx.fee, tx.payload());
    ed25519::verify(public_key, &payload, &tx.signature)
}

/// Construct and sign a raw wire transaction.
pub fn build_tx(
    sender: Address,
    nonce: u64,
    fee: u64,
    payload: &[u8],
    signing_key: &SigningKey,
) -> Vec<u8> {
    let mut raw = vec![0u8; TX_HEADER_SIZE + payload.len()];
    raw[0..32].copy_from_slice(&sender.0);
    raw[32..40].copy_from_slice(&nonce.to_le_bytes());
    raw[40..48].copy_from_slice(&fee.to_le_bytes());

    let sig = ed25519::sign(signing_key, &signing_payload(&sender, nonce, fee, payload));
    raw[48..112].copy_from_slice(&sig);
    raw[112..].copy_from_slice(payload);
    raw
}

/// Expected-nonce state entry for a sender, as written by execution.
pub fn encode_nonce(nonce: u64) -> Vec<u8> {
    nonce.to_le_bytes().to_vec()
}

impl MempoolTx {
    pub fn payload(&self) -> &[u8] {
        &self.raw[TX_HEADER_SIZE..]
    }
}
