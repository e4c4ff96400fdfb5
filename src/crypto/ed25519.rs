use std::fs;
use std::path::Path;

use anyhow::Result;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::crypto::hash::sha256;
use crate::types::Address;

pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let sk = SigningKey::generate(&mut OsRng);
    let vk = sk.verifying_key();
    (sk, vk)
}

pub fn sign(sk: &SigningKey, msg: &[u8]) -> [u8; 64] {
    let sig: Signature = sk.sign(msg);
    sig.to_bytes()
}

pub fn verify(vk: &VerifyingKey, msg: &[u8], sig_bytes: &[u8; 64]) -> bool {
    let sig = Signature::from_bytes(sig_bytes);
    vk.verify_strict(msg, &sig).is_ok()
}

/// Verify against a raw 32-byte public key. Rejects keys that do not parse.
pub fn verify_bytes(pk: &[u8; 32], msg: &[u8], sig_bytes: &[u8; 64]) -> bool {
    match VerifyingKey::from_bytes(pk) {
        Ok(vk) => verify(&vk, msg, sig_bytes),
        Err(_) => false,
    }
}

/// Derive the 32-byte address for a public key: SHA-256 of the key bytes.
pub fn address_from_pubkey(vk: &VerifyingKey) -> Address {
    Address(sha256(vk.as_bytes()).0)
}

pub fn load_or_generate_keypair<P: AsRef<Path>>(path: P) -> Result<(SigningKey, VerifyingKey)> {
    let path = path.as_ref();

    if path.exists() {
        let bytes = fs::read(path)?;
        if bytes.len() != 32 {
            anyhow::bail!("invalid key file length: {}", bytes.len());
        }
        let mut sk_bytes = [0u8; 32];
        sk_bytes.copy_from_slice(&bytes);
        let signing = SigningKey::from_bytes(&sk_bytes);
        let verify = signing.verifying_key();
        Ok((signing, verify))
    } else {
        let (signing, verify) = generate_keypair();
        fs::write(path, signing.to_bytes())?;
        Ok((signing, verify))
    }
}
