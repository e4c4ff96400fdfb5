use std::fmt;

/// 32-byte SHA-256 hash. The zero value means "unset".
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

/// 32-byte validator/account identifier, derived as SHA-256 of a public key.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(b: &[u8]) -> Option<Hash> {
        if b.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Some(Hash(out))
    }

    pub fn from_hex(s: &str) -> Option<Hash> {
        hex::decode(s).ok().and_then(|b| Hash::from_slice(&b))
    }
}

impl Address {
    pub const ZERO: Address = Address([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Address::ZERO
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(b: &[u8]) -> Option<Address> {
        if b.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Some(Address(out))
    }

    pub fn from_hex(s: &str) -> Option<Address> {
        hex::decode(s).ok().and_then(|b| Address::from_slice(&b))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..8]))
    }
}
