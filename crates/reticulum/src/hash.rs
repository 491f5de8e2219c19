use std::fmt;

use sha2::{Digest, Sha256};

pub const HASH_SIZE: usize = 32;
pub const ADDRESS_HASH_SIZE: usize = 16;
pub const NAME_HASH_SIZE: usize = 10;

/// A full SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; HASH_SIZE]);

/// A truncated (16-byte) destination/identity hash, as used throughout LXMF
/// and Reticulum wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressHash([u8; ADDRESS_HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn new_from_slice(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Hash over multiple concatenated segments, without an intermediate
    /// allocation for the concatenation.
    pub fn new_from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn truncated(&self) -> AddressHash {
        AddressHash::new_from_hash(self)
    }
}

impl AddressHash {
    pub const fn new(bytes: [u8; ADDRESS_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn new_empty() -> Self {
        Self([0u8; ADDRESS_HASH_SIZE])
    }

    pub fn new_from_hash(hash: &Hash) -> Self {
        let mut out = [0u8; ADDRESS_HASH_SIZE];
        out.copy_from_slice(&hash.0[..ADDRESS_HASH_SIZE]);
        Self(out)
    }

    pub fn new_from_slice(data: &[u8]) -> Self {
        Hash::new_from_slice(data).truncated()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_HASH_SIZE] {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex_string(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s.trim())?;
        let mut out = [0u8; ADDRESS_HASH_SIZE];
        if bytes.len() != ADDRESS_HASH_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl From<[u8; ADDRESS_HASH_SIZE]> for AddressHash {
    fn from(bytes: [u8; ADDRESS_HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<AddressHash> for [u8; ADDRESS_HASH_SIZE] {
    fn from(hash: AddressHash) -> Self {
        hash.0
    }
}

impl fmt::Display for AddressHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_string())
    }
}

/// Name-field hash truncated to 10 bytes, matching Reticulum's destination
/// naming convention (`app_name.aspect1.aspect2...`).
pub fn name_hash(full_name: &str) -> [u8; NAME_HASH_SIZE] {
    let digest = Hash::new_from_slice(full_name.as_bytes());
    let mut out = [0u8; NAME_HASH_SIZE];
    out.copy_from_slice(&digest.as_slice()[..NAME_HASH_SIZE]);
    out
}

/// Destination hash for a named, identity-bound destination: truncated
/// SHA-256 over `name_hash ‖ identity_hash`.
pub fn destination_hash(full_name: &str, identity_hash: &AddressHash) -> AddressHash {
    let name = name_hash(full_name);
    Hash::new_from_parts(&[&name, identity_hash.as_slice()]).truncated()
}
