use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use thiserror::Error;

pub const HASH_SIZE: usize = 32;

/// A 32-byte chain identifier: block hash, coin id, puzzle hash, etc.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Serialize, Deserialize)]
pub struct Bytes32([u8; HASH_SIZE]);

impl Bytes32 {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Bytes32(bytes)
    }

    pub const fn zero() -> Self {
        Bytes32::new([0; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

impl Display for Bytes32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Error)]
pub enum Bytes32ParseError {
    #[error("invalid hex string")]
    InvalidHex,
    #[error("expected {HASH_SIZE} bytes, got {0}")]
    WrongLength(usize),
}

impl FromStr for Bytes32 {
    type Err = Bytes32ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| Bytes32ParseError::InvalidHex)?;
        let len = bytes.len();
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| Bytes32ParseError::WrongLength(len))?;
        Ok(Bytes32::new(bytes))
    }
}

/// Hash an arbitrary byte slice with blake3, the hash used for every
/// identity (`Coin::id`, `CoinState::hash`) in this workspace.
pub fn hash_bytes(data: &[u8]) -> Bytes32 {
    Bytes32::new(*blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_hex() {
        let h = hash_bytes(b"hello");
        let parsed: Bytes32 = h.to_hex().parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn distinct_inputs_hash_differently() {
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
    }
}
