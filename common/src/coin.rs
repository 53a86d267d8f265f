use crate::crypto::{hash_bytes, Bytes32};
use serde::{Deserialize, Serialize};

/// An unspent transaction output, identified by `hash(parent_id || puzzle_hash || amount)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub parent_id: Bytes32,
    pub puzzle_hash: Bytes32,
    pub amount: u64,
}

impl Coin {
    pub fn new(parent_id: Bytes32, puzzle_hash: Bytes32, amount: u64) -> Self {
        Self {
            parent_id,
            puzzle_hash,
            amount,
        }
    }

    /// `coin_id = hash(parent_id || puzzle_hash || amount)`
    pub fn id(&self) -> Bytes32 {
        let mut buf = Vec::with_capacity(HASH_SIZE * 2 + 8);
        buf.extend_from_slice(self.parent_id.as_bytes());
        buf.extend_from_slice(self.puzzle_hash.as_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        hash_bytes(&buf)
    }
}

use crate::crypto::HASH_SIZE;

/// A claim from a peer about the lifecycle of a coin: when it was created
/// and (optionally) when it was spent. Identity is the hash of the triple.
///
/// Invariant: if `spent_height` is set, `created_height` must also be set
/// and `spent_height >= created_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoinState {
    pub coin: Coin,
    pub created_height: Option<u32>,
    pub spent_height: Option<u32>,
}

impl CoinState {
    pub fn new(coin: Coin, created_height: Option<u32>, spent_height: Option<u32>) -> Self {
        Self {
            coin,
            created_height,
            spent_height,
        }
    }

    /// Structural invariant checked at construction boundaries (deserialization,
    /// peer message decode) rather than on every read.
    pub fn is_well_formed(&self) -> bool {
        match (self.created_height, self.spent_height) {
            (None, Some(_)) => false,
            (Some(created), Some(spent)) => spent >= created,
            _ => true,
        }
    }

    pub fn hash(&self) -> Bytes32 {
        let mut buf = Vec::with_capacity(HASH_SIZE + 16);
        buf.extend_from_slice(self.coin.id().as_bytes());
        buf.extend_from_slice(&self.created_height.unwrap_or(u32::MAX).to_be_bytes());
        buf.extend_from_slice(&self.spent_height.unwrap_or(u32::MAX).to_be_bytes());
        hash_bytes(&buf)
    }
}
