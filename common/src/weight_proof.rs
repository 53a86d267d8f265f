use crate::crypto::Bytes32;
use serde::{Deserialize, Serialize};

/// The part of a header carrying Merkle roots for additions (newly
/// created coins) and removals (spent coins), plus the block's timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoliageTransactionBlock {
    pub additions_root: Bytes32,
    pub removals_root: Bytes32,
    pub timestamp: u64,
}

/// The end-of-slot VDF of one finished sub-slot, and the reward-chain hash
/// that anchors it into the reward chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedSubSlot {
    pub reward_chain_hash: Bytes32,
    pub end_of_slot_vdf_challenge: Bytes32,
}

/// Reward-chain and proof-of-space fields needed to chain-link headers and
/// to verify the plot signature over foliage block data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardChainBlock {
    pub reward_chain_block_hash: Bytes32,
    /// Challenge carried by the reward-chain infusion-point VDF; used to
    /// chain-link blocks that end no finished sub-slot (spec.md §4.E.1).
    pub reward_chain_ip_vdf_challenge: Bytes32,
    pub plot_public_key: Bytes32,
}

/// An opaque chain header. Carries everything the block-inclusion proof
/// (spec.md §4.E.1) needs and nothing more — full block bodies, consensus
/// weight derivation and proof-of-space validation are external collaborator
/// concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderBlock {
    pub height: u32,
    pub weight: u128,
    pub header_hash: Bytes32,
    pub prev_header_hash: Bytes32,
    pub foliage_transaction_block: Option<FoliageTransactionBlock>,
    pub reward_chain_block: RewardChainBlock,
    pub finished_sub_slots: Vec<FinishedSubSlot>,
    /// Foliage-block-data hash and the plot signature over it (64-byte
    /// ed25519 signature, see `lc_wallet::plot_signature`).
    pub foliage_block_data_hash: Bytes32,
    pub foliage_block_data_signature: [u8; 64],
}

/// A fingerprint of one sub-epoch, used only to anchor older header ranges
/// to a weight proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubEpochSummary {
    pub reward_chain_hash: Bytes32,
}

/// A compact proof that a chain exists up to a claimed peak: a sequence of
/// sub-epoch summaries plus the contiguous recent-chain tail ending at the
/// peak it proves.
///
/// Invariant: `recent_chain_data` is non-empty and ordered by height
/// ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightProof {
    pub sub_epochs: Vec<SubEpochSummary>,
    pub recent_chain_data: Vec<HeaderBlock>,
}

impl WeightProof {
    pub fn is_well_formed(&self) -> bool {
        if self.recent_chain_data.is_empty() {
            return false;
        }
        self.recent_chain_data
            .windows(2)
            .all(|w| w[0].height < w[1].height)
    }

    pub fn peak(&self) -> &HeaderBlock {
        self.recent_chain_data
            .last()
            .expect("recent_chain_data is non-empty per is_well_formed")
    }

    /// A cache key for the per-process `valid_wp_cache` (spec.md §4.F):
    /// a stable hash of the proof's shape, derived from the peak header
    /// hash and sub-epoch count (cheap, and collision-free in practice
    /// since it is only used to dedupe re-validation of the same proof).
    pub fn content_hash(&self) -> Bytes32 {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.peak().header_hash.as_bytes());
        buf.extend_from_slice(&(self.sub_epochs.len() as u64).to_be_bytes());
        buf.extend_from_slice(&(self.recent_chain_data.len() as u64).to_be_bytes());
        crate::crypto::hash_bytes(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u32) -> HeaderBlock {
        HeaderBlock {
            height,
            weight: height as u128,
            header_hash: Bytes32::new([height as u8; 32]),
            prev_header_hash: Bytes32::zero(),
            foliage_transaction_block: None,
            reward_chain_block: RewardChainBlock {
                reward_chain_block_hash: Bytes32::zero(),
                reward_chain_ip_vdf_challenge: Bytes32::zero(),
                plot_public_key: Bytes32::zero(),
            },
            finished_sub_slots: vec![],
            foliage_block_data_hash: Bytes32::zero(),
            foliage_block_data_signature: [0u8; 64],
        }
    }

    #[test]
    fn rejects_empty_recent_chain() {
        let wp = WeightProof {
            sub_epochs: vec![],
            recent_chain_data: vec![],
        };
        assert!(!wp.is_well_formed());
    }

    #[test]
    fn rejects_non_ascending_heights() {
        let wp = WeightProof {
            sub_epochs: vec![],
            recent_chain_data: vec![header(5), header(4)],
        };
        assert!(!wp.is_well_formed());
    }

    #[test]
    fn accepts_ascending_chain() {
        let wp = WeightProof {
            sub_epochs: vec![],
            recent_chain_data: vec![header(4), header(5), header(6)],
        };
        assert!(wp.is_well_formed());
        assert_eq!(wp.peak().height, 6);
    }
}
