//! Per-peer memoization of header blocks, sub-epoch-summary responses,
//! header-block-range responses, and already-validated coin states
//! (spec.md §4.C). Grounded on the teacher's `LruCache`-backed peer caches
//! in `daemon/src/p2p/peer_list/peer.rs` (`txs_cache`, `blocks_propagation`)
//! and on `chia.wallet.util.wallet_sync_utils.PeerRequestCache`.

use lc_common::{Bytes32, CoinState, HeaderBlock};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SesInfoResponse {
    pub reward_chain_hash: Vec<Bytes32>,
    pub heights: Vec<Vec<u32>>,
}

/// Pure in-memory memoization, single-writer-per-key (the task handling
/// that peer). All methods are idempotent.
#[derive(Default)]
pub struct PeerRequestCache {
    blocks: HashMap<u32, HeaderBlock>,
    block_ranges: HashMap<(u32, u32), Vec<HeaderBlock>>,
    ses_requests: HashMap<u32, SesInfoResponse>,
    validated_states: HashMap<Bytes32, CoinState>,
}

impl PeerRequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_block(&self, height: u32) -> Option<&HeaderBlock> {
        self.blocks.get(&height)
    }

    pub fn insert_block(&mut self, height: u32, block: HeaderBlock) {
        self.blocks.insert(height, block);
    }

    pub fn get_block_range(&self, start: u32, end: u32) -> Option<&Vec<HeaderBlock>> {
        self.block_ranges.get(&(start, end))
    }

    pub fn insert_block_range(&mut self, start: u32, end: u32, blocks: Vec<HeaderBlock>) {
        self.block_ranges.insert((start, end), blocks);
    }

    pub fn get_ses(&self, height: u32) -> Option<&SesInfoResponse> {
        self.ses_requests.get(&height)
    }

    pub fn insert_ses(&mut self, height: u32, response: SesInfoResponse) {
        self.ses_requests.insert(height, response);
    }

    pub fn get_validated_state(&self, hash: &Bytes32) -> Option<&CoinState> {
        self.validated_states.get(hash)
    }

    pub fn insert_validated_state(&mut self, state: CoinState) {
        self.validated_states.insert(state.hash(), state);
    }

    /// Removes every entry whose key (or any contained block) has height
    /// greater than `h`. Idempotent — called on reorg signals; after it
    /// returns, any in-flight request for `height > h` must be discarded
    /// rather than cached (enforced by callers, see `reconciler`).
    pub fn clear_after_height(&mut self, h: u32) {
        self.blocks.retain(|&height, _| height <= h);
        self.block_ranges.retain(|&(start, _end), _| start <= h);
        self.ses_requests.retain(|&height, _| height <= h);
        self.validated_states
            .retain(|_, state| state.created_height.map(|c| c <= h).unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_common::{Coin, RewardChainBlock};

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
    fn clear_after_height_is_idempotent_and_prunes_future_entries() {
        let mut cache = PeerRequestCache::new();
        cache.insert_block(10, header(10));
        cache.insert_block(20, header(20));
        cache.insert_block_range(15, 30, vec![header(15), header(30)]);

        cache.clear_after_height(15);
        assert!(cache.get_block(10).is_some());
        assert!(cache.get_block(20).is_none());
        assert!(cache.get_block_range(15, 30).is_none());

        // Idempotent: calling again changes nothing further.
        cache.clear_after_height(15);
        assert!(cache.get_block(10).is_some());
    }

    #[test]
    fn validated_states_prune_by_created_height() {
        let mut cache = PeerRequestCache::new();
        let coin = Coin::new(Bytes32::zero(), Bytes32::zero(), 1);
        let old = CoinState::new(coin, Some(5), None);
        let future = CoinState::new(coin, Some(50), None);
        cache.insert_validated_state(old);
        cache.insert_validated_state(future);
        cache.clear_after_height(10);
        assert!(cache.get_validated_state(&old.hash()).is_some());
        assert!(cache.get_validated_state(&future.hash()).is_none());
    }
}
