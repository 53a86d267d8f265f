//! Proves that an untrusted peer's claimed `CoinState` is included in the
//! chain the most recently validated weight proof anchors (spec.md §4.E,
//! §4.E.1). Grounded directly on `WalletNode.validate_received_state_from_peer`
//! and `WalletNode.validate_block_inclusion` in `wallet_node.py`.

use crate::{
    config::{HEADER_BLOCK_BATCH_SIZE, PLOT_SIGNATURE_CHECK_TAIL, RECENT_CHAIN_LOOKBACK},
    external::{CoinRecord, PeerInterface, WalletStateStore},
    peer_cache::PeerRequestCache,
    plot_signature::verify_plot_signature,
};
use lc_common::{CoinState, HeaderBlock, WeightProof};
use log::{debug, warn};

/// `close(9999)` is the disposition for every hard misbehavior this
/// validator can detect (spec.md §7).
const CLOSE_CODE_MISBEHAVIOR: u16 = crate::config::CLOSE_CODE_MISBEHAVIOR;

pub struct CoinStateValidator<'a> {
    wallet: &'a dyn WalletStateStore,
    weight_proof: &'a WeightProof,
}

impl<'a> CoinStateValidator<'a> {
    pub fn new(wallet: &'a dyn WalletStateStore, weight_proof: &'a WeightProof) -> Self {
        Self {
            wallet,
            weight_proof,
        }
    }

    fn can_use_cache(&self, s: &CoinState, cache: &PeerRequestCache, fork_height: Option<u32>) -> bool {
        if cache.get_validated_state(&s.hash()).is_none() {
            return false;
        }
        match fork_height {
            None => true,
            Some(fork) => {
                let created_ok = s.created_height.map(|h| h <= fork).unwrap_or(true);
                let spent_ok = s.spent_height.map(|h| h <= fork).unwrap_or(true);
                created_ok && spent_ok
            }
        }
    }

    async fn fetch_header(
        &self,
        height: u32,
        peer: &dyn PeerInterface,
        cache: &mut PeerRequestCache,
        skip_cache: bool,
    ) -> Option<HeaderBlock> {
        if !skip_cache {
            if let Some(block) = cache.get_block(height) {
                return Some(block.clone());
            }
        }
        let blocks = peer.request_header_blocks(height, height).await?;
        let block = blocks.into_iter().next()?;
        if !skip_cache {
            cache.insert_block(height, block.clone());
        }
        Some(block)
    }

    async fn fetch_ses(
        &self,
        height: u32,
        peer: &dyn PeerInterface,
        cache: &mut PeerRequestCache,
    ) -> Option<crate::peer_cache::SesInfoResponse> {
        if let Some(res) = cache.get_ses(height) {
            return Some(res.clone());
        }
        let res = peer.request_ses_hashes(height, height + 32).await?;
        cache.insert_ses(height, res.clone());
        Some(res)
    }

    /// spec.md §4.E. Returns `true` if `s` is provably included, `false`
    /// if the peer is misbehaving or unable to prove it (in which case a
    /// hard misbehavior also closes the peer).
    pub async fn validate(
        &self,
        s: CoinState,
        peer: &dyn PeerInterface,
        cache: &mut PeerRequestCache,
        fork_height: Option<u32>,
    ) -> bool {
        if self.can_use_cache(&s, cache, fork_height) {
            return true;
        }

        let local: Option<CoinRecord> = self.wallet.get_coin(s.coin.id()).await;
        let current_spent_height = local.and_then(|l| l.spent_height());

        if let Some(local) = local {
            if current_spent_height == s.spent_height && Some(local.confirmed_block_height) == s.created_height {
                return true;
            }
        }

        let mut reorg_mode = false;
        let mut confirmed_height = s.created_height;
        if local.is_some() && s.created_height.is_none() {
            reorg_mode = true;
            confirmed_height = local.map(|l| l.confirmed_block_height);
        }

        let Some(confirmed_height) = confirmed_height else {
            return false;
        };

        let Some(state_block) = self.fetch_header(confirmed_height, peer, cache, reorg_mode).await else {
            return false;
        };
        let Some(ftb) = &state_block.foliage_transaction_block else {
            return false;
        };
        let proof = peer
            .request_additions(state_block.header_hash, s.coin.puzzle_hash, ftb.additions_root)
            .await;
        if !proof.included {
            warn!("additions proof failed for coin {}", s.coin.id());
            peer.close(CLOSE_CODE_MISBEHAVIOR).await;
            return false;
        }
        if !self.validate_block_inclusion(&state_block, peer, cache).await {
            return false;
        }

        // Un-spend check: peer claims a previously-spent coin is now
        // unspent without telling us about a reorg.
        if s.spent_height.is_none() {
            if let (Some(_local), Some(local_spent)) = (local, current_spent_height) {
                let spent_block = match self.fetch_header(local_spent, peer, cache, true).await {
                    Some(b) => b,
                    None => return false,
                };
                let Some(ftb) = &spent_block.foliage_transaction_block else {
                    return false;
                };
                let proof = peer
                    .request_removals(spent_block.header_hash, s.coin.id(), ftb.removals_root)
                    .await;
                if !proof.included {
                    warn!("removals proof failed while checking un-spend for coin {}", s.coin.id());
                    peer.close(CLOSE_CODE_MISBEHAVIOR).await;
                    return false;
                }
                if !self.validate_block_inclusion(&spent_block, peer, cache).await {
                    return false;
                }
            }
        }

        if let Some(spent_height) = s.spent_height {
            let spent_block = match self.fetch_header(spent_height, peer, cache, false).await {
                Some(b) => b,
                None => return false,
            };
            let Some(ftb) = &spent_block.foliage_transaction_block else {
                return false;
            };
            let proof = peer
                .request_removals(spent_block.header_hash, s.coin.id(), ftb.removals_root)
                .await;
            if !proof.included {
                warn!("removals proof failed for coin {}", s.coin.id());
                peer.close(CLOSE_CODE_MISBEHAVIOR).await;
                return false;
            }
            if !self.validate_block_inclusion(&spent_block, peer, cache).await {
                return false;
            }
        }

        cache.insert_validated_state(s);
        true
    }

    /// spec.md §4.E.1
    pub async fn validate_block_inclusion(
        &self,
        block: &HeaderBlock,
        peer: &dyn PeerInterface,
        cache: &mut PeerRequestCache,
    ) -> bool {
        if let Some(local_hash) = self.wallet.local_header_hash_at(block.height).await {
            if local_hash == block.header_hash {
                return true;
            }
        }

        let wp = self.weight_proof;
        let first_recent = wp.recent_chain_data[0].height;

        if block.height >= first_recent {
            let index = (block.height - first_recent) as usize;
            return wp
                .recent_chain_data
                .get(index)
                .map(|b| b.header_hash == block.header_hash)
                .unwrap_or(false);
        }

        let start = block.height + 1;
        let compare_to_recent;
        let end;
        let mut inserted = None;

        if start > first_recent.saturating_sub(RECENT_CHAIN_LOOKBACK) {
            compare_to_recent = true;
            end = first_recent;
        } else {
            let Some(ses_response) = self.fetch_ses(block.height, peer, cache).await else {
                debug!("failed to fetch ses info at height {}", block.height);
                return false;
            };
            let Some(&ses_0) = ses_response.reward_chain_hash.first() else {
                return false;
            };
            let Some(&last_height) = ses_response.heights.first().and_then(|h| h.last()) else {
                return false;
            };
            end = last_height;

            let mut current_ses_idx = None;
            for (idx, ses) in wp.sub_epochs.iter().enumerate() {
                if idx + 3 > wp.sub_epochs.len() {
                    break;
                }
                if ses.reward_chain_hash == ses_0 {
                    current_ses_idx = Some(idx);
                    break;
                }
            }
            let Some(idx) = current_ses_idx else {
                debug!("no matching sub-epoch summary for block {}", block.height);
                return false;
            };
            inserted = wp.sub_epochs.get(idx + 2).copied();
            compare_to_recent = false;
        }

        let mut blocks: Vec<HeaderBlock> = Vec::new();
        let mut i = start - (start % HEADER_BLOCK_BATCH_SIZE);
        while i <= end {
            let request_start = i.min(end);
            let request_end = (i + HEADER_BLOCK_BATCH_SIZE - 1).min(end);
            let range = if let Some(cached) = cache.get_block_range(request_start, request_end) {
                cached.clone()
            } else {
                let Some(fetched) = peer.request_header_blocks(request_start, request_end).await else {
                    return false;
                };
                cache.insert_block_range(request_start, request_end, fetched.clone());
                fetched
            };
            blocks.extend(range.into_iter().filter(|b| b.height >= start));
            i += HEADER_BLOCK_BATCH_SIZE;
        }

        if blocks.is_empty() {
            return false;
        }

        if compare_to_recent && wp.recent_chain_data[0].header_hash != blocks.last().unwrap().header_hash {
            return false;
        }

        let mut reversed = blocks.clone();
        reversed.reverse();

        if !compare_to_recent {
            let Some(last_slot) = reversed.first().and_then(|b| b.finished_sub_slots.last()) else {
                return false;
            };
            match inserted {
                Some(ins) if last_slot.reward_chain_hash == ins.reward_chain_hash => {}
                _ => return false,
            }
        }

        let last_idx = reversed.len() - 1;
        for (idx, en_block) in reversed.iter().enumerate() {
            let (next_block_rc_hash, prev_hash) = if idx == last_idx {
                (block.reward_chain_block.reward_chain_block_hash, block.header_hash)
            } else {
                (
                    reversed[idx + 1].reward_chain_block.reward_chain_block_hash,
                    reversed[idx + 1].header_hash,
                )
            };

            if en_block.prev_header_hash != prev_hash {
                return false;
            }

            if !en_block.finished_sub_slots.is_empty() {
                let mut reversed_slots = en_block.finished_sub_slots.clone();
                reversed_slots.reverse();
                for w in 0..reversed_slots.len() - 1 {
                    if reversed_slots[w + 1].reward_chain_hash != reversed_slots[w].end_of_slot_vdf_challenge {
                        return false;
                    }
                }
                if next_block_rc_hash != reversed_slots.last().unwrap().end_of_slot_vdf_challenge {
                    return false;
                }
            } else if next_block_rc_hash != en_block.reward_chain_block.reward_chain_ip_vdf_challenge {
                return false;
            }

            if idx + PLOT_SIGNATURE_CHECK_TAIL > reversed.len()
                && !verify_plot_signature(
                    &en_block.reward_chain_block.plot_public_key,
                    &en_block.foliage_block_data_hash,
                    &en_block.foliage_block_data_signature,
                )
            {
                return false;
            }
        }

        true
    }
}
