//! Remembers coin-state updates an untrusted peer delivered ahead of the
//! corresponding peak, so they can be replayed once the peak arrives or we
//! backtrack over it (spec.md §4.D). Grounded directly on
//! `WalletNode.race_cache` / `add_state_to_race_cache` in
//! `wallet_node.py`.

use crate::config::RACE_CACHE_EVICTION_DISTANCE;
use lc_common::{Bytes32, CoinState};
use std::collections::{HashMap, HashSet};

/// Invariant: every key appears exactly once in `order`.
#[derive(Default)]
pub struct RaceCache {
    by_hash: HashMap<Bytes32, HashSet<CoinState>>,
    order: Vec<(u32, Bytes32)>,
}

impl RaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1. Evict every `(rc_height, rc_hash)` with `height - rc_height >=
    ///    RACE_CACHE_EVICTION_DISTANCE`. 2. Insert `coin_state` into the set
    ///    at `header_hash`, appending `(height, header_hash)` to the order
    ///    list if it's a new key.
    pub fn add(&mut self, header_hash: Bytes32, height: u32, coin_state: CoinState) {
        self.order.retain(|&(rc_height, rc_hash)| {
            let evict = height.saturating_sub(rc_height) >= RACE_CACHE_EVICTION_DISTANCE;
            if evict {
                self.by_hash.remove(&rc_hash);
            }
            !evict
        });

        let is_new_key = !self.by_hash.contains_key(&header_hash);
        self.by_hash.entry(header_hash).or_default().insert(coin_state);
        if is_new_key {
            self.order.push((height, header_hash));
        }
    }

    /// Removes and returns every coin-state recorded ahead of `header_hash`.
    pub fn drain_for(&mut self, header_hash: &Bytes32) -> Vec<CoinState> {
        self.order.retain(|&(_, rc_hash)| rc_hash != *header_hash);
        self.by_hash
            .remove(header_hash)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_common::Coin;
    use proptest::prelude::*;

    fn state(amount: u64, created: u32) -> CoinState {
        CoinState::new(Coin::new(Bytes32::zero(), Bytes32::zero(), amount), Some(created), None)
    }

    fn hash_for(n: u8) -> Bytes32 {
        Bytes32::new([n; 32])
    }

    #[test]
    fn evicts_by_height_distance_on_insert() {
        let mut cache = RaceCache::new();
        cache.add(hash_for(10), 10, state(1, 10));
        cache.add(hash_for(100), 100, state(2, 100));
        cache.add(hash_for(150), 150, state(3, 150));
        cache.add(hash_for(260), 260, state(4, 260));

        // At the 260 insert, entries at heights <= 160 (260 - 100) are evicted:
        // height 10 and 100 go, 150 survives (260-150=110 >= 100 -> also evicted).
        assert!(cache.drain_for(&hash_for(10)).is_empty());
        assert!(cache.drain_for(&hash_for(100)).is_empty());
        assert!(cache.drain_for(&hash_for(150)).is_empty());

        let drained = cache.drain_for(&hash_for(260));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0], state(4, 260));
    }

    #[test]
    fn drain_removes_the_entry() {
        let mut cache = RaceCache::new();
        cache.add(hash_for(1), 1, state(1, 1));
        assert_eq!(cache.len(), 1);
        let drained = cache.drain_for(&hash_for(1));
        assert_eq!(drained.len(), 1);
        assert_eq!(cache.len(), 0);
        assert!(cache.drain_for(&hash_for(1)).is_empty());
    }

    #[test]
    fn same_key_inserted_twice_stays_a_single_order_entry() {
        let mut cache = RaceCache::new();
        cache.add(hash_for(1), 1, state(1, 1));
        cache.add(hash_for(1), 1, state(2, 1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.drain_for(&hash_for(1)).len(), 2);
    }

    proptest! {
        /// For any sequence of distinct insert heights within a single byte's
        /// range (so each height maps to its own cache key), after the last
        /// insert every surviving entry is within
        /// RACE_CACHE_EVICTION_DISTANCE of the last height.
        #[test]
        fn entries_older_than_eviction_distance_never_survive(
            heights in proptest::collection::hash_set(0u32..200, 1..50),
        ) {
            let mut cache = RaceCache::new();
            let mut sorted: Vec<u32> = heights.into_iter().collect();
            sorted.sort_unstable();

            for &h in &sorted {
                cache.add(hash_for(h as u8), h, state(1, h));
            }

            if let Some(&last) = sorted.last() {
                for &h in &sorted {
                    let survives = cache.by_hash.contains_key(&hash_for(h as u8));
                    if last.saturating_sub(h) >= RACE_CACHE_EVICTION_DISTANCE {
                        prop_assert!(!survives, "height {h} should have been evicted by {last}");
                    }
                }
            }
        }
    }
}
