//! Per-peer peak reconciliation: new-peak handling, long sync, short-sync
//! backtrack, and coin-state-update application (spec.md §4.G). Grounded on
//! `WalletNode.new_peak_wallet`, `WalletNode.long_sync`,
//! `WalletNode.short_sync_backtrack`, and `WalletNode.receive_state_wallet`
//! in `wallet_node.py`.

use crate::{
    admission::BoundedAdmission,
    config::{self, EngineConfig, ADMISSION_BACKPRESSURE_SLEEP, ADMISSION_WAITING_HIGH_WATERMARK, SUBSCRIPTION_BATCH_SIZE},
    error::SyncError,
    external::{PeerInterface, WalletStateStore},
    peer_cache::PeerRequestCache,
    priority_lock::{Priority, PriorityLock},
    race_cache::RaceCache,
    validator::CoinStateValidator,
    weight_proof_gate::{ValidWeightProofCache, WeightProofGate},
};
use lc_common::{current_time_in_secs, Bytes32, CoinState, HeaderBlock, WeightProof};
use log::warn;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;

/// spec.md §3 `PeerState`, plus the two `[EXPANDED]` fields §3 of
/// SPEC_FULL.md adds: `local_node_synced` and this reconciler's share of
/// the `_node_peaks` table (folded in as `last_seen_peak`).
struct PeerHandle {
    peer: Arc<dyn PeerInterface>,
    trusted: bool,
    last_seen_peak: Option<(u32, Bytes32)>,
    /// Added to the conceptual `synced_peers` set once a sync pass completes.
    synced: bool,
    /// Set once a *trusted* peer completes its first sync; reset implicitly
    /// when its `PeerHandle` is dropped on disconnect (spec.md §4.G.5).
    local_node_synced: bool,
    cache: PeerRequestCache,
}

pub struct PeakReconciler {
    lock: Arc<PriorityLock>,
    admission: Arc<BoundedAdmission>,
    wallet: Arc<dyn WalletStateStore>,
    config: EngineConfig,
    peers: Mutex<HashMap<Bytes32, PeerHandle>>,
    race_cache: Mutex<RaceCache>,
    wp_cache: Mutex<ValidWeightProofCache>,
    current_weight_proof: Mutex<Option<WeightProof>>,
    /// Serializes individual `apply_coin_states` calls within `receive_state`
    /// (`WalletNode.new_state_lock` in `wallet_node.py`). Narrower than
    /// `sync_guard` below; the two are separate locks precisely so holding
    /// one while recursing into the other never deadlocks.
    new_state_mutex: Mutex<()>,
    /// The wallet-state-manager lock (`WalletNode.wallet_state_manager.lock`):
    /// held around an entire `long_sync`/`short_sync_backtrack` pass so a
    /// second `new_peak` can't interleave its own sync against the same
    /// wallet state (spec.md §4.G: "if syncing, hold the wallet-state-manager
    /// lock around it").
    sync_guard: Mutex<()>,
    local_peak_weight: Mutex<u128>,
    sync_mode: AtomicBool,
}

impl PeakReconciler {
    pub fn new(
        lock: Arc<PriorityLock>,
        admission: Arc<BoundedAdmission>,
        wallet: Arc<dyn WalletStateStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            lock,
            admission,
            wallet,
            config,
            peers: Mutex::new(HashMap::new()),
            race_cache: Mutex::new(RaceCache::new()),
            wp_cache: Mutex::new(ValidWeightProofCache::new()),
            current_weight_proof: Mutex::new(None),
            new_state_mutex: Mutex::new(()),
            sync_guard: Mutex::new(()),
            local_peak_weight: Mutex::new(0),
            sync_mode: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.sync_mode.load(Ordering::SeqCst)
    }

    /// spec.md §4.G.5.
    pub async fn on_connect(&self, peer: Arc<dyn PeerInterface>) {
        let peer_id = peer.peer_id();
        let trusted = self.config.is_trusted(&peer_id);
        self.peers.lock().await.insert(
            peer_id,
            PeerHandle {
                peer,
                trusted,
                last_seen_peak: None,
                synced: false,
                local_node_synced: false,
                cache: PeerRequestCache::new(),
            },
        );
    }

    /// spec.md §4.G.5: drops the peer from the synced-peers set, discards
    /// its cache, and removes its `_node_peaks` entry, all by removing its
    /// `PeerHandle` outright.
    pub async fn on_disconnect(&self, peer_id: Bytes32) {
        self.peers.lock().await.remove(&peer_id);
    }

    async fn peer_snapshot(&self, peer_id: Bytes32) -> Option<(Arc<dyn PeerInterface>, bool, bool)> {
        let peers = self.peers.lock().await;
        peers.get(&peer_id).map(|h| (h.peer.clone(), h.trusted, h.synced))
    }

    async fn is_peer_synced(&self, peer: &dyn PeerInterface, peak_height: u32) -> bool {
        if self.config.testing {
            return true;
        }
        let Some(header) = peer.request_block_header(peak_height).await else {
            return false;
        };
        let Some(ftb) = header.foliage_transaction_block else {
            return false;
        };
        ftb.timestamp + config::PEER_SYNCED_TIMESTAMP_THRESHOLD_SECS >= current_time_in_secs()
    }

    async fn disconnect_untrusted_peers(&self) {
        let to_close: Vec<(Bytes32, Arc<dyn PeerInterface>)> = {
            let peers = self.peers.lock().await;
            peers
                .iter()
                .filter(|(_, h)| !h.trusted)
                .map(|(id, h)| (*id, h.peer.clone()))
                .collect()
        };
        for (id, peer) in to_close {
            peer.close(config::CLOSE_CODE_MISBEHAVIOR).await;
            self.on_disconnect(id).await;
        }
    }

    /// spec.md §4.G, entry from new-peak.
    pub async fn new_peak(
        &self,
        peer_id: Bytes32,
        peak_height: u32,
        peak_hash: Bytes32,
        peak_weight: u128,
    ) -> Result<(), SyncError> {
        {
            let mut peers = self.peers.lock().await;
            let Some(handle) = peers.get_mut(&peer_id) else {
                return Ok(());
            };
            handle.last_seen_peak = Some((peak_height, peak_hash));
        }

        if *self.local_peak_weight.lock().await >= peak_weight {
            return Ok(());
        }

        let _guard = self.lock.acquire(Priority::Low).await?;

        if *self.local_peak_weight.lock().await >= peak_weight {
            return Ok(());
        }

        let Some((peer, trusted, already_synced)) = self.peer_snapshot(peer_id).await else {
            return Ok(());
        };

        if !self.is_peer_synced(peer.as_ref(), peak_height).await {
            if trusted {
                return Ok(());
            }
            peer.close(config::CLOSE_CODE_TIMEOUT).await;
            self.on_disconnect(peer_id).await;
            return Ok(());
        }

        let Some(header) = peer.request_block_header(peak_height).await else {
            return Err(SyncError::PeerTimeout);
        };

        if trusted {
            self.wallet.set_peak_block(header, current_time_in_secs()).await;
            self.disconnect_untrusted_peers().await;
            if !already_synced {
                let _sync_guard = self.sync_guard.lock().await;
                self.long_sync(peak_height, peer_id, true, None).await?;
            }
            *self.local_peak_weight.lock().await = peak_weight;
            return Ok(());
        }

        let local_peak_height = self.wallet.get_peak_block().await.map(|h| h.height).unwrap_or(0);
        let far_behind = peak_height.saturating_sub(local_peak_height) > self.config.long_sync_threshold;

        if (!already_synced || far_behind) && peak_height >= self.config.weight_proof_recent_blocks {
            let synced_peers_empty = { self.peers.lock().await.values().filter(|h| h.synced).count() == 0 };
            let syncing = far_behind || synced_peers_empty;
            if syncing {
                self.sync_mode.store(true, Ordering::SeqCst);
            }

            let gate = WeightProofGate::new(self.wallet.as_ref());
            let validated = {
                let mut wp_cache = self.wp_cache.lock().await;
                gate.fetch_and_validate(peer.as_ref(), peak_height, peak_hash, &mut wp_cache).await
            };

            let Some(validated) = validated else {
                self.sync_mode.store(false, Ordering::SeqCst);
                return Ok(());
            };

            let fork_point = {
                let current = self.current_weight_proof.lock().await;
                match current.as_ref() {
                    Some(cur) => self.wallet.get_fork_point(cur, &validated.weight_proof).await,
                    None => 0,
                }
            };
            *self.current_weight_proof.lock().await = Some(validated.weight_proof.clone());

            // spec.md §4.G: "if syncing, hold the wallet-state-manager lock
            // around it" — only the syncing case needs the exclusivity,
            // since a non-syncing long_sync only double-checks subscriptions
            // against a peer we already consider caught up.
            let result = if syncing {
                let _sync_guard = self.sync_guard.lock().await;
                self.long_sync(peak_height, peer_id, syncing, Some(fork_point)).await
            } else {
                self.long_sync(peak_height, peer_id, syncing, Some(fork_point)).await
            };
            if let Err(e) = result {
                self.sync_mode.store(false, Ordering::SeqCst);
                peer.close(config::CLOSE_CODE_MISBEHAVIOR).await;
                return Err(e);
            }

            {
                let mut current = self.current_weight_proof.lock().await;
                if WeightProofGate::should_replace(current.as_ref(), &validated.weight_proof) {
                    *current = Some(validated.weight_proof);
                }
            }
            self.sync_mode.store(false, Ordering::SeqCst);
        } else {
            let _sync_guard = self.sync_guard.lock().await;
            self.short_sync_backtrack(peer_id, header).await?;
        }

        let mut local_weight = self.local_peak_weight.lock().await;
        if peak_weight > *local_weight {
            *local_weight = peak_weight;
        }
        Ok(())
    }

    /// spec.md §4.G.1.
    pub async fn long_sync(
        &self,
        target_height: u32,
        peer_id: Bytes32,
        syncing: bool,
        _fork_height: Option<u32>,
    ) -> Result<(), SyncError> {
        let current = self.wallet.finished_sync_up_to().await;
        let min_height = current.saturating_sub(32);

        if syncing {
            self.wallet.reorg_rollback(min_height).await;
            let mut peers = self.peers.lock().await;
            for handle in peers.values_mut() {
                handle.cache.clear_after_height(min_height);
            }
            drop(peers);
            self.wallet.notify_state_changed("sync_changed").await;
        }

        let Some((peer, _, _)) = self.peer_snapshot(peer_id).await else {
            return Ok(());
        };

        let mut already_checked_ph: HashSet<Bytes32> = HashSet::new();
        loop {
            let all_ph = self.wallet.puzzle_hashes_to_subscribe().await;
            let new_ph: Vec<Bytes32> = all_ph.iter().copied().filter(|p| !already_checked_ph.contains(p)).collect();
            for batch in new_ph.chunks(SUBSCRIPTION_BATCH_SIZE) {
                if let Some(states) = peer.register_interest_in_puzzle_hash(batch, 0).await {
                    self.receive_state(states, peer_id, None, None, None).await?;
                }
                already_checked_ph.extend(batch.iter().copied());
            }
            self.wallet.create_more_puzzle_hashes().await?;
            let refreshed = self.wallet.puzzle_hashes_to_subscribe().await;
            if refreshed.iter().all(|p| already_checked_ph.contains(p)) {
                break;
            }
        }

        let mut already_checked_coin_ids: HashSet<Bytes32> = HashSet::new();
        loop {
            let all_coins = self.wallet.coin_ids_to_subscribe(0).await;
            let new_coins: Vec<Bytes32> = all_coins
                .iter()
                .copied()
                .filter(|c| !already_checked_coin_ids.contains(c))
                .collect();
            if new_coins.is_empty() {
                break;
            }
            for batch in new_coins.chunks(SUBSCRIPTION_BATCH_SIZE) {
                if let Some(states) = peer.register_interest_in_coin(batch, 0).await {
                    self.receive_state(states, peer_id, None, None, None).await?;
                }
                already_checked_coin_ids.extend(batch.iter().copied());
            }
        }

        if target_height > self.wallet.finished_sync_up_to().await {
            self.wallet.set_finished_sync_up_to(target_height).await;
        }

        {
            let mut peers = self.peers.lock().await;
            if let Some(handle) = peers.get_mut(&peer_id) {
                handle.synced = true;
                if handle.trusted {
                    handle.local_node_synced = true;
                }
            }
        }
        self.wallet.notify_state_changed("sync_changed").await;
        Ok(())
    }

    /// spec.md §4.G.2.
    pub async fn short_sync_backtrack(&self, peer_id: Bytes32, peak_header: HeaderBlock) -> Result<(), SyncError> {
        let Some((peer, _, already_synced)) = self.peer_snapshot(peer_id).await else {
            return Ok(());
        };

        let mut chain = vec![peak_header.clone()];
        let mut current = peak_header.clone();
        let fork_height = loop {
            if current.height == 0 {
                break 0;
            }
            if let Some(local_hash) = self.wallet.local_header_hash_at(current.height - 1).await {
                if local_hash == current.prev_header_hash {
                    break current.height - 1;
                }
            }
            let Some(parent) = peer.request_block_header(current.height - 1).await else {
                return Err(SyncError::PeerTimeout);
            };
            chain.push(parent.clone());
            current = parent;
        };

        let local_peak_height = self.wallet.get_peak_block().await.map(|h| h.height).unwrap_or(0);
        if fork_height < local_peak_height {
            self.wallet.reorg_rollback(fork_height).await;
            let mut peers = self.peers.lock().await;
            for handle in peers.values_mut() {
                handle.cache.clear_after_height(fork_height);
            }
        }

        chain.reverse();
        for header in chain.iter().filter(|h| h.height > fork_height) {
            self.wallet
                .receive_block(header.clone())
                .await
                .map_err(|e| SyncError::WalletInvariantBreach(e.to_string()))?;
        }

        if !already_synced {
            let all_ph = self.wallet.puzzle_hashes_to_subscribe().await;
            for batch in all_ph.chunks(SUBSCRIPTION_BATCH_SIZE) {
                if let Some(states) = peer.register_interest_in_puzzle_hash(batch, 0).await {
                    self.receive_state(states, peer_id, None, None, None).await?;
                }
            }
            let all_coins = self.wallet.coin_ids_to_subscribe(0).await;
            for batch in all_coins.chunks(SUBSCRIPTION_BATCH_SIZE) {
                if let Some(states) = peer.register_interest_in_coin(batch, 0).await {
                    self.receive_state(states, peer_id, None, None, None).await?;
                }
            }
        }

        for height in (fork_height + 1)..=peak_header.height {
            let header_hash = chain.iter().find(|h| h.height == height).map(|h| h.header_hash);
            if let Some(hash) = header_hash {
                let drained = self.race_cache.lock().await.drain_for(&hash);
                if !drained.is_empty() {
                    self.receive_state(drained, peer_id, None, None, None).await?;
                }
            }
        }

        self.sync_mode.store(false, Ordering::SeqCst);
        self.wallet.notify_state_changed("sync_changed").await;
        Ok(())
    }

    /// spec.md §4.G.3. `header_hash`/`height` come from the originating
    /// `CoinStateUpdate` request (if any) and let a state arriving ahead of
    /// its peak be parked in the `RaceCache` before validation.
    pub async fn receive_state(
        &self,
        items: Vec<CoinState>,
        peer_id: Bytes32,
        fork_height: Option<u32>,
        height: Option<u32>,
        header_hash: Option<Bytes32>,
    ) -> Result<(), SyncError> {
        let trusted = { self.peers.lock().await.get(&peer_id).map(|h| h.trusted).unwrap_or(false) };

        if trusted {
            if let (Some(fork), Some(h)) = (fork_height, height) {
                if fork != h.saturating_sub(1) {
                    self.wallet.reorg_rollback(fork).await;
                }
            }
        }

        if let Some(fork) = fork_height {
            let mut peers = self.peers.lock().await;
            if let Some(handle) = peers.get_mut(&peer_id) {
                handle.cache.clear_after_height(fork);
            }
        }

        let weight_proof_snapshot = self.current_weight_proof.lock().await.clone();
        let mut validated_states = Vec::with_capacity(items.len());

        for state in items {
            if let Some(hash) = header_hash {
                self.race_cache.lock().await.add(hash, height.unwrap_or(0), state);
            }

            if self.admission.pending() > ADMISSION_WAITING_HIGH_WATERMARK {
                tokio::time::sleep(ADMISSION_BACKPRESSURE_SLEEP).await;
            }
            let admission = self.admission.try_enter()?;
            let _permit = admission
                .enter_labeled(format!("peer={peer_id} coin_state={}", state.hash()))
                .await;

            let valid = if trusted {
                true
            } else {
                let Some((peer, _, _)) = self.peer_snapshot(peer_id).await else {
                    continue;
                };
                let Some(wp) = weight_proof_snapshot.as_ref() else {
                    warn!("no validated weight proof available; cannot validate untrusted state");
                    continue;
                };
                let validator = CoinStateValidator::new(self.wallet.as_ref(), wp);
                let mut peers = self.peers.lock().await;
                let Some(handle) = peers.get_mut(&peer_id) else {
                    continue;
                };
                validator.validate(state, peer.as_ref(), &mut handle.cache, fork_height).await
            };

            if valid {
                validated_states.push(state);
            }
        }

        if !validated_states.is_empty() {
            let _guard = self.new_state_mutex.lock().await;
            self.wallet.apply_coin_states(&validated_states, peer_id, fork_height).await?;
        }

        self.wallet.notify_state_changed("coin_state_update").await;
        Ok(())
    }

    /// spec.md §4.G, entry from coin-state-update: acquire the PriorityLock
    /// at high priority, then run `receive_state` (which itself serializes
    /// the wallet mutation under the new-state mutex).
    pub async fn coin_state_update(
        &self,
        peer_id: Bytes32,
        items: Vec<CoinState>,
        fork_height: Option<u32>,
        height: Option<u32>,
        header_hash: Option<Bytes32>,
    ) -> Result<(), SyncError> {
        let _guard = self.lock.acquire(Priority::High).await?;
        let _sync_guard = self.sync_guard.lock().await;
        self.receive_state(items, peer_id, fork_height, height, header_hash).await
    }

    /// Feeds a subscription's results through `receive_state`, used by
    /// `SubscriptionLoop` (spec.md §4.H).
    pub(crate) async fn apply_subscription_results(&self, peer_id: Bytes32, states: Vec<CoinState>) -> Result<(), SyncError> {
        let _sync_guard = self.sync_guard.lock().await;
        self.receive_state(states, peer_id, None, None, None).await
    }

    pub(crate) async fn connected_peers(&self) -> Vec<Arc<dyn PeerInterface>> {
        self.peers.lock().await.values().map(|h| h.peer.clone()).collect()
    }

    pub(crate) fn priority_lock(&self) -> &Arc<PriorityLock> {
        &self.lock
    }

    pub fn admission_for_diagnostics(&self) -> Arc<BoundedAdmission> {
        self.admission.clone()
    }
}
