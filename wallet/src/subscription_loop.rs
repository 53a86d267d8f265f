//! Consumes an external subscription queue and installs new puzzle-hash /
//! coin-id subscriptions on every connected peer under ultra priority
//! (spec.md §4.H). Grounded on `WalletNode._process_new_subscriptions` in
//! `wallet_node.py`.

use crate::{
    error::SyncError,
    external::{SubscriptionItem, SubscriptionKind},
    priority_lock::Priority,
    reconciler::PeakReconciler,
};
use log::warn;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct SubscriptionLoop {
    reconciler: Arc<PeakReconciler>,
}

impl SubscriptionLoop {
    pub fn new(reconciler: Arc<PeakReconciler>) -> Self {
        Self { reconciler }
    }

    /// Runs until the queue's sender side is dropped. Per-item failures are
    /// logged and do not stop the loop (spec.md §4.H).
    pub async fn run(&self, mut queue: mpsc::Receiver<SubscriptionItem>) {
        while let Some(item) = queue.recv().await {
            if let Err(err) = self.process_item(item).await {
                warn!("subscription install failed: {err}");
            }
        }
    }

    async fn process_item(&self, item: SubscriptionItem) -> Result<(), SyncError> {
        let _guard = self.reconciler.priority_lock().acquire(Priority::Ultra).await?;

        for peer in self.reconciler.connected_peers().await {
            let peer_id = peer.peer_id();
            let results = match item.kind {
                SubscriptionKind::PuzzleHash => peer.register_interest_in_puzzle_hash(&item.values, 0).await,
                SubscriptionKind::Coin => peer.register_interest_in_coin(&item.values, 0).await,
            };
            if let Some(states) = results {
                if !states.is_empty() {
                    self.reconciler.apply_subscription_results(peer_id, states).await?;
                }
            }
        }
        Ok(())
    }
}
