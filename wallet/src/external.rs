//! The external-collaborator trait boundary (spec.md §6). Everything here
//! is implemented by the surrounding wallet process — storage, keychain,
//! transaction construction, peer networking — none of it by this crate.
//! Shaped after the teacher's `DaemonAPI` (`wallet/src/daemon_api.rs`) and
//! the various `PeerInterface`-like request methods in
//! `daemon/src/p2p/chain_sync`.

use crate::peer_cache::SesInfoResponse;
use async_trait::async_trait;
use lc_common::{Bytes32, CoinState, HeaderBlock, WeightProof};
use std::time::Duration;

/// Mirrors a local coin record: confirmed/spent heights using the
/// convention that an unspent coin has `spent_block_height == 0`.
#[derive(Debug, Clone, Copy)]
pub struct CoinRecord {
    pub confirmed_block_height: u32,
    pub spent_block_height: u32,
}

impl CoinRecord {
    pub fn spent_height(&self) -> Option<u32> {
        if self.spent_block_height == 0 {
            None
        } else {
            Some(self.spent_block_height)
        }
    }
}

/// Outcome of validating a weight proof (spec.md §4.F).
pub struct WeightProofValidation {
    pub valid: bool,
    pub fork_height: u32,
    pub summaries: Vec<lc_common::SubEpochSummary>,
    pub block_records: Vec<HeaderBlock>,
}

/// The wallet's persisted view of the chain and its mutation surface.
/// Non-goal per spec.md §1 — only the shape consumed by the core is
/// specified here.
#[async_trait]
pub trait WalletStateStore: Send + Sync {
    async fn finished_sync_up_to(&self) -> u32;
    async fn set_finished_sync_up_to(&self, height: u32);
    async fn reorg_rollback(&self, fork_height: u32);
    async fn get_peak_block(&self) -> Option<HeaderBlock>;
    async fn set_peak_block(&self, header: HeaderBlock, timestamp: u64);

    /// Mirrors `WalletStateManager.blockchain.contains_height` /
    /// `try_block_record` used by block-inclusion's local fast-path
    /// (spec.md §4.E.1 step 1).
    async fn local_header_hash_at(&self, height: u32) -> Option<Bytes32>;

    async fn receive_block(&self, header: HeaderBlock) -> anyhow::Result<()>;
    async fn apply_coin_states(
        &self,
        states: &[CoinState],
        peer_id: Bytes32,
        fork_height: Option<u32>,
    ) -> anyhow::Result<()>;
    async fn get_coin(&self, coin_id: Bytes32) -> Option<CoinRecord>;

    /// All puzzle-hashes this wallet currently tracks, for
    /// subscribe-until-dry loops (spec.md §4.G.1).
    async fn puzzle_hashes_to_subscribe(&self) -> Vec<Bytes32>;
    /// Derives further puzzle-hashes (gap-limit style); returns once no new
    /// ones are produced.
    async fn create_more_puzzle_hashes(&self) -> anyhow::Result<()>;
    async fn coin_ids_to_subscribe(&self, min_height: u32) -> Vec<Bytes32>;

    async fn validate_weight_proof(&self, proof: &WeightProof) -> WeightProofValidation;
    async fn get_fork_point(&self, old: &WeightProof, new: &WeightProof) -> u32;

    /// UI/RPC notification hook (spec.md §4.G.4, SPEC_FULL §4.G.4).
    async fn notify_state_changed(&self, event: &str);
}

/// Proof that a coin was added to (or removed from) a block.
pub struct InclusionProof {
    pub included: bool,
}

/// One connected full-node peer (spec.md §6).
#[async_trait]
pub trait PeerInterface: Send + Sync {
    fn peer_id(&self) -> Bytes32;
    fn protocol_version(&self) -> (u32, u32, u32);
    fn is_trusted(&self) -> bool;

    async fn request_block_header(&self, height: u32) -> Option<HeaderBlock>;
    async fn request_header_blocks(&self, start: u32, end: u32) -> Option<Vec<HeaderBlock>>;
    async fn request_proof_of_weight(
        &self,
        peak_height: u32,
        peak_hash: Bytes32,
        timeout: Duration,
    ) -> Option<WeightProof>;
    async fn request_ses_hashes(&self, start: u32, end: u32) -> Option<SesInfoResponse>;

    async fn register_interest_in_puzzle_hash(
        &self,
        puzzle_hashes: &[Bytes32],
        min_height: u32,
    ) -> Option<Vec<CoinState>>;
    async fn register_interest_in_coin(
        &self,
        coin_ids: &[Bytes32],
        min_height: u32,
    ) -> Option<Vec<CoinState>>;

    async fn request_additions(
        &self,
        header_hash: Bytes32,
        puzzle_hash: Bytes32,
        additions_root: Bytes32,
    ) -> InclusionProof;
    async fn request_removals(
        &self,
        header_hash: Bytes32,
        coin_id: Bytes32,
        removals_root: Bytes32,
    ) -> InclusionProof;

    async fn request_children(&self, coin_id: Bytes32) -> Option<Vec<CoinState>>;

    async fn close(&self, code: u16);
}

/// Recognized subscription kinds (spec.md §9 Open Question: the source's
/// `_process_new_subscriptions` asserts on an unrecognized `sub_type`; this
/// workspace instead rejects it as a protocol error, via this closed enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    PuzzleHash,
    Coin,
}

#[derive(Debug, Clone)]
pub struct SubscriptionItem {
    pub kind: SubscriptionKind,
    pub values: Vec<Bytes32>,
}
