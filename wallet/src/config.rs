//! Tunables for the sync engine. Mirrors the teacher's `config.rs` modules
//! (`tos_wallet::config`, `tos_common::config`): plain `pub const`s for
//! values that are protocol-level constants, plus `EngineConfig` for the
//! handful spec.md §6 calls out as operator-configurable.

use std::time::Duration;

/// Default max depth of the PriorityLock's combined waiter queues
/// (10x the long-sync threshold, per spec.md §4.A).
pub const DEFAULT_LOCK_MAX_QUEUE: usize = 2000;

/// Height distance past which we consider ourselves far behind a peer's
/// advertised peak and must run a full long_sync (spec.md §4.G).
pub const LONG_SYNC_THRESHOLD: u32 = 200;

/// Below this claimed peak height we never bother validating a weight
/// proof; the recent-chain tail alone is enough to prove inclusion.
pub const WEIGHT_PROOF_RECENT_BLOCKS: u32 = 1000;

/// Default cap on concurrently-active coin-state validations (spec.md §4.B).
pub const DEFAULT_ADMISSION_ACTIVE_CAP: usize = 6;

/// Default cap on admission waiters queued behind the active cap.
pub const DEFAULT_ADMISSION_WAITING_CAP: usize = 200;

/// Producers must back off once the waiting count exceeds this (spec.md §4.B).
pub const ADMISSION_WAITING_HIGH_WATERMARK: usize = 20;

/// Sleep interval used for admission back-pressure (spec.md §4.G.3).
pub const ADMISSION_BACKPRESSURE_SLEEP: Duration = Duration::from_secs(2);

/// Height distance at which a RaceCache entry becomes eligible for
/// eviction (spec.md §4.D).
pub const RACE_CACHE_EVICTION_DISTANCE: u32 = 100;

/// Header-block range fetch batch size, aligned to multiples of 32
/// (spec.md §4.E.1 step 4).
pub const HEADER_BLOCK_BATCH_SIZE: u32 = 32;

/// How close to the recent-chain tail we must be before comparing directly
/// against it instead of walking through a sub-epoch summary
/// (spec.md §4.E.1 step 3).
pub const RECENT_CHAIN_LOOKBACK: u32 = 1000;

/// Number of trailing blocks in a block-inclusion range over which the
/// plot signature is actually verified (spec.md §4.E.1 step 5).
pub const PLOT_SIGNATURE_CHECK_TAIL: usize = 50;

/// Subscription installation batch size (spec.md §4.G.1 / §5).
pub const SUBSCRIPTION_BATCH_SIZE: usize = 1000;

/// Weight-proof fetch deadline (spec.md §5).
pub const WEIGHT_PROOF_TIMEOUT: Duration = Duration::from_secs(60);

/// Peer-close grace period (spec.md §5).
pub const PEER_CLOSE_GRACE: Duration = Duration::from_secs(120);

/// How stale (in wall-clock seconds) a peer's last tx-block timestamp may
/// be before we consider it not synced (spec.md §4.G step 5).
pub const PEER_SYNCED_TIMESTAMP_THRESHOLD_SECS: u64 = 600;

/// Diagnostics monitor tick interval (spec.md §4.I, grounded on
/// `chia.util.limited_semaphore.LimitedSemaphore.monitor`'s 1s * 15 cadence).
pub const DIAGNOSTICS_TICK: Duration = Duration::from_secs(15);

/// Validation tasks held longer than this are flagged by diagnostics.
pub const DIAGNOSTICS_LONG_HELD_THRESHOLD: Duration = Duration::from_secs(5);

/// Peer-close codes (spec.md §7).
pub const CLOSE_CODE_MISBEHAVIOR: u16 = 9999;
pub const CLOSE_CODE_TIMEOUT: u16 = 120;

/// Operator-configurable knobs (spec.md §6: "CLI / config surface").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Peer ids treated as trusted (claims accepted without re-validation).
    pub trusted_peers: Vec<lc_common::Bytes32>,
    /// Skips the peer-synced wall-clock freshness check; used in tests.
    pub testing: bool,
    pub weight_proof_recent_blocks: u32,
    pub long_sync_threshold: u32,
    pub admission_active_cap: usize,
    pub admission_waiting_cap: usize,
    pub lock_max_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trusted_peers: Vec::new(),
            testing: false,
            weight_proof_recent_blocks: WEIGHT_PROOF_RECENT_BLOCKS,
            long_sync_threshold: LONG_SYNC_THRESHOLD,
            admission_active_cap: DEFAULT_ADMISSION_ACTIVE_CAP,
            admission_waiting_cap: DEFAULT_ADMISSION_WAITING_CAP,
            lock_max_queue: DEFAULT_LOCK_MAX_QUEUE,
        }
    }
}

impl EngineConfig {
    pub fn is_trusted(&self, peer_id: &lc_common::Bytes32) -> bool {
        self.trusted_peers.contains(peer_id)
    }
}
