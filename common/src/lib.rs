//! Chain primitives shared by the light-client sync engine.
//!
//! This crate mirrors the separation the teacher repo keeps between
//! chain-format primitives (`tos_common::block`, `tos_common::crypto`) and
//! the node/wallet logic that consumes them: it carries no networking, no
//! storage, and no consensus logic, only the types the sync engine proves
//! facts about.

pub mod coin;
pub mod crypto;
pub mod time;
pub mod weight_proof;

pub use coin::{Coin, CoinState};
pub use crypto::{hash_bytes, Bytes32, HASH_SIZE};
pub use time::{current_time_in_millis, current_time_in_secs, TimestampMillis};
pub use weight_proof::{FinishedSubSlot, FoliageTransactionBlock, HeaderBlock, RewardChainBlock, SubEpochSummary, WeightProof};
