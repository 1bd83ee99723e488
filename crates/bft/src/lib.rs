//! IBFT-style BFT consensus engine with VRF proposer election.
//!
//! # Architecture
//!
//! The engine is a single long-lived task cycling through four states:
//!
//! - **Sync**: follow the best peer until the local node is a validator
//! - **Accept**: elect the proposer by VRF; build a block or await one
//! - **Validate**: tally Prepare/Commit votes until quorum locks and commits
//! - **RoundChange**: negotiate a new round after a timeout or failure
//!
//! plus a transient **Commit** step that seals and persists the block.
//!
//! Two auxiliary tasks feed it: the gossip subscriber (wired through
//! [`MessageSink`]) validates signatures and enqueues messages, and the
//! syncer streams blocks while the engine sits in Sync.
//!
//! All I/O beyond consensus itself goes through the adapter traits in
//! [`adapters`]: the blockchain store, transaction pool, block syncer,
//! gossip transport, secrets store and state executor are external
//! collaborators.
//!
//! # Quorum
//!
//! With `N` validators the engine tolerates `F = ⌊(N−1)/3⌋` faults. Prepare
//! and Commit tallies act on strictly more than `2F` votes, so every
//! finalized header carries at least `2F + 1` distinct committed seals.
//! Round changes catch a lagging node up on a weak certificate of `F + 1`
//! votes.

pub mod adapters;
mod builder;
mod config;
mod engine;
mod extra;
mod message;
mod msg_queue;
mod proposer;
mod round_state;
mod seal;
mod snapshot;
pub mod staking;
mod strategy;
mod validators;

pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle, EngineParams, MessageSink};
pub use extra::{
    get_extra, put_extra, put_extra_validators, ExtraError, IstanbulExtra, EXTRA_SEAL,
    EXTRA_VANITY,
};
pub use message::{Message, MsgType, View};
pub use msg_queue::MsgQueue;
pub use proposer::{calc_vrf_seed, vrf_sign_input, VrfInfo};
pub use round_state::CurrentState;
pub use seal::{
    ecrecover_from_header, istanbul_header_hash, verify_committed_fields, verify_signer,
    write_committed_seal, write_committed_seals, write_seal, SealError,
};
pub use snapshot::{Snapshot, SnapshotMetadata, SnapshotStore, Vote};
pub use strategy::{ConsensusStrategy, PosStrategy, StrategyContext, StrategyError};
pub use validators::ValidatorSet;

use serde::{Deserialize, Serialize};

/// The consensus state machine's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IbftState {
    Sync,
    Accept,
    Validate,
    Commit,
    RoundChange,
}

impl std::fmt::Display for IbftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IbftState::Sync => "sync",
            IbftState::Accept => "accept",
            IbftState::Validate => "validate",
            IbftState::Commit => "commit",
            IbftState::RoundChange => "round-change",
        };
        f.write_str(name)
    }
}

/// Errors that steer the state machine into a round change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("block locked is incorrect")]
    IncorrectBlockLocked,

    #[error("block verification failed")]
    BlockVerificationFailed,

    #[error("failed to insert block")]
    FailedToInsertBlock,
}

/// Fatal or per-message engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("secret {0} not found")]
    SecretNotFound(String),

    #[error("invalid message signature")]
    InvalidSignature,

    #[error("snapshot not found for block {0}")]
    SnapshotNotFound(u64),

    #[error("header {0} not found")]
    HeaderNotFound(u64),

    #[error("unauthorized proposer")]
    UnauthorizedProposer,

    #[error("invalid mixhash")]
    InvalidMixHash,

    #[error("invalid sha3 uncles")]
    InvalidUncles,

    #[error("wrong difficulty")]
    WrongDifficulty,

    #[error("vrf verification failed for block {0}")]
    VrfVerificationFailed(u64),

    #[error("adapter: {0}")]
    Adapter(String),

    #[error("secrets store: {0}")]
    Secrets(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error(transparent)]
    Seal(#[from] seal::SealError),

    #[error(transparent)]
    Extra(#[from] extra::ExtraError),

    #[error(transparent)]
    Reward(#[from] ibex_reward::RewardError),

    #[error(transparent)]
    Crypto(#[from] ibex_types::CryptoError),
}
