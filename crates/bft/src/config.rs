//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the consensus engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chain identifier used for EIP-155 transaction signatures.
    pub chain_id: u64,

    /// Number of blocks per epoch. Validators refresh at every nonzero
    /// multiple of this value.
    pub epoch_size: u64,

    /// Minimum block production interval.
    pub block_time: Duration,

    /// Data directory holding the snapshot store files and the reward
    /// database. `None` disables persistence (useful in tests).
    pub path: Option<PathBuf>,

    /// Whether this node seals blocks. Non-sealing nodes relay messages but
    /// never participate in consensus.
    pub sealing: bool,

    /// Base timeout for one consensus round. The effective timeout doubles
    /// each round.
    pub base_timeout: Duration,

    /// Upper bound on the exponential round timeout.
    pub max_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: 1218,
            epoch_size: ibex_types::DEFAULT_EPOCH_SIZE,
            block_time: Duration::from_secs(ibex_types::DEFAULT_BLOCK_TIME_SECS),
            path: None,
            sealing: true,
            base_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Exponential per-round timeout: `base · 2^round`, capped.
    pub fn exponential_timeout(&self, round: u64) -> Duration {
        let shifted = u32::try_from(round)
            .ok()
            .and_then(|r| self.base_timeout.checked_mul(1u32.checked_shl(r)?));
        match shifted {
            Some(timeout) if timeout < self.max_timeout => timeout,
            _ => self.max_timeout,
        }
    }
}
