//! Consensus mechanism strategy.
//!
//! The engine delegates mechanism-specific behavior — proposer election,
//! epoch maintenance, block-content policy — to a [`ConsensusStrategy`].
//! The strategy is a standalone object: it owns handles to the shared
//! collaborators it needs (blockchain, executor) and receives the
//! engine-owned state through a per-call [`StrategyContext`], so there is no
//! reference cycle between engine and mechanism.

use crate::adapters::{Blockchain, Executor};
use crate::proposer::{calc_vrf_seed, seed_to_rand, vrf_sign_input, VrfInfo};
use crate::round_state::CurrentState;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::staking::{self, StakingError};
use ibex_reward::FeePool;
use ibex_types::{Block, Header, TX_FEE_POOL};
use alloy_primitives::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info};

/// Engine-owned state lent to the strategy for one call.
pub struct StrategyContext<'a> {
    pub store: &'a SnapshotStore,
    pub state: &'a mut CurrentState,
    pub vrf_info: &'a VrfInfo,
    pub fee_pool: &'a FeePool,
}

/// Errors surfaced by strategy calls.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("header {0} not found")]
    HeaderNotFound(u64),

    #[error("snapshot not found for block {0}")]
    SnapshotNotFound(u64),

    #[error("epoch block carries transactions")]
    EpochBlockNotEmpty,

    #[error("seed derivation failed: {0}")]
    Seed(#[from] serde_json::Error),

    #[error("staking call failed: {0}")]
    Staking(#[from] StakingError),

    #[error("executor: {0}")]
    Executor(String),
}

/// Mechanism-specific consensus behavior.
pub trait ConsensusStrategy: Send + Sync {
    /// Elect the proposer for the next block and cache the VRF input.
    fn calculate_proposer(
        &self,
        ctx: &mut StrategyContext<'_>,
        last_proposer: Address,
    ) -> Result<(), StrategyError>;

    /// Log mechanism status when entering Accept.
    fn accept_state_log(&self, snap: &Snapshot);

    /// Post-insert maintenance for a freshly written block.
    fn insert_block(&self, ctx: &mut StrategyContext<'_>, number: u64) -> Result<(), StrategyError>;

    /// Snapshot maintenance after a range of synced blocks.
    fn sync_state(&self, ctx: &mut StrategyContext<'_>, old_latest: u64) -> Result<(), StrategyError>;

    /// Mechanism-specific proposal checks beyond header verification.
    fn verify_block(&self, block: &Block) -> Result<(), StrategyError>;

    /// Whether pool transactions belong in the block at this height.
    fn should_write_transactions(&self, number: u64) -> bool;
}

/// The proof-of-stake mechanism: VRF proposer election over the snapshot
/// validator set, epoch-boundary refresh from the staking contract, and
/// stake-weighted fee distribution.
pub struct PosStrategy {
    blockchain: Arc<dyn Blockchain>,
    executor: Arc<dyn Executor>,
    epoch_size: u64,
    local_address: Address,
}

impl PosStrategy {
    pub fn new(
        blockchain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        epoch_size: u64,
        local_address: Address,
    ) -> Self {
        Self {
            blockchain,
            executor,
            epoch_size,
            local_address,
        }
    }

    /// The epoch a block belongs to, counting partial epochs as full.
    pub fn epoch_of(&self, number: u64) -> u64 {
        if number % self.epoch_size == 0 {
            number / self.epoch_size
        } else {
            number / self.epoch_size + 1
        }
    }

    /// Whether `number` closes its epoch.
    pub fn is_last_of_epoch(&self, number: u64) -> bool {
        number > 0 && number % self.epoch_size == 0
    }

    /// Refresh the validator set at an epoch boundary: query the staking
    /// contract, swap the snapshot when membership changed, and rebuild the
    /// stake bookkeeping and fee split.
    fn update_validators(
        &self,
        ctx: &mut StrategyContext<'_>,
        number: u64,
    ) -> Result<(), StrategyError> {
        let header = self
            .blockchain
            .get_header_by_number(number)
            .ok_or(StrategyError::HeaderNotFound(number))?;

        let mut transition = self
            .executor
            .begin_txn(header.state_root, &header, Address::ZERO)
            .map_err(|e| StrategyError::Executor(e.to_string()))?;
        let validators = staking::query_validators(transition.as_mut(), self.local_address)?;

        info!(vlen = validators.len(), block = number, "refreshed validator set");

        let snap = ctx
            .store
            .find(number)
            .ok_or(StrategyError::SnapshotNotFound(number))?;

        if !snap.set_equal(&validators) {
            let new_snap = Snapshot {
                number: header.number,
                hash: header.compute_hash(),
                votes: snap.votes.clone(),
                set: validators.clone(),
            };
            if snap.number != header.number {
                ctx.store.add(new_snap);
            } else {
                ctx.store.replace(new_snap);
            }
        }

        // The election set follows the snapshot.
        ctx.state.vset.set_validators(validators.clone());

        self.distribute_fee_rewards(ctx, &header, &validators)
    }

    /// Rebuild stake totals and split the fee balance that accrued above
    /// the taximeter since the previous boundary.
    fn distribute_fee_rewards(
        &self,
        ctx: &mut StrategyContext<'_>,
        header: &Header,
        validators: &[Address],
    ) -> Result<(), StrategyError> {
        let mut transition = self
            .executor
            .begin_txn(header.state_root, header, Address::ZERO)
            .map_err(|e| StrategyError::Executor(e.to_string()))?;

        let mut stake_total = U256::ZERO;
        for validator in validators {
            let amount = staking::query_account_stake(transition.as_mut(), *validator)?;
            stake_total += amount;
            ctx.state.vset.append_stake(*validator, amount);
        }
        ctx.state.vset.set_stake_total(stake_total);

        let fee_total = transition.get_balance(TX_FEE_POOL);
        let taximeter = ctx.fee_pool.taximeter();
        let actual = fee_total.saturating_sub(taximeter);
        if actual > U256::ZERO {
            ctx.state.vset.distribute_rewards_by_rate(actual, ctx.fee_pool);
        }

        info!(
            stake_total = %stake_total,
            actual = %actual,
            "distributed fee rewards"
        );
        Ok(())
    }

    /// Run the epoch refresh for every boundary inside `[from, to]`.
    fn batch_update_validators(
        &self,
        ctx: &mut StrategyContext<'_>,
        from: u64,
        to: u64,
    ) -> Result<(), StrategyError> {
        for number in from..=to {
            if self.is_last_of_epoch(number) {
                self.update_validators(ctx, number)?;
            }
        }
        Ok(())
    }
}

impl ConsensusStrategy for PosStrategy {
    fn calculate_proposer(
        &self,
        ctx: &mut StrategyContext<'_>,
        _last_proposer: Address,
    ) -> Result<(), StrategyError> {
        let parent = self.blockchain.header();
        let seed = calc_vrf_seed(&parent)?;

        ctx.state.calc_proposer(seed_to_rand(seed));

        let block_number = parent.number + 1;
        let input = vrf_sign_input(block_number, seed)?;
        ctx.vrf_info.set_info(block_number, input);

        debug!(
            block = block_number,
            proposer = %ctx.state.proposer,
            "elected proposer by vrf"
        );
        Ok(())
    }

    fn accept_state_log(&self, snap: &Snapshot) {
        info!(validators = snap.set.len(), "current snapshot");
    }

    fn insert_block(&self, ctx: &mut StrategyContext<'_>, number: u64) -> Result<(), StrategyError> {
        if self.is_last_of_epoch(number) {
            self.update_validators(ctx, number)?;
        }
        Ok(())
    }

    fn sync_state(&self, ctx: &mut StrategyContext<'_>, old_latest: u64) -> Result<(), StrategyError> {
        let tip = self.blockchain.header().number;
        self.batch_update_validators(ctx, old_latest + 1, tip)
    }

    fn verify_block(&self, block: &Block) -> Result<(), StrategyError> {
        if self.is_last_of_epoch(block.number()) && !block.transactions.is_empty() {
            return Err(StrategyError::EpochBlockNotEmpty);
        }
        Ok(())
    }

    fn should_write_transactions(&self, number: u64) -> bool {
        // Epoch blocks must be empty.
        !self.is_last_of_epoch(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterError;
    use ibex_types::DEFAULT_EPOCH_SIZE;

    struct NoChain;

    impl Blockchain for NoChain {
        fn header(&self) -> Header {
            Header::default()
        }

        fn get_header_by_number(&self, _number: u64) -> Option<Header> {
            None
        }

        fn write_block(&self, _block: &Block) -> Result<(), AdapterError> {
            Ok(())
        }

        fn calculate_gas_limit(&self, _number: u64) -> Result<u64, AdapterError> {
            Ok(8_000_000)
        }
    }

    struct NoExecutor;

    impl Executor for NoExecutor {
        fn begin_txn(
            &self,
            _state_root: alloy_primitives::B256,
            _header: &Header,
            _miner: Address,
        ) -> Result<Box<dyn crate::adapters::Transition>, AdapterError> {
            Err(AdapterError::msg("no state"))
        }
    }

    fn pos() -> PosStrategy {
        PosStrategy::new(
            Arc::new(NoChain),
            Arc::new(NoExecutor),
            DEFAULT_EPOCH_SIZE,
            Address::ZERO,
        )
    }

    #[test]
    fn epoch_arithmetic() {
        let strategy = pos();
        assert_eq!(strategy.epoch_of(0), 0);
        assert_eq!(strategy.epoch_of(1), 1);
        assert_eq!(strategy.epoch_of(DEFAULT_EPOCH_SIZE), 1);
        assert_eq!(strategy.epoch_of(DEFAULT_EPOCH_SIZE + 1), 2);

        assert!(!strategy.is_last_of_epoch(0));
        assert!(!strategy.is_last_of_epoch(DEFAULT_EPOCH_SIZE - 1));
        assert!(strategy.is_last_of_epoch(DEFAULT_EPOCH_SIZE));
        assert!(strategy.is_last_of_epoch(2 * DEFAULT_EPOCH_SIZE));
    }

    #[test]
    fn epoch_blocks_must_be_empty() {
        let strategy = pos();

        let empty = Block {
            header: Header {
                number: DEFAULT_EPOCH_SIZE,
                ..Default::default()
            },
            transactions: vec![],
        };
        strategy.verify_block(&empty).unwrap();

        let full = Block {
            header: empty.header.clone(),
            transactions: vec![ibex_types::Transaction::default()],
        };
        assert!(matches!(
            strategy.verify_block(&full),
            Err(StrategyError::EpochBlockNotEmpty)
        ));

        // Mid-epoch blocks may carry transactions.
        let mid = Block {
            header: Header {
                number: 5,
                ..Default::default()
            },
            transactions: vec![ibex_types::Transaction::default()],
        };
        strategy.verify_block(&mid).unwrap();
    }

    #[test]
    fn transaction_policy_follows_epochs() {
        let strategy = pos();
        assert!(strategy.should_write_transactions(1));
        assert!(strategy.should_write_transactions(DEFAULT_EPOCH_SIZE - 1));
        assert!(!strategy.should_write_transactions(DEFAULT_EPOCH_SIZE));
    }
}
