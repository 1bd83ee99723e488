//! The active validator set and its stake bookkeeping.
//!
//! Membership drives quorum arithmetic; stake is rebuilt from the staking
//! contract at every epoch boundary and used to split the accumulated fee
//! pool. Fee distribution iterates the stake map in address order so every
//! node accumulates rounding identically.

use alloy_primitives::{Address, U256};
use ibex_reward::FeePool;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct ValidatorSetInner {
    validators: Vec<Address>,
    stake_total: U256,
    stake_list: BTreeMap<Address, U256>,
}

/// Ordered validator set with per-validator stake.
#[derive(Debug, Default)]
pub struct ValidatorSet {
    inner: Mutex<ValidatorSetInner>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the member list. Stake bookkeeping is left untouched; the
    /// epoch refresh rebuilds it separately.
    pub fn set_validators(&self, validators: Vec<Address>) {
        self.inner.lock().validators = validators;
    }

    pub fn validators(&self) -> Vec<Address> {
        self.inner.lock().validators.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of `addr` in the set, if present.
    pub fn index(&self, addr: Address) -> Option<usize> {
        self.inner.lock().validators.iter().position(|v| *v == addr)
    }

    pub fn includes(&self, addr: Address) -> bool {
        self.index(addr).is_some()
    }

    /// Whether the member lists are identical (order-sensitive).
    pub fn equal(&self, other: &[Address]) -> bool {
        self.inner.lock().validators == other
    }

    /// Maximum tolerable faulty validators: `⌊(N − 1) / 3⌋`.
    pub fn max_faulty(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// The threshold vote tallies are compared against with strict `>`:
    /// `2F`, so quorum is the local vote plus `2F` others.
    pub fn num_valid(&self) -> usize {
        2 * self.max_faulty()
    }

    /// Smallest vote count that proves quorum: `2F + 1`.
    pub fn quorum_size(&self) -> usize {
        2 * self.max_faulty() + 1
    }

    /// Pick the proposer for a seed value: `seed mod N`.
    pub fn calc_proposer(&self, seed: U256) -> Option<Address> {
        let inner = self.inner.lock();
        if inner.validators.is_empty() {
            return None;
        }
        let index = seed % U256::from(inner.validators.len());
        Some(inner.validators[index.to::<u64>() as usize])
    }

    /// Record one validator's stake during the epoch refresh.
    pub fn append_stake(&self, account: Address, amount: U256) {
        self.inner.lock().stake_list.insert(account, amount);
    }

    pub fn set_stake_total(&self, total: U256) {
        self.inner.lock().stake_total = total;
    }

    pub fn stake_total(&self) -> U256 {
        self.inner.lock().stake_total
    }

    pub fn stake_of(&self, account: Address) -> U256 {
        self.inner
            .lock()
            .stake_list
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    /// Split `total` across validators proportionally to stake and credit
    /// the fee pool. Rates are fixed-point with 18 decimals; iteration is
    /// address-ordered so results are bit-identical on every node.
    pub fn distribute_rewards_by_rate(&self, total: U256, fee_pool: &FeePool) {
        let inner = self.inner.lock();
        if inner.stake_total.is_zero() {
            return;
        }

        let scale = U256::from(10u64).pow(U256::from(18u64));
        for (account, amount) in &inner.stake_list {
            let rate = amount * U256::from(100u64) * scale / inner.stake_total;
            let reward = total * rate / (U256::from(100u64) * scale);
            fee_pool.credit(*account, reward);
            debug!(validator = %account, fee = %reward, "allocated validator fee");
        }
    }
}
