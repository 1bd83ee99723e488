//! Per-validator fee accrual.
//!
//! The pool tracks fees allocated to validators but not yet withdrawn. The
//! `taximeter` is the running total of those unsettled fees; the epoch
//! refresh uses it to work out how much of the on-chain fee balance is new
//! money to distribute.
//!
//! Invariant: `Σ fee_of(v) == taximeter` whenever no withdrawal is in
//! flight.

use alloy_primitives::{Address, U256};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct FeePoolInner {
    taximeter: U256,
    pool: BTreeMap<Address, U256>,
}

/// Shared fee pool, constructed once at engine build time and passed down
/// explicitly.
#[derive(Debug, Default)]
pub struct FeePool {
    inner: RwLock<FeePoolInner>,
}

impl FeePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `validator` and advance the taximeter by the same
    /// amount.
    pub fn credit(&self, validator: Address, amount: U256) {
        let mut inner = self.inner.write();
        let entry = inner.pool.entry(validator).or_default();
        *entry += amount;
        let total = *entry;
        inner.taximeter += amount;
        debug!(
            validator = %validator,
            fee = %amount,
            total = %total,
            taximeter = %inner.taximeter,
            "credited validator fee"
        );
    }

    /// Whether the validator has anything left to withdraw.
    pub fn has_reward(&self, validator: Address) -> bool {
        self.inner
            .read()
            .pool
            .get(&validator)
            .is_some_and(|fee| *fee > U256::ZERO)
    }

    /// Unwithdrawn fees of a single validator.
    pub fn fee_of(&self, validator: Address) -> U256 {
        self.inner
            .read()
            .pool
            .get(&validator)
            .copied()
            .unwrap_or_default()
    }

    /// Total unsettled fees across all validators.
    pub fn taximeter(&self) -> U256 {
        self.inner.read().taximeter
    }

    /// Wind the taximeter back after a withdrawal settles on chain.
    pub fn sub_taximeter(&self, amount: U256) {
        let mut inner = self.inner.write();
        inner.taximeter = inner.taximeter.saturating_sub(amount);
    }
}
