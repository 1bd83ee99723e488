//! Block-reward engine for the ibex consensus chain.
//!
//! The schedule releases 660,000,000 whole tokens over twenty years, halving
//! the bucket quota every two years. The engine keeps three entries in its
//! own key-value store under `<path>/reward`:
//!
//! - `RewardKey` — the current per-block reward
//! - `RemainingKey` — the quota left in the current two-year bucket
//! - `RewardListKey` — the JSON-encoded halving schedule
//!
//! The schedule itself is always derived eagerly at startup; the persisted
//! copy exists for operators, never as a source of truth.

mod fee_pool;
mod reward_lock;

pub use fee_pool::FeePool;
pub use reward_lock::RewardLock;

use alloy_primitives::{Address, U256};
use ibex_types::{
    fixed_reward_selector, wei, Bytes, Eip155Signer, KeyPair, Transaction, TransactionError,
    ONE_YEAR_EPOCH,
};
use rocksdb::DB;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Whole-token reward supply across the full schedule.
pub const REWARD_TOTAL: u64 = 660_000_000;

const REWARD_KEY: &[u8] = b"RewardKey";
const REMAINING_KEY: &[u8] = b"RemainingKey";
const REWARD_LIST_KEY: &[u8] = b"RewardListKey";

/// Errors from the reward engine.
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("reward store: {0}")]
    Storage(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Persistent reward state plus the signer used for reward transactions.
pub struct BlockReward {
    db: DB,
    reward: U256,
    epoch_total: U256,
    remaining: U256,
    reward_list: Vec<U256>,
    signer: Eip155Signer,
}

impl std::fmt::Debug for BlockReward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReward")
            .field("reward", &self.reward)
            .field("epoch_total", &self.epoch_total)
            .field("remaining", &self.remaining)
            .field("buckets", &self.reward_list.len())
            .finish()
    }
}

impl BlockReward {
    /// Open (or create) the reward store under `<path>/reward` and derive
    /// the halving schedule.
    pub fn new(chain_id: u64, path: &Path) -> Result<Self, RewardError> {
        let db = DB::open_default(path.join("reward"))
            .map_err(|e| RewardError::Storage(e.to_string()))?;

        let mut engine = Self {
            db,
            reward: U256::ZERO,
            epoch_total: U256::ZERO,
            remaining: U256::ZERO,
            reward_list: Vec::new(),
            signer: Eip155Signer::new(chain_id),
        };
        engine.init_schedule();
        Ok(engine)
    }

    /// Build the descending halving list: nine successive halvings of the
    /// total supply, with the final bucket repeated so the tail of the
    /// schedule keeps paying out.
    fn init_schedule(&mut self) {
        let mut total = REWARD_TOTAL;
        let mut entries = Vec::with_capacity(10);
        for _ in 1..10 {
            total -= total / 2;
            entries.push(total);
        }
        entries.push(total);

        self.reward_list = entries
            .into_iter()
            .map(|tokens| U256::from(tokens) * wei())
            .collect();

        if let Ok(encoded) = serde_json::to_vec(&self.reward_list) {
            let _ = self.db.put(REWARD_LIST_KEY, encoded);
        }
    }

    /// Recompute the bucket quota and per-block reward for the given epoch.
    ///
    /// Bucket `k` applies while `current_epoch <= (k + 1) * 2 * ONE_YEAR_EPOCH`;
    /// past the final bucket the last computed quota keeps applying.
    fn calc_epoch_total(&mut self, block_time: Duration, current_epoch: u64) {
        for (k, bucket) in self.reward_list.iter().enumerate() {
            if current_epoch <= (k as u64 + 1) * 2 * ONE_YEAR_EPOCH {
                self.epoch_total = *bucket;
                break;
            }
        }

        self.remaining = self.epoch_total;

        let blocks_per_bucket = 86_400 * 365 * 2 / block_time.as_secs().max(1);
        let whole_tokens = self.epoch_total / wei();
        self.reward = whole_tokens / U256::from(blocks_per_bucket) * wei();

        let _ = self.db.put(REWARD_KEY, self.reward.to_be_bytes::<32>());
        let _ = self
            .db
            .put(REMAINING_KEY, self.remaining.to_be_bytes::<32>());
        debug!(
            epoch_total = %self.epoch_total,
            reward = %self.reward,
            "calculated block rewards"
        );
    }

    /// The reward the proposer may mint for the next block.
    pub fn reward(&mut self, block_time: Duration, current_epoch: u64) -> U256 {
        if self.stored_remaining() < self.reward {
            self.calc_epoch_total(block_time, current_epoch);
        }

        if self.reward.is_zero() {
            let stored = self.stored_reward();
            if stored > U256::ZERO {
                self.reward = stored;
            } else {
                self.calc_epoch_total(block_time, current_epoch);
            }
        }

        debug!(reward = %self.reward, remaining = %self.remaining, "per-block reward");
        self.reward
    }

    /// Settle one minted reward against the bucket quota.
    pub fn settle(&mut self) {
        if self.remaining.is_zero() {
            self.remaining = self.stored_remaining();
        }
        self.remaining = self.remaining.saturating_sub(self.reward);
        let _ = self
            .db
            .put(REMAINING_KEY, self.remaining.to_be_bytes::<32>());
    }

    /// Build and sign the per-block reward transaction.
    pub fn reward_tx(
        &self,
        key: &KeyPair,
        miner: Address,
        reward_pool: Address,
        nonce: u64,
        amount: U256,
    ) -> Result<Transaction, RewardError> {
        let tx = Transaction {
            nonce,
            gas_price: U256::ZERO,
            gas: 21_000,
            to: Some(reward_pool),
            value: amount,
            input: Bytes::from(fixed_reward_selector().to_vec()),
            from: miner,
            ..Default::default()
        };
        Ok(self.signer.sign(tx, key)?)
    }

    /// The halving schedule, largest bucket first.
    pub fn schedule(&self) -> &[U256] {
        &self.reward_list
    }

    /// Quota left in the current bucket (in-memory view).
    pub fn remaining(&self) -> U256 {
        self.remaining
    }

    fn stored_reward(&self) -> U256 {
        self.read_u256(REWARD_KEY)
    }

    fn stored_remaining(&self) -> U256 {
        self.read_u256(REMAINING_KEY)
    }

    fn read_u256(&self, key: &[u8]) -> U256 {
        match self.db.get(key) {
            Ok(Some(bytes)) => U256::from_be_slice(&bytes),
            _ => U256::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibex_types::REWARD_POOL;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> BlockReward {
        BlockReward::new(1218, dir.path()).unwrap()
    }

    #[test]
    fn schedule_halves_nine_times_then_repeats() {
        let dir = TempDir::new().unwrap();
        let reward = engine(&dir);
        let schedule = reward.schedule();

        let expected_tokens: [u64; 10] = [
            330_000_000,
            165_000_000,
            82_500_000,
            41_250_000,
            20_625_000,
            10_312_500,
            5_156_250,
            2_578_125,
            1_289_063,
            1_289_063,
        ];

        assert_eq!(schedule.len(), 10);
        for (entry, tokens) in schedule.iter().zip(expected_tokens) {
            assert_eq!(*entry, U256::from(tokens) * wei());
        }
        assert_eq!(schedule[8], schedule[9]);
    }

    #[test]
    fn first_bucket_pays_ten_tokens_per_block() {
        let dir = TempDir::new().unwrap();
        let mut reward = engine(&dir);

        // 2s blocks: 31,536,000 blocks per two-year bucket.
        let per_block = reward.reward(Duration::from_secs(2), 1);
        assert_eq!(per_block, U256::from(10u64) * wei());
    }

    #[test]
    fn reward_halves_when_the_bucket_advances() {
        let first = {
            let dir = TempDir::new().unwrap();
            engine(&dir).reward(Duration::from_secs(2), 2 * ONE_YEAR_EPOCH)
        };
        let second = {
            let dir = TempDir::new().unwrap();
            engine(&dir).reward(Duration::from_secs(2), 2 * ONE_YEAR_EPOCH + 1)
        };

        assert_eq!(first, U256::from(10u64) * wei());
        assert_eq!(second, U256::from(5u64) * wei());
    }

    #[test]
    fn settlement_decrements_the_bucket() {
        let dir = TempDir::new().unwrap();
        let mut reward = engine(&dir);

        let per_block = reward.reward(Duration::from_secs(2), 1);
        let before = reward.remaining();
        reward.settle();
        assert_eq!(reward.remaining(), before - per_block);
    }

    #[test]
    fn remaining_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let after_settle = {
            let mut reward = engine(&dir);
            reward.reward(Duration::from_secs(2), 1);
            reward.settle();
            reward.remaining()
        };

        let reopened = engine(&dir);
        assert_eq!(reopened.stored_remaining(), after_settle);
    }

    #[test]
    fn reward_tx_shape() {
        let dir = TempDir::new().unwrap();
        let reward = engine(&dir);
        let key = KeyPair::generate();
        let amount = U256::from(10u64) * wei();

        let tx = reward
            .reward_tx(&key, key.address(), REWARD_POOL, 7, amount)
            .unwrap();

        assert_eq!(tx.to, Some(REWARD_POOL));
        assert_eq!(tx.value, amount);
        assert_eq!(tx.gas, 21_000);
        assert_eq!(tx.gas_price, U256::ZERO);
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.input.as_ref(), &fixed_reward_selector()[..]);

        // EIP-155 signed by the miner.
        let signer = Eip155Signer::new(1218);
        assert_eq!(signer.sender(&tx).unwrap(), key.address());
    }
}
