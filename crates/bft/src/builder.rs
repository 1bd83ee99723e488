//! Block construction.

use crate::adapters::{Transition, TransitionError};
use crate::engine::Engine;
use crate::extra::put_extra_validators;
use crate::seal::write_seal;
use crate::snapshot::Snapshot;
use crate::EngineError;
use ibex_types::{
    Block, Header, Nonce, Transaction, EMPTY_ROOT_HASH, EMPTY_UNCLE_HASH, ISTANBUL_DIGEST,
    REWARD_POOL,
};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};

impl Engine {
    /// Build the next block on top of `parent` with the snapshot's
    /// validator set.
    ///
    /// The header is composed first (gas limit from the adapter, timestamp
    /// floored at `parent + block_time`), then a state transition applies
    /// pool transactions and the reward transaction, and finally the
    /// proposer seal is written over the completed header.
    pub(crate) fn build_block(
        &mut self,
        snap: &Snapshot,
        parent: &Header,
    ) -> Result<Block, EngineError> {
        let mut header = Header {
            parent_hash: parent.compute_hash(),
            number: parent.number + 1,
            miner: self.address,
            nonce: Nonce::ZERO,
            mix_hash: ISTANBUL_DIGEST,
            // Difficulty mirrors the height so storage can order forks.
            difficulty: parent.number + 1,
            state_root: EMPTY_ROOT_HASH,
            sha3_uncles: EMPTY_UNCLE_HASH,
            gas_limit: parent.gas_limit,
            ..Default::default()
        };

        let gas_limit = self
            .blockchain
            .calculate_gas_limit(header.number)
            .map_err(|e| EngineError::Adapter(e.to_string()))?;
        header.gas_limit = gas_limit;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        header.timestamp = now.max(parent.timestamp + self.config.block_time.as_secs());

        put_extra_validators(&mut header, snap.set.clone());

        let mut transition = self
            .executor
            .begin_txn(parent.state_root, &header, self.address)
            .map_err(|e| EngineError::Adapter(e.to_string()))?;

        // Epoch blocks stay empty; every other block drains the pool and
        // carries the reward transaction.
        let transactions = if self.strategy.should_write_transactions(header.number) {
            self.write_transactions(gas_limit, transition.as_mut())
        } else {
            Vec::new()
        };

        let state_root = transition
            .commit()
            .map_err(|e| EngineError::Adapter(e.to_string()))?;
        header.state_root = state_root;
        header.gas_used = transition.total_gas();

        let receipts = transition.receipts();
        let mut block = Block::build(header, transactions, &receipts);

        // The VRF input was cached when this node was elected proposer.
        let vrf_data = self.vrf_info.get_info(block.header.number);
        block.header = write_seal(&self.key, &block.header, &vrf_data)?;

        info!(
            block = block.header.number,
            txns = block.transactions.len(),
            "built block"
        );
        Ok(block)
    }

    /// Drain the transaction pool into the transition until the gas limit
    /// is reached, then append the reward transaction.
    fn write_transactions(
        &mut self,
        gas_limit: u64,
        transition: &mut dyn Transition,
    ) -> Vec<Transaction> {
        let mut transactions = Vec::new();
        let mut success_count = 0u64;
        let mut failed_count = 0u64;

        self.txpool.prepare();

        loop {
            let Some(tx) = self.txpool.peek() else {
                break;
            };

            if tx.exceeds_block_gas_limit(gas_limit) {
                // Unexecutable at any block: record the failure and move on.
                if transition.write_failed_receipt(&tx).is_err() {
                    failed_count += 1;
                    self.txpool.drop(&tx);
                    continue;
                }
                failed_count += 1;
                transactions.push(tx.clone());
                self.txpool.drop(&tx);
                continue;
            }

            match transition.write(&tx) {
                Err(TransitionError::GasLimitReached) => break,
                Err(err) => {
                    error!(hash = %tx.hash, err = %err, "transition write failed");
                    failed_count += 1;
                    self.txpool.drop(&tx);
                    continue;
                }
                Ok(()) => {
                    self.txpool.pop(&tx);
                    success_count += 1;
                    transactions.push(tx);
                }
            }
        }

        if let Some(reward_tx) = self.write_fixed_reward(transition) {
            transactions.push(reward_tx);
        }

        info!(
            failed = failed_count,
            success = success_count,
            pool = self.txpool.length(),
            "wrote transactions from pool"
        );
        transactions
    }

    /// Mint the per-block reward: a zero-gas-price transfer from the miner
    /// to the reward pool, signed with the validator key and settled
    /// against the bucket quota.
    fn write_fixed_reward(&mut self, transition: &mut dyn Transition) -> Option<Transaction> {
        let parent = self.blockchain.header();
        let block = parent.number + 1;
        let epoch = self.epoch_of(block);
        let amount = self.reward.reward(self.config.block_time, epoch);

        // Nonce comes from the parent state, not the open transition.
        let nonce_view = match self
            .executor
            .begin_txn(parent.state_root, &parent, parent.miner)
        {
            Ok(view) => view,
            Err(err) => {
                error!(block = parent.number, err = %err, "reward nonce lookup failed");
                return None;
            }
        };
        let nonce = nonce_view.nonce(self.address);

        let reward_tx = match self
            .reward
            .reward_tx(&self.key, self.address, REWARD_POOL, nonce, amount)
        {
            Ok(tx) => tx,
            Err(err) => {
                error!(miner = %self.address, err = %err, "reward tx construction failed");
                return None;
            }
        };

        if let Err(err) = transition.write(&reward_tx) {
            error!(miner = %self.address, err = %err, "reward tx write failed");
            return None;
        }

        self.reward_lock.clean_tag(block);
        self.reward_lock.set_hash(block, reward_tx.hash);
        self.reward.settle();
        Some(reward_tx)
    }
}
