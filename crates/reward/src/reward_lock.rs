//! Reward-transaction bookkeeping per block height.

use alloy_primitives::B256;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct RewardLockInner {
    /// Duplicate-guard counters per height.
    fixed: HashMap<u64, u32>,
    /// Hash of the reward transaction appended at each height.
    hashes: HashMap<u64, B256>,
}

/// Tracks which reward transaction belongs to which block so execution-side
/// checks can recognize it. Constructed once at engine build time.
#[derive(Debug, Default)]
pub struct RewardLock {
    inner: Mutex<RewardLockInner>,
}

impl RewardLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hash(&self, block: u64, hash: B256) {
        self.inner.lock().hashes.insert(block, hash);
    }

    pub fn hash_of(&self, block: u64) -> Option<B256> {
        self.inner.lock().hashes.get(&block).copied()
    }

    pub fn del_hash(&self, block: u64) {
        self.inner.lock().hashes.remove(&block);
    }

    pub fn tag_count(&self, block: u64) {
        *self.inner.lock().fixed.entry(block).or_default() += 1;
    }

    pub fn tag(&self, block: u64) -> u32 {
        self.inner.lock().fixed.get(&block).copied().unwrap_or(0)
    }

    pub fn clean_tag(&self, block: u64) {
        self.inner.lock().fixed.remove(&block);
    }
}
