//! Validator-set snapshots and their persistent store.
//!
//! A snapshot pins the validator set at a block height. Within an epoch the
//! set never changes, so the store holds one record per epoch boundary (plus
//! genesis) and `find(n)` resolves any height to the snapshot with the
//! greatest number at or below it.

use crate::engine::Engine;
use crate::extra::get_extra;
use crate::seal::ecrecover_from_header;
use crate::EngineError;
use alloy_primitives::{Address, B256};
use ibex_types::{to_address, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// A governance vote. Reserved for proof-of-authority compatibility; the
/// proof-of-stake mechanism never casts any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub validator: Address,
    pub address: Address,
    pub authorize: bool,
}

/// The validator set in force at (and after) a given block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Block number the snapshot was created at.
    pub number: u64,

    /// Hash of that block.
    pub hash: B256,

    /// Votes cast in chronological order (unused under proof of stake).
    pub votes: Vec<Vote>,

    /// Validator set, in canonical order.
    pub set: Vec<Address>,
}

impl Snapshot {
    pub fn index(&self, addr: Address) -> Option<usize> {
        self.set.iter().position(|v| *v == addr)
    }

    pub fn includes(&self, addr: Address) -> bool {
        self.index(addr).is_some()
    }

    /// Whether `other` is the same member list, order-sensitive.
    pub fn set_equal(&self, other: &[Address]) -> bool {
        self.set == other
    }

    /// Maximum tolerable faulty validators for this set.
    pub fn max_faulty(&self) -> usize {
        self.set.len().saturating_sub(1) / 3
    }
}

/// Snapshot metadata persisted alongside the snapshot list.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(rename = "LastBlock")]
    pub last_block: u64,
}

/// Sorted snapshot store with an atomic last-block cursor.
///
/// All list access is serialized under one mutex; `last_block` is read and
/// written atomically so the metadata path never takes the lock.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    last_number: AtomicU64,
    list: Mutex<Vec<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load persisted snapshots and metadata. Unreadable files are removed
    /// and startup continues from an empty store.
    pub fn load_from_path(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(meta) = read_data_store::<SnapshotMetadata>(&path.join("metadata")) {
            self.update_last_block(meta.last_block);
        }

        if let Some(snaps) = read_data_store::<Vec<Snapshot>>(&path.join("snapshots")) {
            for snap in snaps {
                self.add(snap);
            }
        }
        Ok(())
    }

    /// Persist the snapshot list and metadata as JSON.
    pub fn save_to_path(&self, path: &Path) -> Result<(), EngineError> {
        let list: Vec<Snapshot> = self
            .list
            .lock()
            .iter()
            .map(|snap| (**snap).clone())
            .collect();
        write_data_store(&path.join("snapshots"), &list)?;

        let meta = SnapshotMetadata {
            last_block: self.last_block(),
        };
        write_data_store(&path.join("metadata"), &meta)
    }

    pub fn last_block(&self) -> u64 {
        self.last_number.load(Ordering::SeqCst)
    }

    pub fn update_last_block(&self, number: u64) {
        self.last_number.store(number, Ordering::SeqCst);
    }

    /// Append a snapshot and keep the list sorted by number.
    pub fn add(&self, snap: Snapshot) {
        let mut list = self.list.lock();
        list.push(Arc::new(snap));
        list.sort_by_key(|snap| snap.number);
    }

    /// Overwrite the snapshot with a matching number, if any.
    pub fn replace(&self, snap: Snapshot) {
        let mut list = self.list.lock();
        if let Some(slot) = list.iter_mut().find(|s| s.number == snap.number) {
            *slot = Arc::new(snap);
        }
    }

    /// The snapshot covering height `num`: the record with the greatest
    /// number at or below it, or the earliest record when `num` precedes
    /// everything stored.
    pub fn find(&self, num: u64) -> Option<Arc<Snapshot>> {
        let list = self.list.lock();
        if list.is_empty() {
            return None;
        }

        // Fast path: the tip covers everything beyond it.
        let last = list.last().expect("non-empty");
        if last.number < num {
            return Some(Arc::clone(last));
        }

        match list.binary_search_by_key(&num, |snap| snap.number) {
            Ok(i) => Some(Arc::clone(&list[i])),
            Err(0) => Some(Arc::clone(&list[0])),
            Err(i) => Some(Arc::clone(&list[i - 1])),
        }
    }

    /// Prune snapshots below `num`.
    pub fn delete_lower(&self, num: u64) {
        let mut list = self.list.lock();
        list.retain(|snap| snap.number >= num);
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_data_store<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }

    let parse = || -> Result<T, String> {
        let data = std::fs::read(path).map_err(|e| e.to_string())?;
        serde_json::from_slice(&data).map_err(|e| e.to_string())
    };

    match parse() {
        Ok(value) => Some(value),
        Err(err) => {
            // An unreadable store file is discarded rather than wedging
            // startup; the store is rebuilt from chain data.
            error!(path = %path.display(), err, "could not read snapshot store file, removing");
            let _ = std::fs::remove_file(path);
            None
        }
    }
}

fn write_data_store<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let data = serde_json::to_vec(value).map_err(|e| EngineError::Persistence(e.to_string()))?;
    std::fs::write(path, data).map_err(|e| EngineError::Persistence(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════
// Engine snapshot operations
// ═══════════════════════════════════════════════════════════════════════

impl Engine {
    /// Rebuild the snapshot store on startup.
    ///
    /// Loads the persisted store, seeds genesis, and — when the stored
    /// metadata belongs to an earlier epoch than the chain tip — inserts a
    /// synthetic snapshot at the current epoch start before replaying the
    /// missed headers.
    pub(crate) fn setup_snapshot(&mut self) -> Result<(), EngineError> {
        if let Some(path) = self.config.path.clone() {
            self.store.load_from_path(&path)?;
        }

        let header = self.blockchain.header();
        let extra = get_extra(&header)?;

        if header.number == 0 {
            self.add_header_snap(&header, extra.validators.clone());
        }

        // Seed the election set from the latest known validators.
        self.state.vset.set_validators(extra.validators.clone());

        let current_epoch = header.number / self.config.epoch_size;
        let meta_epoch = self.store.last_block() / self.config.epoch_size;
        let snapshot = self.store.find(header.number);

        if snapshot.is_none() || meta_epoch < current_epoch {
            // The store predates the current epoch; restart it from the
            // epoch-start header.
            info!(
                current_epoch,
                "snapshot not found, restoring at beginning of current epoch"
            );
            let begin_height = current_epoch * self.config.epoch_size;
            let begin_header = self
                .blockchain
                .get_header_by_number(begin_height)
                .ok_or(EngineError::HeaderNotFound(begin_height))?;

            self.add_header_snap(&begin_header, extra.validators);
            self.store.update_last_block(begin_height);
        }

        let last_block = self.store.last_block();
        if header.number > last_block {
            info!(from = last_block, to = header.number, "syncing past snapshots");

            for num in (last_block + 1)..=header.number {
                if num == 0 {
                    continue;
                }
                let header = self
                    .blockchain
                    .get_header_by_number(num)
                    .ok_or(EngineError::HeaderNotFound(num))?;
                self.process_headers(&[header])?;
            }
        }

        Ok(())
    }

    /// Create a snapshot directly from a header (genesis and epoch-start
    /// restore path); all other snapshots come from `process_headers`.
    pub(crate) fn add_header_snap(&self, header: &Header, validators: Vec<Address>) {
        self.store.add(Snapshot {
            number: header.number,
            hash: header.compute_hash(),
            votes: vec![],
            set: validators,
        });
    }

    /// The snapshot at the metadata cursor.
    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.store.find(self.store.last_block())
    }

    /// The snapshot covering block `num`.
    pub fn get_snapshot(&self, num: u64) -> Result<Arc<Snapshot>, EngineError> {
        self.store.find(num).ok_or(EngineError::SnapshotNotFound(num))
    }

    /// Validate each header's proposer against the active snapshot and roll
    /// the store forward to the last header.
    pub(crate) fn process_headers(&self, headers: &[Header]) -> Result<(), EngineError> {
        let Some(first) = headers.first() else {
            return Ok(());
        };

        let parent_snap = self.get_snapshot(first.number.saturating_sub(1))?;
        let set = parent_snap.set.clone();

        for header in headers {
            let proposer = to_address(&ecrecover_from_header(header)?);
            if !set.contains(&proposer) {
                return Err(EngineError::UnauthorizedProposer);
            }

            self.store.add(Snapshot {
                number: header.number,
                hash: header.compute_hash(),
                votes: vec![],
                set: set.clone(),
            });
        }

        self.store
            .update_last_block(headers.last().expect("non-empty").number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(number: u64, tag: u8) -> Snapshot {
        Snapshot {
            number,
            hash: B256::repeat_byte(tag),
            votes: vec![],
            set: vec![Address::repeat_byte(tag)],
        }
    }

    #[test]
    fn find_returns_greatest_at_or_below() {
        let store = SnapshotStore::new();
        store.add(snap(0, 1));
        store.add(snap(100, 2));
        store.add(snap(200, 3));

        assert_eq!(store.find(0).unwrap().number, 0);
        assert_eq!(store.find(99).unwrap().number, 0);
        assert_eq!(store.find(100).unwrap().number, 100);
        assert_eq!(store.find(150).unwrap().number, 100);
        assert_eq!(store.find(10_000).unwrap().number, 200);
    }

    #[test]
    fn find_before_earliest_returns_first() {
        let store = SnapshotStore::new();
        store.add(snap(50, 1));
        assert_eq!(store.find(10).unwrap().number, 50);
    }

    #[test]
    fn find_on_empty_store_is_none() {
        let store = SnapshotStore::new();
        assert!(store.find(5).is_none());
    }

    #[test]
    fn add_keeps_the_list_sorted() {
        let store = SnapshotStore::new();
        store.add(snap(200, 3));
        store.add(snap(0, 1));
        store.add(snap(100, 2));

        assert_eq!(store.find(150).unwrap().number, 100);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn replace_overwrites_matching_number() {
        let store = SnapshotStore::new();
        store.add(snap(100, 2));

        let mut updated = snap(100, 9);
        updated.set = vec![Address::repeat_byte(9), Address::repeat_byte(10)];
        store.replace(updated);

        assert_eq!(store.find(100).unwrap().set.len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_lower_prunes_history() {
        let store = SnapshotStore::new();
        for n in [0u64, 100, 200, 300] {
            store.add(snap(n, n as u8 + 1));
        }
        store.delete_lower(150);
        assert_eq!(store.len(), 2);
        assert_eq!(store.find(0).unwrap().number, 200);
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new();
        store.add(snap(0, 1));
        store.add(snap(100, 2));
        store.update_last_block(137);
        store.save_to_path(dir.path()).unwrap();

        let restored = SnapshotStore::new();
        restored.load_from_path(dir.path()).unwrap();
        assert_eq!(restored.last_block(), 137);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.find(100).unwrap().hash, B256::repeat_byte(2));
    }

    #[test]
    fn corrupt_store_files_are_discarded() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("snapshots"), b"not json").unwrap();
        std::fs::write(dir.path().join("metadata"), b"still not json").unwrap();

        let store = SnapshotStore::new();
        store.load_from_path(dir.path()).unwrap();
        assert!(store.is_empty());
        assert!(!dir.path().join("snapshots").exists());
    }

    #[test]
    fn metadata_uses_the_wire_field_name() {
        let meta = SnapshotMetadata { last_block: 42 };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"LastBlock":42}"#);
    }

    #[test]
    fn quorum_arithmetic_on_snapshots() {
        let snapshot = Snapshot {
            number: 0,
            hash: B256::ZERO,
            votes: vec![],
            set: (1..=7u8).map(Address::repeat_byte).collect(),
        };
        assert_eq!(snapshot.max_faulty(), 2);
        assert!(snapshot.includes(Address::repeat_byte(3)));
        assert_eq!(snapshot.index(Address::repeat_byte(7)), Some(6));
    }
}
