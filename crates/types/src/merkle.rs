//! Keccak merkle roots for block bodies.

use crate::EMPTY_ROOT_HASH;
use alloy_primitives::{keccak256, B256};

/// Compute the merkle root of a list of RLP-encoded items.
///
/// Leaves are the keccak hashes of the items; the tree is padded to a power
/// of two by repeating the last leaf, and parents hash `left ‖ right`. An
/// empty list yields the canonical empty root.
pub fn calc_root<T: AsRef<[u8]>>(items: &[T]) -> B256 {
    if items.is_empty() {
        return EMPTY_ROOT_HASH;
    }

    let mut level: Vec<B256> = items.iter().map(|item| keccak256(item.as_ref())).collect();
    let width = level.len().next_power_of_two();
    let last = *level.last().expect("non-empty by construction");
    level.resize(width, last);

    while level.len() > 1 {
        level = level
            .chunks_exact(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_slice());
                buf[32..].copy_from_slice(pair[1].as_slice());
                keccak256(buf)
            })
            .collect();
    }

    level[0]
}
