//! VRF-based proposer election.
//!
//! On each transition into Accept the engine derives a seed from the parent
//! header, picks `seed mod N` as the proposer index, and caches the VRF
//! input so the proposer can evaluate and sign it while sealing. Followers
//! re-derive the same seed from their own parent view and verify the
//! evaluation in the header.

use crate::extra::get_extra;
use alloy_primitives::{keccak256, Bytes, B256, U256};
use ibex_types::Header;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// The material the proposer signs with its VRF key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignVrf {
    pub block_number: u64,
    pub vrf_value: Bytes,
}

/// The seed derivation input, taken entirely from the parent header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CalcVrfData {
    block_number: u64,
    state_root: B256,
    parent_vrf: Bytes,
    parent_hash: B256,
}

/// Derive the proposer-election seed for the child of `parent`:
/// `keccak256(keccak256(json))` over the parent-derived material. A parent
/// without a VRF evaluation (genesis) contributes 64 zero bytes.
pub fn calc_vrf_seed(parent: &Header) -> Result<B256, serde_json::Error> {
    let parent_vrf = get_extra(parent)
        .ok()
        .map(|extra| extra.vrf_value)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| Bytes::from(vec![0u8; 64]));

    let data = CalcVrfData {
        block_number: parent.number + 1,
        state_root: parent.state_root,
        parent_vrf,
        parent_hash: parent.compute_hash(),
    };

    let encoded = serde_json::to_vec(&data)?;
    let inner = keccak256(&encoded);
    Ok(keccak256(inner.as_slice()))
}

/// The bytes the proposer's VRF evaluation must cover for `block_number`.
pub fn vrf_sign_input(block_number: u64, seed: B256) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&SignVrf {
        block_number,
        vrf_value: Bytes::from(seed.to_vec()),
    })
}

/// Interpret the seed as a big-endian integer for `seed mod N` election.
pub fn seed_to_rand(seed: B256) -> U256 {
    U256::from_be_bytes(seed.0)
}

/// Cache mapping the next block number to the VRF input bytes used during
/// sealing. Written by the proposer-election step, read by the block
/// builder. Constructed once at engine build time.
#[derive(Debug, Default)]
pub struct VrfInfo {
    inner: Mutex<(u64, Vec<u8>)>,
}

impl VrfInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_info(&self, block: u64, data: Vec<u8>) {
        *self.inner.lock() = (block, data);
    }

    /// The cached input for `block`, or empty bytes when the cache belongs
    /// to a different height.
    pub fn get_info(&self, block: u64) -> Vec<u8> {
        let inner = self.inner.lock();
        if inner.0 == block {
            inner.1.clone()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra::put_extra_validators;
    use crate::seal::write_seal;
    use ibex_types::KeyPair;

    fn parent_header() -> Header {
        let mut header = Header {
            number: 41,
            state_root: B256::repeat_byte(0x09),
            ..Default::default()
        };
        put_extra_validators(&mut header, vec![alloy_primitives::Address::repeat_byte(1)]);
        header
    }

    #[test]
    fn seed_is_deterministic() {
        let parent = parent_header();
        assert_eq!(calc_vrf_seed(&parent).unwrap(), calc_vrf_seed(&parent).unwrap());
    }

    #[test]
    fn seed_depends_on_parent_fields() {
        let parent = parent_header();
        let mut other = parent.clone();
        other.state_root = B256::repeat_byte(0x0a);
        assert_ne!(calc_vrf_seed(&parent).unwrap(), calc_vrf_seed(&other).unwrap());
    }

    #[test]
    fn seed_changes_once_parent_carries_a_vrf_value() {
        let parent = parent_header();
        let plain_seed = calc_vrf_seed(&parent).unwrap();

        let key = KeyPair::generate();
        let sealed = write_seal(&key, &parent, b"some input").unwrap();
        assert_ne!(calc_vrf_seed(&sealed).unwrap(), plain_seed);
    }

    #[test]
    fn sign_input_embeds_the_height() {
        let seed = B256::repeat_byte(0x07);
        let a = vrf_sign_input(10, seed).unwrap();
        let b = vrf_sign_input(11, seed).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn vrf_info_is_height_scoped() {
        let info = VrfInfo::new();
        info.set_info(42, b"payload".to_vec());

        assert_eq!(info.get_info(42), b"payload".to_vec());
        assert!(info.get_info(43).is_empty());

        // A later height overwrites the single slot.
        info.set_info(43, b"next".to_vec());
        assert!(info.get_info(42).is_empty());
        assert_eq!(info.get_info(43), b"next".to_vec());
    }

    #[test]
    fn rand_uses_big_endian_interpretation() {
        let mut bytes = [0u8; 32];
        bytes[31] = 7;
        assert_eq!(seed_to_rand(B256::from(bytes)), U256::from(7u64));
    }
}
