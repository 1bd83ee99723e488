//! Block header and its consensus hashing rules.

use alloy_primitives::{keccak256, Address, Bytes, B256, B64};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// 8-byte header nonce, unused by the BFT engine but kept for wire
/// compatibility with Ethereum tooling.
pub type Nonce = B64;

/// Block header.
///
/// `difficulty` always equals `number` (the chain uses difficulty only so the
/// storage layer can organize blocks), `sha3_uncles` is pinned to the empty
/// uncle hash and `mix_hash` to the Istanbul digest. The consensus payload
/// (validators, seals, VRF evaluation) is carried inside `extra_data`.
///
/// The header hash is not cached: [`Header::compute_hash`] re-derives it from
/// the current field values, so sealing code can never observe a stale hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: B256,
    pub sha3_uncles: B256,
    pub miner: Address,
    pub state_root: B256,
    pub tx_root: B256,
    pub receipts_root: B256,
    pub difficulty: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: Nonce,
}

impl Header {
    /// Keccak hash of the RLP encoding.
    pub fn compute_hash(&self) -> B256 {
        let mut out = Vec::with_capacity(self.length());
        self.encode(&mut out);
        keccak256(&out)
    }

    /// RLP-encode into a fresh buffer.
    pub fn encode_rlp(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length());
        self.encode(&mut out);
        out
    }

    /// Decode a header from RLP bytes.
    pub fn decode_rlp(mut buf: &[u8]) -> Result<Self, alloy_rlp::Error> {
        Self::decode(&mut buf)
    }
}
