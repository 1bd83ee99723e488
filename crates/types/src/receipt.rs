//! Execution receipts.

use alloy_primitives::B256;
use alloy_rlp::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// Minimal receipt: enough to build the receipts root and to mark
/// transactions whose intrinsic gas never fit the block.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct Receipt {
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas consumed by the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Gas consumed by this transaction alone.
    pub gas_used: u64,
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: B256,
}

impl Receipt {
    /// A receipt for a transaction that was rejected before execution.
    pub fn failed(tx_hash: B256, cumulative_gas_used: u64) -> Self {
        Self {
            success: false,
            cumulative_gas_used,
            gas_used: 0,
            tx_hash,
        }
    }

    /// RLP-encode into a fresh buffer.
    pub fn encode_rlp(&self) -> Vec<u8> {
        let mut out = Vec::new();
        alloy_rlp::Encodable::encode(self, &mut out);
        out
    }
}
