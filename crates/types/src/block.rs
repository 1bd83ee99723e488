//! Blocks: a sealed header plus its transactions.

use crate::merkle::calc_root;
use crate::receipt::Receipt;
use crate::transaction::Transaction;
use crate::{Header, EMPTY_ROOT_HASH, EMPTY_UNCLE_HASH};
use alloy_primitives::B256;
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};
use serde::{Deserialize, Serialize};

/// A block as gossiped and persisted: the header and the transaction body.
/// Receipts are derived state and only contribute their root to the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block from builder output, filling the body roots and the
    /// uncles hash, and stamping the header hash.
    pub fn build(mut header: Header, transactions: Vec<Transaction>, receipts: &[Receipt]) -> Self {
        header.tx_root = if transactions.is_empty() {
            EMPTY_ROOT_HASH
        } else {
            let encoded: Vec<Vec<u8>> = transactions.iter().map(|tx| tx.encode_rlp()).collect();
            calc_root(&encoded)
        };

        header.receipts_root = if receipts.is_empty() {
            EMPTY_ROOT_HASH
        } else {
            let encoded: Vec<Vec<u8>> = receipts.iter().map(|r| r.encode_rlp()).collect();
            calc_root(&encoded)
        };

        header.sha3_uncles = EMPTY_UNCLE_HASH;

        Self {
            header,
            transactions,
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> B256 {
        self.header.compute_hash()
    }

    /// RLP-encode as `[header, [tx, ...]]` for gossip and sync transfer.
    pub fn encode_rlp(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.header.encode(&mut body);

        let mut txs = Vec::new();
        for tx in &self.transactions {
            txs.extend_from_slice(&tx.encode_rlp());
        }
        RlpHeader {
            list: true,
            payload_length: txs.len(),
        }
        .encode(&mut body);
        body.extend_from_slice(&txs);

        let mut out = Vec::with_capacity(body.len() + 4);
        RlpHeader {
            list: true,
            payload_length: body.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&body);
        out
    }

    /// Decode a block from its RLP encoding.
    pub fn decode_rlp(buf: &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut slice = buf;
        let outer = RlpHeader::decode(&mut slice)?;
        if !outer.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }

        let header = Header::decode(&mut slice)?;

        let txs_header = RlpHeader::decode(&mut slice)?;
        if !txs_header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let mut txs_slice = &slice[..txs_header.payload_length];
        let mut transactions = Vec::new();
        while !txs_slice.is_empty() {
            let start = txs_slice;
            let tx_header = RlpHeader::decode(&mut txs_slice)?;
            let total = start.len() - txs_slice.len() + tx_header.payload_length;
            transactions.push(Transaction::decode_rlp(&start[..total])?);
            txs_slice = &start[total..];
        }

        Ok(Self {
            header,
            transactions,
        })
    }
}
