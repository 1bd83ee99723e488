//! Transactions and EIP-155 signing.

use crate::crypto::{recover_address, CryptoError, KeyPair, SIGNATURE_LENGTH};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};
use serde::{Deserialize, Serialize};

/// Errors raised while signing or recovering transactions.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction is unsigned")]
    Unsigned,

    #[error("signature v does not match the chain id")]
    WrongChainId,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}

/// A legacy (pre-typed-envelope) transaction.
///
/// `hash` caches the keccak of the RLP encoding and must be refreshed with
/// [`Transaction::compute_hash`] after any mutation. `from` is populated by
/// the signer or by sender recovery; it does not travel on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,

    /// Sender, recovered or filled by the signer. Not part of the encoding.
    pub from: Address,

    /// Cached keccak of the RLP encoding.
    pub hash: B256,
}

impl Transaction {
    /// Keccak hash of the RLP encoding, cached into `self.hash`.
    pub fn compute_hash(&mut self) -> B256 {
        self.hash = keccak256(self.encode_rlp());
        self.hash
    }

    /// RLP-encode the nine signed fields.
    pub fn encode_rlp(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);

        let mut out = Vec::with_capacity(payload.len() + 4);
        RlpHeader {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    fn encode_fields(&self, out: &mut Vec<u8>) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas.encode(out);
        match &self.to {
            Some(address) => address.encode(out),
            // Contract creation encodes the recipient as an empty string.
            None => out.push(alloy_rlp::EMPTY_STRING_CODE),
        }
        self.value.encode(out);
        self.input.encode(out);
        self.v.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    /// Decode a transaction from RLP bytes. The cached hash is recomputed.
    pub fn decode_rlp(buf: &[u8]) -> Result<Self, alloy_rlp::Error> {
        let mut slice = buf;
        let header = RlpHeader::decode(&mut slice)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }

        let nonce = u64::decode(&mut slice)?;
        let gas_price = U256::decode(&mut slice)?;
        let gas = u64::decode(&mut slice)?;
        let to = if slice.first() == Some(&alloy_rlp::EMPTY_STRING_CODE) {
            slice = &slice[1..];
            None
        } else {
            Some(Address::decode(&mut slice)?)
        };
        let value = U256::decode(&mut slice)?;
        let input = Bytes::decode(&mut slice)?;
        let v = U256::decode(&mut slice)?;
        let r = U256::decode(&mut slice)?;
        let s = U256::decode(&mut slice)?;

        let mut tx = Self {
            nonce,
            gas_price,
            gas,
            to,
            value,
            input,
            v,
            r,
            s,
            from: Address::ZERO,
            hash: B256::ZERO,
        };
        tx.compute_hash();
        Ok(tx)
    }

    /// Whether the intrinsic gas of this transaction alone exceeds the block
    /// gas limit.
    pub fn exceeds_block_gas_limit(&self, block_gas_limit: u64) -> bool {
        self.gas > block_gas_limit
    }
}

/// EIP-155 replay-protected signer.
#[derive(Debug, Clone, Copy)]
pub struct Eip155Signer {
    chain_id: u64,
}

impl Eip155Signer {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The digest a sender commits to: the six payload fields followed by
    /// `(chain_id, 0, 0)`.
    pub fn signing_digest(&self, tx: &Transaction) -> B256 {
        let mut payload = Vec::new();
        tx.nonce.encode(&mut payload);
        tx.gas_price.encode(&mut payload);
        tx.gas.encode(&mut payload);
        match &tx.to {
            Some(address) => address.encode(&mut payload),
            None => payload.push(alloy_rlp::EMPTY_STRING_CODE),
        }
        tx.value.encode(&mut payload);
        tx.input.encode(&mut payload);
        self.chain_id.encode(&mut payload);
        0u8.encode(&mut payload);
        0u8.encode(&mut payload);

        let mut out = Vec::with_capacity(payload.len() + 4);
        RlpHeader {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        keccak256(&out)
    }

    /// Sign `tx` in place, filling `v`/`r`/`s`, `from` and the cached hash.
    pub fn sign(&self, mut tx: Transaction, key: &KeyPair) -> Result<Transaction, TransactionError> {
        let digest = self.signing_digest(&tx);
        let sig = key.sign_digest(&digest)?;

        tx.r = U256::from_be_slice(&sig[..32]);
        tx.s = U256::from_be_slice(&sig[32..64]);
        tx.v = U256::from(u64::from(sig[64]) + 35 + self.chain_id * 2);
        tx.from = key.address();
        tx.compute_hash();
        Ok(tx)
    }

    /// Recover the sender of a signed transaction.
    pub fn sender(&self, tx: &Transaction) -> Result<Address, TransactionError> {
        if tx.r.is_zero() && tx.s.is_zero() {
            return Err(TransactionError::Unsigned);
        }

        let v: u64 = tx.v.try_into().map_err(|_| TransactionError::WrongChainId)?;
        let recovery = v
            .checked_sub(35 + self.chain_id * 2)
            .ok_or(TransactionError::WrongChainId)?;
        if recovery > 1 {
            return Err(TransactionError::WrongChainId);
        }

        let mut sig = [0u8; SIGNATURE_LENGTH];
        sig[..32].copy_from_slice(&tx.r.to_be_bytes::<32>());
        sig[32..64].copy_from_slice(&tx.s.to_be_bytes::<32>());
        sig[64] = recovery as u8;

        Ok(recover_address(&self.signing_digest(tx), &sig)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REWARD_POOL;

    fn sample_tx() -> Transaction {
        Transaction {
            nonce: 3,
            gas_price: U256::ZERO,
            gas: 21_000,
            to: Some(REWARD_POOL),
            value: U256::from(1_000u64),
            input: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            ..Default::default()
        }
    }

    #[test]
    fn rlp_round_trip() {
        let mut tx = sample_tx();
        tx.compute_hash();
        let decoded = Transaction::decode_rlp(&tx.encode_rlp()).unwrap();
        assert_eq!(decoded.nonce, tx.nonce);
        assert_eq!(decoded.to, tx.to);
        assert_eq!(decoded.value, tx.value);
        assert_eq!(decoded.input, tx.input);
        assert_eq!(decoded.hash, tx.hash);
    }

    #[test]
    fn contract_creation_round_trip() {
        let mut tx = sample_tx();
        tx.to = None;
        tx.compute_hash();
        let decoded = Transaction::decode_rlp(&tx.encode_rlp()).unwrap();
        assert_eq!(decoded.to, None);
    }

    #[test]
    fn sign_and_recover_sender() {
        let key = KeyPair::generate();
        let signer = Eip155Signer::new(1218);

        let tx = signer.sign(sample_tx(), &key).unwrap();
        assert_eq!(tx.from, key.address());

        // v = recovery + 35 + 2 * chain_id
        let v: u64 = tx.v.try_into().unwrap();
        assert!(v == 35 + 2 * 1218 || v == 36 + 2 * 1218);

        assert_eq!(signer.sender(&tx).unwrap(), key.address());
    }

    #[test]
    fn sender_rejects_other_chain_id() {
        let key = KeyPair::generate();
        let tx = Eip155Signer::new(1218).sign(sample_tx(), &key).unwrap();
        assert!(Eip155Signer::new(999).sender(&tx).is_err());
    }

    #[test]
    fn signing_digest_excludes_signature() {
        let key = KeyPair::generate();
        let signer = Eip155Signer::new(7);
        let unsigned = sample_tx();
        let signed = signer.sign(unsigned.clone(), &key).unwrap();
        assert_eq!(signer.signing_digest(&unsigned), signer.signing_digest(&signed));
    }

    #[test]
    fn gas_limit_check() {
        let tx = sample_tx();
        assert!(tx.exceeds_block_gas_limit(20_000));
        assert!(!tx.exceeds_block_gas_limit(30_000));
    }
}
