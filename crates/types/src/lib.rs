//! Core types for the ibex consensus engine.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: addresses, hashes, keccak merkle roots
//! - **Chain types**: Header, Block, Transaction, Receipt
//! - **Cryptography**: secp256k1 keys, recoverable seals, ECVRF
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Everything
//! that is consensus-critical at the byte level (RLP layouts, hashing rules,
//! signature formats) lives here so the upper layers cannot diverge.

mod block;
mod crypto;
mod header;
mod merkle;
mod receipt;
mod transaction;
pub mod vrf;

pub use block::Block;
pub use crypto::{
    recover_address, recover_pubkey, to_address, CryptoError, KeyPair, SIGNATURE_LENGTH,
};
pub use header::{Header, Nonce};
pub use merkle::calc_root;
pub use receipt::Receipt;
pub use transaction::{Eip155Signer, Transaction, TransactionError};

use alloy_primitives::{address, b256, Address, B256, U256};

/// Re-exported primitive types so downstream crates share one vocabulary.
pub use alloy_primitives::{keccak256, Bytes};

/// One whole token in wei.
pub fn wei() -> U256 {
    U256::from(10u64).pow(U256::from(18u64))
}

/// Number of blocks per epoch unless configured otherwise.
pub const DEFAULT_EPOCH_SIZE: u64 = 43_200;

/// Number of epochs in one year at the default block time.
pub const ONE_YEAR_EPOCH: u64 = 438_000;

/// Default minimum block production interval, in seconds.
pub const DEFAULT_BLOCK_TIME_SECS: u64 = 2;

/// Account that accumulates the fixed per-block rewards.
pub const REWARD_POOL: Address = address!("C79543f253dBf1F7606499be536620c1B1358e1C");

/// Account that accumulates transaction fees awaiting distribution.
pub const TX_FEE_POOL: Address = address!("89055606E4DD8F04C3014903C202AfF35691D2BA");

/// Address of the staking system contract.
pub const STAKING_CONTRACT: Address = address!("0000000000000000000000000000000000001001");

/// Mix-hash marker identifying blocks produced by this consensus engine.
pub const ISTANBUL_DIGEST: B256 =
    b256!("63746963616c2062797a616e74696e65206661756c7420746f6c6572616e6365");

/// Keccak hash of an RLP-encoded empty list; the uncles hash of every block.
pub const EMPTY_UNCLE_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Root of an empty merkle trie.
pub const EMPTY_ROOT_HASH: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Selector bytes for the fixed reward settlement method.
pub fn fixed_reward_selector() -> [u8; 4] {
    let digest = keccak256(b"fixedReward()");
    [digest[0], digest[1], digest[2], digest[3]]
}
