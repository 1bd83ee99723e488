//! Consensus messages and their signatures.
//!
//! A message signature covers the keccak digest of the JSON serialization
//! with the `from` and `signature` fields cleared; validation recovers the
//! sender address from the signature, so a forged `from` can never survive
//! the subscriber.

use crate::EngineError;
use alloy_primitives::{keccak256, Address, Bytes, B256};
use ibex_types::{recover_address, KeyPair};
use serde::{Deserialize, Serialize};

/// Message kinds, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    PrePrepare,
    Prepare,
    Commit,
    RoundChange,
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MsgType::PrePrepare => "pre-prepare",
            MsgType::Prepare => "prepare",
            MsgType::Commit => "commit",
            MsgType::RoundChange => "round-change",
        };
        f.write_str(name)
    }
}

/// A point in consensus time: block height plus retry round.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct View {
    pub sequence: u64,
    pub round: u64,
}

impl View {
    pub fn new(sequence: u64, round: u64) -> Self {
        Self { sequence, round }
    }
}

/// A consensus protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub view: View,
    pub from: Address,
    /// RLP-encoded block proposal; only set on `PrePrepare`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<Bytes>,
    /// Committed seal; only set on `Commit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Bytes>,
}

impl Message {
    pub fn new(msg_type: MsgType, view: View) -> Self {
        Self {
            msg_type,
            view,
            from: Address::ZERO,
            proposal: None,
            seal: None,
            signature: None,
        }
    }

    /// The digest a sender commits to: everything except the sender identity
    /// and the signature itself.
    pub fn signing_digest(&self) -> B256 {
        let mut unsigned = self.clone();
        unsigned.from = Address::ZERO;
        unsigned.signature = None;
        let payload =
            serde_json::to_vec(&unsigned).expect("message serialization cannot fail");
        keccak256(&payload)
    }

    /// Sign the message in place, filling `from` and `signature`.
    pub fn sign(&mut self, key: &KeyPair) -> Result<(), EngineError> {
        self.from = key.address();
        let sig = key.sign_digest(&self.signing_digest())?;
        self.signature = Some(Bytes::from(sig.to_vec()));
        Ok(())
    }

    /// Verify the signature and stamp `from` with the recovered sender.
    pub fn validate(&mut self) -> Result<(), EngineError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(EngineError::InvalidSignature)?
            .clone();
        let sender = recover_address(&self.signing_digest(), &signature)
            .map_err(|_| EngineError::InvalidSignature)?;
        self.from = sender;
        Ok(())
    }
}
