//! Consensus extra-data payload.
//!
//! The header `extra_data` holds exactly 32 vanity bytes followed by the
//! RLP list `(validators, proposer_seal, committed_seals, vrf_value,
//! vrf_proof)`. This layout is consensus-critical: any byte-level divergence
//! forks the chain.

use alloy_primitives::{Address, Bytes};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use ibex_types::Header;

/// Fixed number of extra-data bytes reserved for proposer vanity.
pub const EXTRA_VANITY: usize = 32;

/// Fixed length of a proposer or committed seal.
pub const EXTRA_SEAL: usize = 65;

/// Errors from extra-data encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ExtraError {
    #[error("wrong extra size: {0}")]
    WrongSize(usize),

    #[error("malformed extra payload: {0}")]
    Rlp(#[from] alloy_rlp::Error),
}

/// The five-element consensus payload embedded in `extra_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct IstanbulExtra {
    /// Validator set active for this block.
    pub validators: Vec<Address>,
    /// Proposer seal over the IBFT header hash; empty before sealing.
    pub seal: Bytes,
    /// Committed seals gathered at quorum; empty before commitment.
    pub committed_seals: Vec<Bytes>,
    /// VRF evaluation by the proposer; empty at genesis.
    pub vrf_value: Bytes,
    /// NIZK proof for the VRF evaluation; empty at genesis.
    pub vrf_proof: Bytes,
}

impl IstanbulExtra {
    pub fn set_vrf_info(&mut self, value: Vec<u8>, proof: Vec<u8>) {
        self.vrf_value = Bytes::from(value);
        self.vrf_proof = Bytes::from(proof);
    }

    pub fn encode_rlp(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    pub fn decode_rlp(mut buf: &[u8]) -> Result<Self, ExtraError> {
        Ok(Self::decode(&mut buf)?)
    }
}

/// Normalize the caller-provided vanity to exactly [`EXTRA_VANITY`] bytes:
/// right-padded with zeros or truncated.
fn vanity_prefix(extra_data: &[u8]) -> Vec<u8> {
    let mut vanity = extra_data.to_vec();
    vanity.resize(EXTRA_VANITY, 0);
    vanity.truncate(EXTRA_VANITY);
    vanity
}

/// Write a fresh extra-data field carrying only the validator set.
pub fn put_extra_validators(header: &mut Header, validators: Vec<Address>) {
    let extra = IstanbulExtra {
        validators,
        ..Default::default()
    };
    put_extra(header, &extra);
}

/// Re-encode `extra` into the header, preserving the vanity prefix.
pub fn put_extra(header: &mut Header, extra: &IstanbulExtra) {
    let mut data = vanity_prefix(&header.extra_data);
    data.extend_from_slice(&extra.encode_rlp());
    header.extra_data = Bytes::from(data);
}

/// Decode the consensus payload from a header.
pub fn get_extra(header: &Header) -> Result<IstanbulExtra, ExtraError> {
    if header.extra_data.len() < EXTRA_VANITY {
        return Err(ExtraError::WrongSize(header.extra_data.len()));
    }
    IstanbulExtra::decode_rlp(&header.extra_data[EXTRA_VANITY..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validators(n: u8) -> Vec<Address> {
        (1..=n).map(Address::repeat_byte).collect()
    }

    #[test]
    fn round_trip_all_field_combinations() {
        let seal = Bytes::from(vec![0x11; EXTRA_SEAL]);
        let committed = vec![
            Bytes::from(vec![0x22; EXTRA_SEAL]),
            Bytes::from(vec![0x33; EXTRA_SEAL]),
        ];
        let vrf_value = Bytes::from(vec![0x44; 65]);
        let vrf_proof = Bytes::from(vec![0x55; 64]);

        let combos = [
            IstanbulExtra::default(),
            IstanbulExtra {
                validators: validators(4),
                ..Default::default()
            },
            IstanbulExtra {
                validators: validators(4),
                seal: seal.clone(),
                ..Default::default()
            },
            IstanbulExtra {
                validators: validators(4),
                seal: seal.clone(),
                committed_seals: committed.clone(),
                ..Default::default()
            },
            IstanbulExtra {
                validators: validators(4),
                vrf_value: vrf_value.clone(),
                vrf_proof: vrf_proof.clone(),
                ..Default::default()
            },
            IstanbulExtra {
                validators: validators(7),
                seal,
                committed_seals: committed,
                vrf_value,
                vrf_proof,
            },
        ];

        for extra in combos {
            let decoded = IstanbulExtra::decode_rlp(&extra.encode_rlp()).unwrap();
            assert_eq!(decoded, extra);
        }
    }

    #[test]
    fn header_embedding_round_trip() {
        let mut header = Header::default();
        put_extra_validators(&mut header, validators(4));

        assert_eq!(&header.extra_data[..EXTRA_VANITY], &[0u8; EXTRA_VANITY]);
        let extra = get_extra(&header).unwrap();
        assert_eq!(extra.validators, validators(4));
        assert!(extra.seal.is_empty());
        assert!(extra.committed_seals.is_empty());
    }

    #[test]
    fn vanity_is_truncated_or_padded() {
        let mut long = Header {
            extra_data: Bytes::from(vec![0xaa; 48]),
            ..Default::default()
        };
        put_extra_validators(&mut long, validators(1));
        assert_eq!(&long.extra_data[..EXTRA_VANITY], &[0xaa; EXTRA_VANITY]);

        let mut short = Header {
            extra_data: Bytes::from(vec![0xbb; 4]),
            ..Default::default()
        };
        put_extra_validators(&mut short, validators(1));
        assert_eq!(&short.extra_data[..4], &[0xbb; 4]);
        assert_eq!(&short.extra_data[4..EXTRA_VANITY], &[0u8; EXTRA_VANITY - 4]);
    }

    #[test]
    fn undersized_extra_is_rejected() {
        let header = Header {
            extra_data: Bytes::from(vec![0u8; EXTRA_VANITY - 1]),
            ..Default::default()
        };
        assert!(get_extra(&header).is_err());
    }
}
