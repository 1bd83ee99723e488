//! Header sealing and seal verification.
//!
//! The IBFT header hash is the keccak of the header with the proposer seal
//! and committed seals stripped from the extra-data (vanity, validators and
//! the VRF fields stay). The proposer signs that hash directly; committed
//! seals sign it with a one-byte domain constant appended so a Prepare-phase
//! signature can never be replayed as a Commit.

use crate::extra::{get_extra, put_extra, ExtraError, EXTRA_SEAL};
use crate::snapshot::Snapshot;
use alloy_primitives::{keccak256, Bytes, B256};
use ibex_types::vrf;
use ibex_types::{recover_pubkey, to_address, CryptoError, Header, KeyPair};
use k256::ecdsa::VerifyingKey;
use std::collections::HashSet;

/// Errors from sealing and seal verification.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error(transparent)]
    Extra(#[from] ExtraError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("vrf evaluation failed: {0}")]
    Vrf(#[from] vrf::VrfError),

    #[error("signer is not a validator")]
    NotValidator,

    #[error("committed seal has wrong length: {0}")]
    WrongSealLength(usize),

    #[error("repeated committed seal")]
    RepeatedSeal,

    #[error("not enough committed seals: {got} < {want}")]
    NotEnoughSeals { got: usize, want: usize },
}

/// The hash the proposer and committers sign: the header with both seal
/// fields cleared out of the extra-data.
pub fn istanbul_header_hash(header: &Header) -> Result<B256, SealError> {
    let mut extra = get_extra(header)?;
    extra.seal = Bytes::new();
    extra.committed_seals = Vec::new();

    let mut stripped = header.clone();
    put_extra(&mut stripped, &extra);
    Ok(stripped.compute_hash())
}

/// Digest covered by a committed seal: the header hash with the seal-length
/// domain byte appended.
fn commit_digest(header_hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(33);
    buf.extend_from_slice(header_hash.as_slice());
    buf.push(EXTRA_SEAL as u8);
    keccak256(&buf)
}

/// Evaluate the VRF over `vrf_data`, install the evaluation, and sign the
/// resulting header hash as proposer.
pub fn write_seal(key: &KeyPair, header: &Header, vrf_data: &[u8]) -> Result<Header, SealError> {
    let mut sealed = header.clone();
    let mut extra = get_extra(&sealed)?;

    if !vrf_data.is_empty() {
        let (value, proof) = vrf::evaluate(key, vrf_data)?;
        extra.set_vrf_info(value, proof);
    }
    put_extra(&mut sealed, &extra);

    let hash = istanbul_header_hash(&sealed)?;
    let seal = key.sign_digest(&hash)?;

    extra.seal = Bytes::from(seal.to_vec());
    put_extra(&mut sealed, &extra);
    Ok(sealed)
}

/// Produce this validator's committed seal for a header.
pub fn write_committed_seal(key: &KeyPair, header: &Header) -> Result<Vec<u8>, SealError> {
    let hash = istanbul_header_hash(header)?;
    Ok(key.sign_digest(&commit_digest(hash))?.to_vec())
}

/// Install the gathered committed seals into the header extra-data.
pub fn write_committed_seals(header: &Header, seals: Vec<Vec<u8>>) -> Result<Header, SealError> {
    for seal in &seals {
        if seal.len() != EXTRA_SEAL {
            return Err(SealError::WrongSealLength(seal.len()));
        }
    }

    let mut sealed = header.clone();
    let mut extra = get_extra(&sealed)?;
    extra.committed_seals = seals.into_iter().map(Bytes::from).collect();
    put_extra(&mut sealed, &extra);
    Ok(sealed)
}

/// Recover the proposer public key from the seal in the header extra-data.
pub fn ecrecover_from_header(header: &Header) -> Result<VerifyingKey, SealError> {
    let extra = get_extra(header)?;
    let hash = istanbul_header_hash(header)?;
    Ok(recover_pubkey(&hash, &extra.seal)?)
}

/// Verify the proposer seal and require membership in the snapshot's
/// validator set. Returns the recovered public key for VRF verification.
pub fn verify_signer(snap: &Snapshot, header: &Header) -> Result<VerifyingKey, SealError> {
    let pubkey = ecrecover_from_header(header)?;
    if !snap.includes(to_address(&pubkey)) {
        return Err(SealError::NotValidator);
    }
    Ok(pubkey)
}

/// Verify the committed seals: all distinct, all validators, and at least
/// `2F + 1` of them.
pub fn verify_committed_fields(snap: &Snapshot, header: &Header) -> Result<(), SealError> {
    let extra = get_extra(header)?;
    let hash = istanbul_header_hash(header)?;
    let digest = commit_digest(hash);

    let mut seen = HashSet::new();
    for seal in &extra.committed_seals {
        if seal.len() != EXTRA_SEAL {
            return Err(SealError::WrongSealLength(seal.len()));
        }
        let signer = to_address(&recover_pubkey(&digest, seal)?);
        if !snap.includes(signer) {
            return Err(SealError::NotValidator);
        }
        if !seen.insert(signer) {
            return Err(SealError::RepeatedSeal);
        }
    }

    let want = 2 * snap.max_faulty() + 1;
    if seen.len() < want {
        return Err(SealError::NotEnoughSeals {
            got: seen.len(),
            want,
        });
    }
    Ok(())
}
