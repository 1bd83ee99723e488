//! Verifiable random function over secp256k1.
//!
//! A hash-to-curve / prove-and-hash construction: the evaluation is the
//! uncompressed curve point `gamma = x·H(m)` (65 bytes) and the proof is a
//! Chaum–Pedersen NIZK `c ‖ s` (64 bytes) showing that `gamma` was computed
//! with the same scalar as the signer's public key. The curve hash is
//! SHA-256 with try-and-increment. The byte layout (proof ‖ value) is
//! consensus-critical: the header extra-data stores both fields verbatim and
//! any divergence forks the chain.

use crate::crypto::KeyPair;
use k256::ecdsa::VerifyingKey;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use sha2::{Digest, Sha256};

/// Length of the VRF evaluation: an uncompressed secp256k1 point.
pub const VALUE_LENGTH: usize = 65;

/// Length of the NIZK proof: two 32-byte scalars `c ‖ s`.
pub const PROOF_LENGTH: usize = 64;

const H2C_DOMAIN: &[u8] = b"ibex/vrf/h2c/v1";
const NONCE_DOMAIN: &[u8] = b"ibex/vrf/nonce/v1";
const CHALLENGE_DOMAIN: &[u8] = b"ibex/vrf/challenge/v1";

/// Errors from VRF evaluation.
#[derive(Debug, thiserror::Error)]
pub enum VrfError {
    #[error("failed to evaluate vrf")]
    EvaluationFailed,

    #[error("could not map input onto the curve")]
    HashToCurve,
}

/// Evaluate the VRF at `alpha`, returning `(value, proof)`.
pub fn evaluate(key: &KeyPair, alpha: &[u8]) -> Result<(Vec<u8>, Vec<u8>), VrfError> {
    let x = Option::<Scalar>::from(Scalar::from_repr(key.signing_key().to_bytes()))
        .ok_or(VrfError::EvaluationFailed)?;
    let pk_point = ProjectivePoint::from(*key.public_key().as_affine());

    let h = hash_to_curve(&key.public_key(), alpha)?;
    let gamma = h * x;

    // Deterministic nonce bound to the key and the hashed input.
    let mut nonce_hasher = Sha256::new();
    nonce_hasher.update(NONCE_DOMAIN);
    nonce_hasher.update(key.to_bytes());
    nonce_hasher.update(compress(&h));
    let mut k = reduce(nonce_hasher.finalize().into());
    if bool::from(k.is_zero()) {
        k = Scalar::ONE;
    }

    let u = ProjectivePoint::GENERATOR * k;
    let v = h * k;

    let c = challenge(&pk_point, &h, &gamma, &u, &v);
    let s = k + c * x;

    let value = gamma.to_affine().to_encoded_point(false).as_bytes().to_vec();
    debug_assert_eq!(value.len(), VALUE_LENGTH);

    let mut proof = Vec::with_capacity(PROOF_LENGTH);
    proof.extend_from_slice(&c.to_bytes());
    proof.extend_from_slice(&s.to_bytes());

    Ok((value, proof))
}

/// Verify that `(value, proof)` is a correct evaluation at `alpha` under
/// `pubkey`. Malformed inputs verify as `false`, never as an error.
pub fn verify(pubkey: &VerifyingKey, alpha: &[u8], value: &[u8], proof: &[u8]) -> bool {
    if value.len() != VALUE_LENGTH || proof.len() != PROOF_LENGTH {
        return false;
    }

    let gamma = match decode_point(value) {
        Some(point) => point,
        None => return false,
    };

    let c = match decode_scalar(&proof[..32]) {
        Some(scalar) => scalar,
        None => return false,
    };
    let s = match decode_scalar(&proof[32..]) {
        Some(scalar) => scalar,
        None => return false,
    };

    let h = match hash_to_curve(pubkey, alpha) {
        Ok(point) => point,
        Err(_) => return false,
    };

    let pk_point = ProjectivePoint::from(*pubkey.as_affine());

    // s = k + c·x, so these recover the announced commitments.
    let u = ProjectivePoint::GENERATOR * s - pk_point * c;
    let v = h * s - gamma * c;

    challenge(&pk_point, &h, &gamma, &u, &v) == c
}

/// Map `(pubkey, alpha)` onto the curve by hashing with an incrementing
/// counter until the digest is the x-coordinate of a valid point.
fn hash_to_curve(pubkey: &VerifyingKey, alpha: &[u8]) -> Result<ProjectivePoint, VrfError> {
    let pk_bytes = pubkey.to_encoded_point(true);

    for counter in 0u16..=255 {
        let mut hasher = Sha256::new();
        hasher.update(H2C_DOMAIN);
        hasher.update(pk_bytes.as_bytes());
        hasher.update(alpha);
        hasher.update([counter as u8]);
        let digest = hasher.finalize();

        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);

        if let Some(point) = decode_point(&candidate) {
            if point != ProjectivePoint::IDENTITY {
                return Ok(point);
            }
        }
    }

    Err(VrfError::HashToCurve)
}

/// Fiat–Shamir challenge over every point of the transcript.
fn challenge(
    pk: &ProjectivePoint,
    h: &ProjectivePoint,
    gamma: &ProjectivePoint,
    u: &ProjectivePoint,
    v: &ProjectivePoint,
) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(CHALLENGE_DOMAIN);
    for point in [pk, h, gamma, u, v] {
        hasher.update(compress(point));
    }
    reduce(hasher.finalize().into())
}

fn compress(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

fn reduce(bytes: [u8; 32]) -> Scalar {
    <Scalar as Reduce<k256::U256>>::reduce_bytes(&FieldBytes::from(bytes))
}

fn decode_point(bytes: &[u8]) -> Option<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .map(ProjectivePoint::from)
}

fn decode_scalar(bytes: &[u8]) -> Option<Scalar> {
    let mut repr = [0u8; 32];
    repr.copy_from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(repr)))
}
