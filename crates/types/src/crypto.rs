//! secp256k1 keys and recoverable signatures.
//!
//! Every consensus artifact (proposer seal, committed seal, message
//! signature, transaction signature) is a 65-byte compact signature
//! `r ‖ s ‖ recovery_id` over a 32-byte keccak digest. Addresses are the
//! trailing 20 bytes of the keccak hash of the uncompressed public key.

use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;

/// Length of a compact recoverable signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// Errors surfaced by key handling and signature recovery.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid private key material")]
    InvalidPrivateKey,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A validator signing key.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        loop {
            let mut candidate = [0u8; 32];
            rng.fill_bytes(&mut candidate);
            if let Ok(signing) = SigningKey::from_slice(&candidate) {
                return Self { signing };
            }
        }
    }

    /// Load a key from its 32-byte scalar encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing })
    }

    /// Serialize the private scalar to 32 bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes().into()
    }

    /// The public half of the key.
    pub fn public_key(&self) -> VerifyingKey {
        *self.signing.verifying_key()
    }

    /// The address derived from the public key.
    pub fn address(&self) -> Address {
        to_address(&self.public_key())
    }

    /// Sign a 32-byte digest, producing a 65-byte compact signature.
    pub fn sign_digest(&self, digest: &B256) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
        let (signature, recovery_id) = self
            .signing
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }
}

/// Recover the public key that produced `sig` over `digest`.
pub fn recover_pubkey(digest: &B256, sig: &[u8]) -> Result<VerifyingKey, CryptoError> {
    if sig.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            sig.len()
        )));
    }

    let signature = Signature::from_slice(&sig[..64])
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(sig[64])
        .ok_or_else(|| CryptoError::InvalidSignature("invalid recovery id".into()))?;

    VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
}

/// Recover the signer address of `sig` over `digest`.
pub fn recover_address(digest: &B256, sig: &[u8]) -> Result<Address, CryptoError> {
    Ok(to_address(&recover_pubkey(digest, sig)?))
}

/// Derive the account address from a public key.
pub fn to_address(pubkey: &VerifyingKey) -> Address {
    let encoded = pubkey.to_encoded_point(false);
    // Skip the 0x04 SEC1 tag, hash the 64-byte coordinates.
    let digest = keccak256(&encoded.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover_round_trip() {
        let key = KeyPair::generate();
        let digest = keccak256(b"payload");

        let sig = key.sign_digest(&digest).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LENGTH);

        let recovered = recover_address(&digest, &sig).unwrap();
        assert_eq!(recovered, key.address());
    }

    #[test]
    fn recovery_fails_on_wrong_digest() {
        let key = KeyPair::generate();
        let sig = key.sign_digest(&keccak256(b"one")).unwrap();

        let other = keccak256(b"two");
        // Either recovery errors out or yields a different address.
        match recover_address(&other, &sig) {
            Ok(addr) => assert_ne!(addr, key.address()),
            Err(_) => {}
        }
    }

    #[test]
    fn key_serialization_round_trip() {
        let key = KeyPair::generate();
        let restored = KeyPair::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key.address(), restored.address());
    }

    #[test]
    fn rejects_truncated_signature() {
        let digest = keccak256(b"payload");
        assert!(recover_address(&digest, &[0u8; 64]).is_err());
    }
}
