//! Schnorr signature key pairs on secp256k1.
//!
//! Every participant owns one key pair. The public half identifies the
//! account: its SHA-256 digest is the participant's [`Address`].

use crate::types::address::Address;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use goldnet_derive::Error;
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;

/// Errors produced by key material handling.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The bytes do not form a valid secp256k1 signing key.
    #[error("invalid private key bytes")]
    InvalidPrivateKey,

    /// The bytes do not form a valid secp256k1 verifying key.
    #[error("invalid public key bytes")]
    InvalidPublicKey,
}

/// Private key for signing transactions and announcing blocks.
///
/// Generated from OS-provided entropy. Never serialized or transmitted over
/// the network.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Public key for signature verification and address derivation.
///
/// This type is `Copy` (64 bytes total: 32 for the key plus 32 for the
/// cached address) because public keys travel with every transaction and
/// stack allocation keeps validation cheap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub key: VerifyingKey,
    pub address: Address,
}

/// A Schnorr signature in raw 64-byte form.
///
/// Stored as bytes rather than the library type so it is `Copy`, encodable,
/// and tolerant of malformed wire data: verification of a signature that
/// does not parse simply returns `false`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SerializableSignature(pub [u8; 64]);

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        let mut rng = OsRng;
        Self {
            key: SigningKey::random(&mut rng),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// Fails if the bytes do not represent a valid scalar for secp256k1.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        SigningKey::from_bytes(bytes)
            .map(|key| Self { key })
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self)
    }

    /// Signs arbitrary data, producing a Schnorr signature.
    pub fn sign(&self, data: &[u8]) -> SerializableSignature {
        let signature: Signature = self.key.sign(data);
        SerializableSignature(signature.to_bytes().into())
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicKey {
    /// Derives a public key from a private key and computes its address.
    ///
    /// Address derivation: SHA-256 over the 32-byte x-only verifying key.
    pub(crate) fn new(private: &PrivateKey) -> Self {
        let vk = private.key.verifying_key();

        PublicKey {
            key: *vk,
            address: Address::of_public_key(&vk.to_bytes()),
        }
    }

    /// Verifies a Schnorr signature against the given data.
    ///
    /// Returns `false` for both signature mismatches and signatures that do
    /// not parse; neither is an error condition during block validation.
    pub fn verify(&self, data: &[u8], signature: SerializableSignature) -> bool {
        match Signature::try_from(&signature.0[..]) {
            Ok(sig) => self.key.verify(data, &sig).is_ok(),
            Err(_) => false,
        }
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.key.to_bytes());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let key_bytes = <[u8; 32]>::decode(input)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| DecodeError::InvalidValue)?;

        // Re-derive the address so the key/address invariant survives decoding
        Ok(PublicKey {
            key,
            address: Address::of_public_key(&key.to_bytes()),
        })
    }
}

impl Encode for SerializableSignature {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.0);
    }
}

impl Decode for SerializableSignature {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(SerializableSignature(<[u8; 64]>::decode(input)?))
    }
}
