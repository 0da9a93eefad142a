//! Account addresses derived from public keys.

use crate::types::hash::{HASH_LEN, Hash};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use goldnet_derive::BinaryCodec;
use std::fmt;

/// Address length in bytes: the full SHA-256 digest of the public key.
pub const ADDRESS_LEN: usize = HASH_LEN;

/// Fixed-size account identifier, the SHA-256 hash of a serialized public
/// key.
///
/// Displayed as standard base64 wherever humans read it. This type is `Copy`
/// for efficient passing in validation and ledger lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, BinaryCodec, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Derives the address of a serialized public key.
    pub fn of_public_key(key_bytes: &[u8]) -> Address {
        Address(Hash::digest(key_bytes).0)
    }

    /// Returns the address as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Renders the base64 form used in logs and user-facing output.
    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }

    /// Parses an address from its base64 rendering.
    ///
    /// Returns `None` if the input is not valid base64 or decodes to the
    /// wrong length.
    pub fn from_base64(s: &str) -> Option<Address> {
        let bytes = B64.decode(s).ok()?;
        let arr: [u8; ADDRESS_LEN] = bytes.try_into().ok()?;
        Some(Address(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn derivation_is_deterministic() {
        let a = Address::of_public_key(b"public key bytes");
        let b = Address::of_public_key(b"public key bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_different_addresses() {
        let a = Address::of_public_key(b"key one");
        let b = Address::of_public_key(b"key two");
        assert_ne!(a, b);
    }

    #[test]
    fn base64_roundtrip() {
        let addr = Address::of_public_key(b"roundtrip");
        let rendered = addr.to_base64();
        assert_eq!(Address::from_base64(&rendered), Some(addr));
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(Address::from_base64("not base64 at all!!").is_none());
        // Valid base64, wrong length
        assert!(Address::from_base64("aGVsbG8=").is_none());
    }

    #[test]
    fn display_matches_base64() {
        let addr = Address::of_public_key(b"display");
        assert_eq!(format!("{}", addr), addr.to_base64());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let addr = Address::of_public_key(b"wire");
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), ADDRESS_LEN);
        assert_eq!(Address::from_bytes(&bytes).unwrap(), addr);
    }
}
