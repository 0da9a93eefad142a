//! 32-byte SHA-256 hash type with zero-allocation incremental hashing.

use crate::types::encoding::EncodeSink;
use goldnet_derive::BinaryCodec;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Mutex;

/// SHA-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used throughout the chain.
///
/// This type is `Copy` - hashes are passed around constantly during block
/// validation and should live on the stack. The derived `Ord` compares bytes
/// lexicographically, which on a big-endian digest is exactly the 256-bit
/// unsigned integer order the proof-of-work check needs: a block id is valid
/// iff `id < target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Creates a zero-valued hash (all bytes are 0x00).
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Creates a hash of all 0xFF bytes, the largest possible value.
    ///
    /// Shifting this right yields proof-of-work targets.
    pub const fn max() -> Hash {
        Hash([0xFFu8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates a hash from a byte slice.
    ///
    /// Returns `None` if the slice length is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        if slice.len() != HASH_LEN {
            return None;
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(slice);
        Some(Hash(bytes))
    }

    /// Creates a new SHA-256 hash builder for incremental hashing.
    pub fn sha256() -> HashBuilder {
        HashBuilder::new()
    }

    /// Hashes a single byte slice in one call.
    pub fn digest(data: &[u8]) -> Hash {
        Hash::sha256().chain(data).finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental SHA-256 hash builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
/// Implements [`EncodeSink`] so encodable types can be hashed directly
/// without intermediate byte buffers.
pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    /// Creates a new empty hash builder.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Feeds data and returns the builder for chaining.
    pub fn chain(mut self, data: &[u8]) -> Self {
        self.hasher.update(data);
        self
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

/// Once-computed hash cache for values that are immutable after creation.
///
/// Transactions never change after signing, so their id is computed lazily
/// and remembered. Blocks must NOT use this: mining mutates the proof on
/// every attempt, changing the id each time.
#[derive(Debug, Default)]
pub struct IdCache {
    cached: Mutex<Option<Hash>>,
}

impl IdCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached hash, computing it via `f` on first access.
    pub fn get_or_compute(&self, f: impl FnOnce() -> Hash) -> Hash {
        let mut guard = self.cached.lock().unwrap();
        match *guard {
            Some(hash) => hash,
            None => {
                let hash = f();
                *guard = Some(hash);
                hash
            }
        }
    }
}

impl Clone for IdCache {
    fn clone(&self) -> Self {
        let cached = *self.cached.lock().unwrap();
        IdCache {
            cached: Mutex::new(cached),
        }
    }
}

// The cache is derived state: it contributes no bytes to the wire form and
// decodes as empty, so ids are recomputed after deserialization.
impl crate::types::encoding::Encode for IdCache {
    fn encode<S: EncodeSink>(&self, _out: &mut S) {}
}

impl crate::types::encoding::Decode for IdCache {
    fn decode(_input: &mut &[u8]) -> Result<Self, crate::types::encoding::DecodeError> {
        Ok(IdCache::new())
    }
}

impl PartialEq for IdCache {
    fn eq(&self, _other: &Self) -> bool {
        // Caches hold derived state only and never affect value equality.
        true
    }
}

impl Eq for IdCache {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_incremental() {
        let one_shot = Hash::digest(b"hello world");
        let incremental = Hash::sha256().chain(b"hello ").chain(b"world").finalize();
        assert_eq!(one_shot, incremental);
    }

    #[test]
    fn display_is_lowercase_hex() {
        let rendered = format!("{}", Hash::zero());
        assert_eq!(rendered.len(), 64);
        assert!(rendered.chars().all(|c| c == '0'));
    }

    #[test]
    fn from_slice_enforces_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_none());
        assert!(Hash::from_slice(&[0u8; 33]).is_none());
        assert!(Hash::from_slice(&[7u8; 32]).is_some());
    }

    #[test]
    fn ordering_matches_big_endian_integers() {
        let mut small = [0u8; HASH_LEN];
        small[31] = 0xFF; // 255
        let mut large = [0u8; HASH_LEN];
        large[0] = 0x01; // 2^248

        assert!(Hash(small) < Hash(large));
        assert!(Hash::zero() < Hash(small));
        assert!(Hash(large) < Hash::max());
    }

    #[test]
    fn id_cache_computes_once() {
        let cache = IdCache::new();
        let mut calls = 0;

        let first = cache.get_or_compute(|| {
            calls += 1;
            Hash::digest(b"x")
        });
        let second = cache.get_or_compute(|| {
            calls += 1;
            Hash::digest(b"y") // must not be called
        });

        assert_eq!(calls, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn id_cache_clone_preserves_value() {
        let cache = IdCache::new();
        let hash = cache.get_or_compute(|| Hash::digest(b"cached"));

        let cloned = cache.clone();
        assert_eq!(cloned.get_or_compute(|| Hash::digest(b"other")), hash);
    }
}
