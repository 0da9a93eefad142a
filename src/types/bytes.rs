//! Reference-counted byte buffer with copy-on-write semantics.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, cheaply cloneable byte buffer.
///
/// Wraps `Arc<Vec<u8>>` so message payloads and serialized blocks can be
/// shared between participants without copying. Mutations trigger
/// copy-on-write via `Arc::make_mut`.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Bytes(Arc<Vec<u8>>);

impl Bytes {
    /// Creates a new buffer from any type convertible to `Vec<u8>`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(data.into()))
    }

    /// Creates an empty buffer with the specified capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self(Arc::new(Vec::with_capacity(cap)))
    }

    /// Returns the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the capacity of the underlying vector.
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    /// Returns the buffer contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Copies the buffer contents into a new `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Appends bytes to the buffer, cloning the backing storage first if
    /// other references exist.
    pub fn extend_from_slice(&mut self, s: &[u8]) {
        Arc::make_mut(&mut self.0).extend_from_slice(s);
    }
}

impl Clone for Bytes {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl Encode for Bytes {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_slice());
    }
}

impl Decode for Bytes {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let vec = Vec::<u8>::decode(input)?;
        Ok(Bytes::new(vec))
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Bytes {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn clone_shares_storage() {
        let a = Bytes::new(vec![1u8, 2, 3]);
        let b = a.clone();
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_slice(), b.as_slice()));
    }

    #[test]
    fn extend_copies_on_write() {
        let a = Bytes::new(vec![1u8, 2, 3]);
        let mut b = a.clone();
        b.extend_from_slice(&[4, 5]);

        assert_eq!(a.as_slice(), &[1, 2, 3]);
        assert_eq!(b.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = Bytes::new(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let encoded = original.to_bytes();
        let decoded = Bytes::from_bytes(&encoded).expect("decode failed");
        assert_eq!(original, decoded);
    }

    #[test]
    fn empty_buffer() {
        let b = Bytes::default();
        assert!(b.is_empty());
        assert_eq!(b.len(), 0);

        let decoded = Bytes::from_bytes(&b.to_bytes()).expect("decode failed");
        assert!(decoded.is_empty());
    }
}
