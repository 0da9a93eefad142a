//! Cryptographic primitives: key pairs, signatures, address derivation.

pub mod key_pair;
