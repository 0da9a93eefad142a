//! Foundational value types shared across the crate.
//!
//! - `address`: account identifiers derived from public keys
//! - `bytes`: reference-counted byte buffer for message payloads
//! - `encoding`: deterministic binary serialization traits
//! - `hash`: 32-byte SHA-256 digests and incremental hashing
//! - `wrapper_types`: common type aliases

pub mod address;
pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod wrapper_types;
