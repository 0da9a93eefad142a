//! Core ledger data structures and consensus rules.
//!
//! - `block`: ledger state snapshots sealed by proof-of-work
//! - `chain`: per-participant block store and head tracking
//! - `config`: chain-wide parameters and genesis construction
//! - `transaction`: signed transfer records with replay protection

pub mod block;
pub mod chain;
pub mod config;
pub mod transaction;
