//! A pedagogical proof-of-work blockchain with an account-based ledger.
//!
//! Clients and miners exchange signed transactions and mined blocks over a
//! broadcast network; every participant maintains an independent replica of
//! the chain and converges on the longest valid branch.

pub mod core;
pub mod crypto;
pub mod network;
pub mod node;
pub mod types;
pub mod utils;
