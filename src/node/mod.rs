//! Network participants.
//!
//! A [`client::Client`] holds keys, posts transactions, and maintains a
//! replica of the chain. A [`miner::Miner`] owns a client and additionally
//! races to extend the chain with proof-of-work.

pub mod client;
pub mod miner;
