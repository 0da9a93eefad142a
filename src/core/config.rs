//! Chain-wide parameters and genesis construction.
//!
//! A [`ChainConfig`] is built once by the driver, frozen, and shared by
//! reference with every participant. Block and transaction construction go
//! through the [`BlockFactory`] capability so tests can substitute their own
//! implementations.

use crate::core::block::Block;
use crate::core::transaction::{Output, Transaction};
use crate::crypto::key_pair::PublicKey;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::DecodeError;
use crate::types::hash::{HASH_LEN, Hash};
use std::sync::Arc;

/// Default number of leading zero bits in the proof-of-work target.
pub const DEFAULT_POW_LEADING_ZEROES: u32 = 15;

/// Default gold paid for mining a block, on top of fees.
pub const DEFAULT_COINBASE_REWARD: u64 = 25;

/// Default fee offered by client transfers.
pub const DEFAULT_TX_FEE: u64 = 1;

/// Default number of blocks on top of a block before it is final.
pub const DEFAULT_CONFIRMED_DEPTH: u64 = 6;

/// Computes the proof-of-work target `(2^256 - 1) >> leading_zeroes`.
///
/// Lower shift values yield larger targets and therefore easier mining.
pub fn pow_target(leading_zeroes: u32) -> Hash {
    let mut bytes = [0xFFu8; HASH_LEN];
    let full_bytes = (leading_zeroes / 8) as usize;
    let remainder = leading_zeroes % 8;

    for byte in bytes.iter_mut().take(full_bytes.min(HASH_LEN)) {
        *byte = 0;
    }
    if full_bytes < HASH_LEN && remainder > 0 {
        bytes[full_bytes] = 0xFF >> remainder;
    }
    Hash(bytes)
}

/// Capability for constructing and decoding ledger objects.
///
/// The default chain uses [`StandardFactory`]; tests substitute their own to
/// observe or alter construction.
pub trait BlockFactory: Send + Sync {
    /// Starts a new block on `parent`, rewarded to `reward_addr`.
    fn make_block(&self, config: &ChainConfig, reward_addr: Address, parent: &Block) -> Block;

    /// Creates an unsigned transaction.
    fn make_transaction(
        &self,
        from: Address,
        nonce: u64,
        pub_key: PublicKey,
        outputs: Vec<Output>,
        fee: u64,
        data: Vec<(String, Bytes)>,
    ) -> Transaction;

    /// Reconstructs a block from wire bytes using the chain's parameters.
    fn decode_block(&self, config: &ChainConfig, data: &[u8]) -> Result<Block, DecodeError>;
}

/// The stock factory: plain [`Block`] and [`Transaction`] values.
pub struct StandardFactory;

impl BlockFactory for StandardFactory {
    fn make_block(&self, config: &ChainConfig, reward_addr: Address, parent: &Block) -> Block {
        Block::new(reward_addr, parent, config.target(), config.coinbase_reward)
    }

    fn make_transaction(
        &self,
        from: Address,
        nonce: u64,
        pub_key: PublicKey,
        outputs: Vec<Output>,
        fee: u64,
        data: Vec<(String, Bytes)>,
    ) -> Transaction {
        Transaction::new(from, nonce, pub_key, outputs, fee, data)
    }

    fn decode_block(&self, config: &ChainConfig, data: &[u8]) -> Result<Block, DecodeError> {
        Block::from_wire(data, config.target(), config.coinbase_reward)
    }
}

/// Process-wide chain parameters, immutable after construction.
pub struct ChainConfig {
    /// Leading zero bits of the proof-of-work target.
    pub pow_leading_zeroes: u32,
    /// Gold paid per mined block on top of fees.
    pub coinbase_reward: u64,
    /// Fee clients attach to transfers unless told otherwise.
    pub default_tx_fee: u64,
    /// Blocks required on top of a block before its contents are final.
    pub confirmed_depth: u64,
    /// Accounts funded directly in the genesis block.
    pub initial_balances: Vec<(Address, u64)>,

    /// Constructs and decodes ledger objects; tests may substitute it.
    pub factory: Arc<dyn BlockFactory>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            pow_leading_zeroes: DEFAULT_POW_LEADING_ZEROES,
            coinbase_reward: DEFAULT_COINBASE_REWARD,
            default_tx_fee: DEFAULT_TX_FEE,
            confirmed_depth: DEFAULT_CONFIRMED_DEPTH,
            initial_balances: Vec::new(),
            factory: Arc::new(StandardFactory),
        }
    }
}

impl ChainConfig {
    /// Creates a configuration with default parameters and no balances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the object factory, for tests that substitute construction.
    pub fn with_factory(mut self, factory: Arc<dyn BlockFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// The proof-of-work threshold derived from `pow_leading_zeroes`.
    pub fn target(&self) -> Hash {
        pow_target(self.pow_leading_zeroes)
    }

    /// Constructs the genesis block carrying `initial_balances`.
    ///
    /// Deterministic: the same configuration always yields the same id, so
    /// late joiners can be handed the genesis and agree with everyone else.
    pub fn make_genesis(&self) -> Block {
        Block::genesis(&self.initial_balances, self.target(), self.coinbase_reward)
    }

    /// Starts a new block through the configured factory.
    pub fn make_block(&self, reward_addr: Address, parent: &Block) -> Block {
        self.factory.make_block(self, reward_addr, parent)
    }

    /// Creates an unsigned transaction through the configured factory.
    pub fn make_transaction(
        &self,
        from: Address,
        nonce: u64,
        pub_key: PublicKey,
        outputs: Vec<Output>,
        fee: u64,
        data: Vec<(String, Bytes)>,
    ) -> Transaction {
        self.factory
            .make_transaction(from, nonce, pub_key, outputs, fee, data)
    }

    /// Decodes a block received from the network.
    pub fn decode_block(&self, data: &[u8]) -> Result<Block, DecodeError> {
        self.factory.decode_block(self, data)
    }
}
