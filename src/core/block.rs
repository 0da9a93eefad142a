//! Ledger blocks: balance snapshots sealed by proof-of-work.
//!
//! A block owns the full account state reached by applying its transactions
//! on top of its parent's state. The balance and nonce maps are derived data:
//! they are rebuilt by `rerun` on receipt and never serialized, except on the
//! genesis block where the balances ARE the payload.

use crate::core::transaction::{Transaction, TxRejection};
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, SizeCounter};
use crate::types::hash::Hash;
use goldnet_derive::Error;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors raised by the block-acceptance pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockError {
    /// The block hash does not fall below the proof-of-work target.
    #[error("invalid proof of work on block {0}")]
    InvalidProof(Hash),

    /// The parent is not yet known; the block is buffered, not dropped.
    #[error("block {block} is missing parent {missing}")]
    MissingParent { block: Hash, missing: Hash },

    /// Re-applying the block's transactions on its parent failed.
    #[error("replay of block {block} failed: {reason}")]
    ReplayFailure { block: Hash, reason: TxRejection },

    /// The block is already known.
    #[error("duplicate block {0}")]
    Duplicate(Hash),
}

/// Milliseconds since the Unix epoch; display and hash input only.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A ledger state snapshot under construction or sealed by a proof.
///
/// Blocks are mutable while a miner assembles them (adding transactions,
/// incrementing the proof) and immutable once gossiped. The id is never
/// cached because mining changes it on every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Distance from genesis; genesis is 0.
    pub chain_length: u64,
    /// Creation instant in milliseconds; opaque, not validated.
    pub timestamp: u64,
    /// Parent block id, absent on genesis.
    pub prev_block_hash: Option<Hash>,
    /// Proof-of-work threshold: the block is sealed iff `id() < target`.
    pub target: Hash,
    /// Nonce varied during mining.
    pub proof: u64,
    /// Account receiving this block's coinbase plus fees, absent on genesis.
    pub reward_addr: Option<Address>,
    /// Reward paid for mining this block, on top of accumulated fees.
    pub coinbase_reward: u64,

    /// Included transactions in application order.
    transactions: Vec<(Hash, Transaction)>,
    /// Account balances after applying every included transaction.
    balances: HashMap<Address, u64>,
    /// Next expected nonce per payer.
    next_nonce: HashMap<Address, u64>,
}

impl Block {
    /// Builds the genesis block carrying the chain's initial balances.
    ///
    /// The timestamp is fixed at zero so every participant constructing the
    /// genesis from the same configuration derives the same block id.
    pub fn genesis(initial_balances: &[(Address, u64)], target: Hash, coinbase_reward: u64) -> Self {
        Block {
            chain_length: 0,
            timestamp: 0,
            prev_block_hash: None,
            target,
            proof: 0,
            reward_addr: None,
            coinbase_reward,
            transactions: Vec::new(),
            balances: initial_balances.iter().copied().collect(),
            next_nonce: HashMap::new(),
        }
    }

    /// Starts a new block on top of `parent`, rewarded to `reward_addr`.
    ///
    /// The parent's balances and nonces are the starting state, and the
    /// parent's miner is credited here with the parent's coinbase plus fees;
    /// a mining reward becomes spendable one block after it is earned.
    pub fn new(reward_addr: Address, parent: &Block, target: Hash, coinbase_reward: u64) -> Self {
        let mut balances = parent.balances.clone();
        if let Some(parent_miner) = parent.reward_addr {
            *balances.entry(parent_miner).or_insert(0) += parent.total_rewards();
        }

        Block {
            chain_length: parent.chain_length + 1,
            timestamp: now_millis(),
            prev_block_hash: Some(parent.id()),
            target,
            proof: 0,
            reward_addr: Some(reward_addr),
            coinbase_reward,
            transactions: Vec::new(),
            balances,
            next_nonce: parent.next_nonce.clone(),
        }
    }

    /// Attempts to include a transaction, applying it to the running state.
    ///
    /// Checks run in a fixed order: duplicate, missing signature, invalid
    /// signature, insufficient funds, replayed nonce, out-of-order nonce.
    /// On success the payer is debited the full total output, every output
    /// is credited, and the payer's next nonce advances by exactly one.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), TxRejection> {
        let id = tx.id();

        if self.contains(&id) {
            return Err(TxRejection::Duplicate(id));
        }
        if tx.sig.is_none() {
            return Err(TxRejection::MissingSignature);
        }
        if !tx.valid_signature() {
            return Err(TxRejection::InvalidSignature(id));
        }
        if !tx.sufficient_funds(self) {
            return Err(TxRejection::InsufficientFunds {
                needed: tx.total_output(),
                balance: self.balance_of(tx.from),
            });
        }

        let expected = self.next_nonce_of(tx.from);
        if tx.nonce < expected {
            return Err(TxRejection::ReplayedNonce {
                got: tx.nonce,
                expected,
            });
        }
        if tx.nonce > expected {
            return Err(TxRejection::OutOfOrderNonce {
                got: tx.nonce,
                expected,
            });
        }

        let debit = tx.total_output();
        let payer = self
            .balances
            .entry(tx.from)
            .or_insert(0);
        // sufficient_funds above guarantees the subtraction cannot underflow
        *payer -= debit;

        for output in &tx.outputs {
            *self.balances.entry(output.to).or_insert(0) += output.amount;
        }

        self.next_nonce.insert(tx.from, tx.nonce + 1);
        self.transactions.push((id, tx));
        Ok(())
    }

    /// True iff the block hash falls strictly below the target.
    ///
    /// The hash is interpreted as a 256-bit big-endian integer, which is
    /// what the byte-wise `Ord` on [`Hash`] computes.
    pub fn has_valid_proof(&self) -> bool {
        self.id() < self.target
    }

    /// Writes the canonical wire form.
    ///
    /// Genesis: `chain_length`, `timestamp`, balances as address-sorted
    /// pairs. Non-genesis: `chain_length`, `timestamp`, transaction pairs in
    /// application order, parent id, proof, reward address. Derived state is
    /// never written for non-genesis blocks; the target and coinbase reward
    /// are chain parameters supplied by the receiving side's configuration.
    fn wire_encode<S: EncodeSink>(&self, out: &mut S) {
        self.chain_length.encode(out);
        self.timestamp.encode(out);

        match self.prev_block_hash {
            None => {
                let mut entries: Vec<(Address, u64)> =
                    self.balances.iter().map(|(a, g)| (*a, *g)).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries.encode(out);
            }
            Some(prev) => {
                self.transactions.encode(out);
                prev.encode(out);
                self.proof.encode(out);
                self.reward_addr.encode(out);
            }
        }
    }

    /// Serializes to the canonical wire form.
    pub fn to_wire(&self) -> Bytes {
        let mut counter = SizeCounter::new();
        self.wire_encode(&mut counter);

        let mut out = Bytes::with_capacity(counter.len());
        self.wire_encode(&mut out);
        out
    }

    /// Reconstructs a block from its wire form.
    ///
    /// `target` and `coinbase_reward` come from the chain configuration.
    /// Non-genesis blocks come back with empty derived state; the caller
    /// must `rerun` them against the parent before trusting any balance.
    pub fn from_wire(data: &[u8], target: Hash, coinbase_reward: u64) -> Result<Block, DecodeError> {
        let mut input = data;

        let chain_length = u64::decode(&mut input)?;
        let timestamp = u64::decode(&mut input)?;

        let block = if chain_length == 0 {
            let entries = Vec::<(Address, u64)>::decode(&mut input)?;
            Block {
                chain_length,
                timestamp,
                prev_block_hash: None,
                target,
                proof: 0,
                reward_addr: None,
                coinbase_reward,
                transactions: Vec::new(),
                balances: entries.into_iter().collect(),
                next_nonce: HashMap::new(),
            }
        } else {
            let transactions = Vec::<(Hash, Transaction)>::decode(&mut input)?;
            let prev = Hash::decode(&mut input)?;
            let proof = u64::decode(&mut input)?;
            let reward_addr = Option::<Address>::decode(&mut input)?;
            Block {
                chain_length,
                timestamp,
                prev_block_hash: Some(prev),
                target,
                proof,
                reward_addr,
                coinbase_reward,
                transactions,
                balances: HashMap::new(),
                next_nonce: HashMap::new(),
            }
        };

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(block)
    }

    /// Returns the block id: the hash of the canonical wire form.
    ///
    /// Derived state is excluded from the wire form, so the id is stable
    /// across serialization, deserialization, and replay.
    pub fn id(&self) -> Hash {
        let mut h = Hash::sha256();
        self.wire_encode(&mut h);
        h.finalize()
    }

    /// The full payout for mining this block: coinbase plus every fee.
    pub fn total_rewards(&self) -> u64 {
        self.transactions
            .iter()
            .fold(self.coinbase_reward, |acc, (_, tx)| {
                acc.saturating_add(tx.fee)
            })
    }

    /// Rebuilds the derived state by re-applying every transaction on top of
    /// `parent`'s state.
    ///
    /// On failure the block's state is left invalid and the caller must
    /// discard the block.
    pub fn rerun(&mut self, parent: &Block) -> Result<(), TxRejection> {
        self.balances = parent.balances.clone();
        self.next_nonce = parent.next_nonce.clone();
        if let Some(parent_miner) = parent.reward_addr {
            *self.balances.entry(parent_miner).or_insert(0) += parent.total_rewards();
        }

        let staged = std::mem::take(&mut self.transactions);
        for (_, tx) in staged {
            self.add_transaction(tx)?;
        }
        Ok(())
    }

    /// Membership test by transaction id.
    pub fn contains(&self, id: &Hash) -> bool {
        self.transactions.iter().any(|(h, _)| h == id)
    }

    /// Included transactions in application order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().map(|(_, tx)| tx)
    }

    /// Number of included transactions.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Balance of `addr` after this block's transactions, zero if unknown.
    pub fn balance_of(&self, addr: Address) -> u64 {
        self.balances.get(&addr).copied().unwrap_or(0)
    }

    /// Next expected nonce for `addr`, zero if the account never paid.
    pub fn next_nonce_of(&self, addr: Address) -> u64 {
        self.next_nonce.get(&addr).copied().unwrap_or(0)
    }

    /// Sum of all balances in this block's snapshot.
    pub fn total_gold(&self) -> u64 {
        self.balances.values().sum()
    }

    /// True for the block at chain length zero.
    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::utils::test_utils::fixtures::{
        easy_target, funded_genesis, signed_transfer, transfer,
    };

    #[test]
    fn genesis_carries_initial_balances() {
        let alice = PrivateKey::new().public_key().address;
        let bob = PrivateKey::new().public_key().address;
        let genesis = Block::genesis(&[(alice, 233), (bob, 99)], easy_target(), 25);

        assert_eq!(genesis.chain_length, 0);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.balance_of(alice), 233);
        assert_eq!(genesis.balance_of(bob), 99);
        assert_eq!(genesis.balance_of(PrivateKey::new().public_key().address), 0);
    }

    #[test]
    fn genesis_id_is_deterministic() {
        let alice = PrivateKey::new().public_key().address;
        let bob = PrivateKey::new().public_key().address;

        let one = Block::genesis(&[(alice, 233), (bob, 99)], easy_target(), 25);
        let two = Block::genesis(&[(bob, 99), (alice, 233)], easy_target(), 25);

        // Wire form sorts balances, so insertion order cannot matter
        assert_eq!(one.id(), two.id());
    }

    #[test]
    fn child_extends_parent_by_one() {
        let miner = PrivateKey::new().public_key().address;
        let genesis = Block::genesis(&[], easy_target(), 25);
        let child = Block::new(miner, &genesis, easy_target(), 25);

        assert_eq!(child.chain_length, 1);
        assert_eq!(child.prev_block_hash, Some(genesis.id()));
        assert_eq!(child.reward_addr, Some(miner));
    }

    #[test]
    fn rewards_are_paid_one_block_late() {
        let (genesis, keys) = funded_genesis(&[("minnie", 400)]);
        let minnie = keys["minnie"].public_key().address;

        // Block 1 mined by minnie: reward not yet visible
        let block1 = Block::new(minnie, &genesis, easy_target(), 25);
        assert_eq!(block1.balance_of(minnie), 400);

        // Block 2 credits block 1's reward
        let block2 = Block::new(minnie, &block1, easy_target(), 25);
        assert_eq!(block2.balance_of(minnie), 425);
    }

    #[test]
    fn fees_accumulate_into_next_block_reward() {
        let (genesis, keys) = funded_genesis(&[("alice", 100), ("minnie", 0)]);
        let alice = &keys["alice"];
        let minnie = keys["minnie"].public_key().address;
        let bob = PrivateKey::new().public_key().address;

        let mut block1 = Block::new(minnie, &genesis, easy_target(), 25);
        block1
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 3))
            .expect("transfer refused");

        assert_eq!(block1.total_rewards(), 28);

        let block2 = Block::new(minnie, &block1, easy_target(), 25);
        assert_eq!(block2.balance_of(minnie), 28);
    }

    #[test]
    fn add_transaction_moves_gold() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let alice_addr = alice.public_key().address;
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1))
            .expect("transfer refused");

        assert_eq!(block.balance_of(alice_addr), 192);
        assert_eq!(block.balance_of(bob), 40);
        assert_eq!(block.transaction_count(), 1);
    }

    #[test]
    fn add_transaction_advances_nonce_by_one() {
        let (genesis, keys) = funded_genesis(&[("alice", 233), ("charlie", 67)]);
        let alice = &keys["alice"];
        let alice_addr = alice.public_key().address;
        let charlie_addr = keys["charlie"].public_key().address;
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1))
            .expect("transfer refused");

        assert_eq!(block.next_nonce_of(alice_addr), 1);
        // Other senders' nonces are untouched
        assert_eq!(block.next_nonce_of(charlie_addr), 0);
    }

    #[test]
    fn conservation_modulo_fee() {
        let (genesis, keys) = funded_genesis(&[("alice", 233), ("bob", 99)]);
        let alice = &keys["alice"];
        let bob = keys["bob"].public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        let before = block.total_gold();

        block
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1))
            .expect("transfer refused");

        // The fee leaves the balance map until the next block pays the miner
        assert_eq!(block.total_gold(), before - 1);
    }

    #[test]
    fn rejects_duplicate_transaction() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        let tx = signed_transfer(alice, 0, &[(40, bob)], 1);

        block.add_transaction(tx.clone()).expect("first add refused");
        let result = block.add_transaction(tx);
        assert!(matches!(result, Err(TxRejection::Duplicate(_))));
    }

    #[test]
    fn rejects_unsigned_transaction() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        let result = block.add_transaction(transfer(alice, 0, &[(40, bob)], 1));
        assert!(matches!(result, Err(TxRejection::MissingSignature)));
    }

    #[test]
    fn rejects_insufficient_funds() {
        let (genesis, keys) = funded_genesis(&[("alice", 30)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        let result = block.add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1));
        assert!(matches!(
            result,
            Err(TxRejection::InsufficientFunds {
                needed: 41,
                balance: 30
            })
        ));
        assert_eq!(block.transaction_count(), 0);
        assert_eq!(block.balance_of(bob), 0);
    }

    #[test]
    fn sufficient_funds_tracks_running_balance() {
        let (genesis, keys) = funded_genesis(&[("alice", 100)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(80, bob)], 1))
            .expect("first transfer refused");

        // Only 19 left: the second identical transfer must fail
        let result = block.add_transaction(signed_transfer(alice, 1, &[(80, bob)], 1));
        assert!(matches!(result, Err(TxRejection::InsufficientFunds { .. })));
    }

    #[test]
    fn rejects_replayed_nonce() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1))
            .expect("transfer refused");

        let replay = signed_transfer(alice, 0, &[(10, bob)], 1);
        let result = block.add_transaction(replay);
        assert!(matches!(
            result,
            Err(TxRejection::ReplayedNonce {
                got: 0,
                expected: 1
            })
        ));
    }

    #[test]
    fn defers_out_of_order_nonce() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);

        // Nonce 1 arrives before nonce 0 has been applied
        let early = signed_transfer(alice, 1, &[(10, bob)], 1);
        let result = block.add_transaction(early.clone());
        assert!(matches!(
            result,
            Err(TxRejection::OutOfOrderNonce {
                got: 1,
                expected: 0
            })
        ));

        // Once nonce 0 lands, nonce 1 becomes includable
        block
            .add_transaction(signed_transfer(alice, 0, &[(5, bob)], 1))
            .expect("nonce 0 refused");
        block.add_transaction(early).expect("nonce 1 still refused");
        assert_eq!(block.transaction_count(), 2);
    }

    #[test]
    fn proof_threshold_is_strict() {
        let genesis = Block::genesis(&[], easy_target(), 25);
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, Hash::max(), 25);
        // Everything is below the all-ones target
        assert!(block.has_valid_proof());

        block.target = Hash::zero();
        // Nothing is below zero
        assert!(!block.has_valid_proof());
    }

    #[test]
    fn proof_changes_id() {
        let genesis = Block::genesis(&[], easy_target(), 25);
        let miner = PrivateKey::new().public_key().address;
        let mut block = Block::new(miner, &genesis, easy_target(), 25);

        let before = block.id();
        block.proof += 1;
        assert_ne!(block.id(), before);
    }

    #[test]
    fn genesis_wire_roundtrip_preserves_id_and_balances() {
        let alice = PrivateKey::new().public_key().address;
        let genesis = Block::genesis(&[(alice, 233)], easy_target(), 25);

        let wire = genesis.to_wire();
        let decoded = Block::from_wire(&wire, easy_target(), 25).expect("decode failed");

        assert_eq!(decoded.id(), genesis.id());
        assert_eq!(decoded.balance_of(alice), 233);
        assert!(decoded.is_genesis());
    }

    #[test]
    fn block_wire_roundtrip_preserves_id() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1))
            .expect("transfer refused");
        block.proof = 81923;

        let wire = block.to_wire();
        let mut decoded = Block::from_wire(&wire, easy_target(), 25).expect("decode failed");

        assert_eq!(decoded.id(), block.id());
        assert_eq!(decoded.proof, 81923);

        // Derived state returns empty and is rebuilt by replay
        assert_eq!(decoded.balance_of(bob), 0);
        decoded.rerun(&genesis).expect("replay refused");
        assert_eq!(decoded.balance_of(bob), 40);
        assert_eq!(decoded.id(), block.id());
    }

    #[test]
    fn rerun_preserves_id_and_rebuilds_state() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let alice_addr = alice.public_key().address;
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(40, bob)], 1))
            .expect("transfer refused");

        let id_before = block.id();
        block.rerun(&genesis).expect("replay refused");

        assert_eq!(block.id(), id_before);
        assert_eq!(block.balance_of(alice_addr), 192);
        assert_eq!(block.balance_of(bob), 40);
        assert_eq!(block.next_nonce_of(alice_addr), 1);
    }

    #[test]
    fn rerun_fails_against_underfunded_parent() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        block
            .add_transaction(signed_transfer(alice, 0, &[(200, bob)], 1))
            .expect("transfer refused");

        // Replaying against a parent where alice is poor must fail
        let poor_genesis = Block::genesis(
            &[(alice.public_key().address, 10)],
            easy_target(),
            25,
        );
        let result = block.rerun(&poor_genesis);
        assert!(matches!(result, Err(TxRejection::InsufficientFunds { .. })));
    }

    #[test]
    fn contains_finds_included_transactions() {
        let (genesis, keys) = funded_genesis(&[("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let miner = PrivateKey::new().public_key().address;

        let mut block = Block::new(miner, &genesis, easy_target(), 25);
        let tx = signed_transfer(alice, 0, &[(40, bob)], 1);
        let id = tx.id();
        let other = signed_transfer(alice, 1, &[(1, bob)], 1);

        block.add_transaction(tx).expect("transfer refused");

        assert!(block.contains(&id));
        assert!(!block.contains(&other.id()));
    }
}
