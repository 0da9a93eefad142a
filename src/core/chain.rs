//! Per-participant block store and head tracking.
//!
//! Every participant holds its own replica of the chain: an index of all
//! accepted blocks, a buffer of blocks whose parent has not arrived yet, and
//! the ids of the heaviest head and its confirmed ancestor. Blocks are
//! immutable once stored, so replicas share them through `Arc`.

use crate::core::block::Block;
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::sync::Arc;

/// Block store backing one participant's view of the chain.
pub struct ChainStore {
    /// Every accepted block, indexed by id.
    blocks: HashMap<Hash, Arc<Block>>,
    /// Blocks waiting for a parent, keyed by the missing parent id.
    pending_by_missing_parent: HashMap<Hash, Vec<Block>>,
    /// Head of the heaviest known chain.
    last_block: Hash,
    /// Ancestor of the head at the confirmation depth (or genesis).
    last_confirmed: Hash,
    /// How many blocks must sit on top of a block before it is final.
    confirmed_depth: u64,
}

impl ChainStore {
    /// Creates a store seeded with the genesis block as head and confirmed.
    pub fn new(genesis: Block, confirmed_depth: u64) -> Self {
        let id = genesis.id();
        let mut blocks = HashMap::new();
        blocks.insert(id, Arc::new(genesis));

        ChainStore {
            blocks,
            pending_by_missing_parent: HashMap::new(),
            last_block: id,
            last_confirmed: id,
            confirmed_depth,
        }
    }

    /// True if the block id has been accepted.
    pub fn contains(&self, id: &Hash) -> bool {
        self.blocks.contains_key(id)
    }

    /// Looks up an accepted block by id.
    pub fn get(&self, id: &Hash) -> Option<&Arc<Block>> {
        self.blocks.get(id)
    }

    /// Stores an accepted block and returns the shared handle.
    pub fn insert(&mut self, block: Block) -> Arc<Block> {
        let id = block.id();
        let shared = Arc::new(block);
        self.blocks.insert(id, shared.clone());
        shared
    }

    /// Head of the heaviest known chain.
    pub fn tip(&self) -> &Arc<Block> {
        &self.blocks[&self.last_block]
    }

    /// Deepest ancestor of the head considered final.
    pub fn confirmed(&self) -> &Arc<Block> {
        &self.blocks[&self.last_confirmed]
    }

    /// Chain length of the current head.
    pub fn height(&self) -> u64 {
        self.tip().chain_length
    }

    /// Adopts `candidate` as head iff it extends a strictly longer chain.
    ///
    /// Equal length never switches heads; this keeps symmetric competitions
    /// stable until one branch outgrows the other. Returns whether the head
    /// moved.
    pub fn try_advance_head(&mut self, candidate: &Arc<Block>) -> bool {
        if candidate.chain_length <= self.tip().chain_length {
            return false;
        }

        self.last_block = candidate.id();
        self.recompute_confirmed();
        true
    }

    /// Walks `confirmed_depth` parents back from the head (stopping at
    /// genesis) to refresh the confirmed pointer.
    fn recompute_confirmed(&mut self) {
        let mut cursor = self.tip().clone();
        for _ in 0..self.confirmed_depth {
            let Some(prev) = cursor.prev_block_hash else {
                break;
            };
            match self.blocks.get(&prev) {
                Some(parent) => cursor = parent.clone(),
                None => break,
            }
        }
        self.last_confirmed = cursor.id();
    }

    /// Buffers a block whose parent is unknown.
    ///
    /// Returns `true` if this parent id was not already awaited, in which
    /// case the caller should request the missing block from the network
    /// exactly once. Re-deliveries of the same orphan are ignored.
    pub fn buffer_orphan(&mut self, block: Block) -> bool {
        let Some(missing) = block.prev_block_hash else {
            return false;
        };

        let waiting = self.pending_by_missing_parent.entry(missing).or_default();
        let first_for_parent = waiting.is_empty();

        let id = block.id();
        if !waiting.iter().any(|b| b.id() == id) {
            waiting.push(block);
        }
        first_for_parent
    }

    /// Removes and returns every block that was waiting for `parent`.
    pub fn take_orphans(&mut self, parent: &Hash) -> Vec<Block> {
        self.pending_by_missing_parent
            .remove(parent)
            .unwrap_or_default()
    }

    /// True if the transaction id appears anywhere in the confirmed prefix
    /// of the chain (the confirmed block and all its ancestors).
    pub fn confirmed_contains_tx(&self, id: &Hash) -> bool {
        let mut cursor = self.confirmed().clone();
        loop {
            if cursor.contains(id) {
                return true;
            }
            let Some(prev) = cursor.prev_block_hash else {
                return false;
            };
            match self.blocks.get(&prev) {
                Some(parent) => cursor = parent.clone(),
                None => return false,
            }
        }
    }
}
