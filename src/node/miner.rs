//! Miner participant: chunked proof-of-work search over a block under
//! construction.
//!
//! A miner owns a full [`Client`] for wallet and chain duties and adds the
//! race to extend the chain. Mining is cooperative: each search batch
//! evaluates a bounded number of proofs, then control returns to the mailbox
//! so inbound transactions and rival blocks are never starved.

use crate::core::block::Block;
use crate::core::config::ChainConfig;
use crate::core::transaction::{Transaction, TxRejection};
use crate::crypto::key_pair::PrivateKey;
use crate::network::message::{Message, MessageType, MissingBlockRequest};
use crate::network::net::Network;
use crate::node::client::Client;
use crate::types::bytes::Bytes;
use crate::types::encoding::Decode;
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// Default number of proof attempts per search batch.
pub const DEFAULT_MINING_ROUNDS: u64 = 2000;

/// A participant that assembles and mines blocks.
pub struct Miner {
    /// The underlying participant: wallet, chain replica, network handle.
    pub client: Client,
    /// Proof attempts evaluated per batch before yielding.
    pub mining_rounds: u64,

    current_block: Block,
}

impl Miner {
    /// Creates a miner and starts its first search on the genesis tip.
    pub fn new(
        name: impl Into<String>,
        key: PrivateKey,
        genesis: Block,
        config: Arc<ChainConfig>,
        net: Arc<dyn Network>,
    ) -> Self {
        let client = Client::new(name, key, genesis, config, net);
        let current_block = client.config.make_block(client.address, client.tip());

        Miner {
            client,
            current_block,
            mining_rounds: DEFAULT_MINING_ROUNDS,
        }
    }

    /// The block currently being searched.
    pub fn current_block(&self) -> &Block {
        &self.current_block
    }

    /// Runs one bounded batch of proof attempts.
    ///
    /// Returns `true` when a proof was found; the sealed block has then been
    /// announced to the network and fed through the miner's own
    /// block-acceptance pipeline, which starts the next search.
    pub async fn find_proof(&mut self) -> bool {
        let end = self.current_block.proof.saturating_add(self.mining_rounds);

        while self.current_block.proof < end {
            if self.current_block.has_valid_proof() {
                self.announce_proof().await;
                return true;
            }
            self.current_block.proof += 1;
        }

        false
    }

    /// Broadcasts the sealed block, then adopts it locally through the same
    /// pipeline every other participant runs.
    async fn announce_proof(&mut self) {
        let sealed = self.current_block.clone();
        self.client.log.info(&format!(
            "sealed block {} at length {} with {} transactions",
            sealed.id(),
            sealed.chain_length,
            sealed.transaction_count()
        ));

        if let Err(e) = self
            .client
            .net
            .broadcast(self.client.address, &Message::proof_found(&sealed))
            .await
        {
            self.client.log.warn(&format!("announce failed: {e}"));
        }

        self.receive_block(sealed).await;
    }

    /// The miner's block-acceptance path.
    ///
    /// Runs the client pipeline, and whenever an accepted block reaches the
    /// length of the block under construction, abandons the stale search:
    /// transactions on the abandoned branch that the adopted branch lacks
    /// are carried into a fresh block on the new tip.
    pub async fn receive_block(&mut self, block: Block) {
        if let Some(accepted) = self.client.receive_block(block).await
            && accepted.chain_length >= self.current_block.chain_length
        {
            let carry = self.sync_transactions(&accepted);
            self.start_new_search(carry);
        }
    }

    /// Collects transactions visible on the abandoned branch but absent from
    /// the adopted one.
    ///
    /// Walks both branches back to their common ancestor, aligning heights
    /// first. Transactions staged in the block under construction count as
    /// part of the abandoned branch.
    fn sync_transactions(&self, new_tip: &Arc<Block>) -> Vec<Transaction> {
        let mut carry: HashMap<Hash, Transaction> = self
            .current_block
            .transactions()
            .map(|tx| (tx.id(), tx.clone()))
            .collect();

        let chain = &self.client.chain;
        let mut old_cursor: Option<Arc<Block>> = self
            .current_block
            .prev_block_hash
            .and_then(|h| chain.get(&h).cloned());
        let mut new_cursor: Arc<Block> = new_tip.clone();

        // Lower the old branch to the new branch's height, keeping its txs
        while let Some(old) = old_cursor.clone() {
            if old.chain_length <= new_cursor.chain_length {
                break;
            }
            for tx in old.transactions() {
                carry.insert(tx.id(), tx.clone());
            }
            old_cursor = old.prev_block_hash.and_then(|h| chain.get(&h).cloned());
        }

        // Lower the new branch to the old branch's height, dropping its txs
        let old_height = old_cursor.as_ref().map(|o| o.chain_length).unwrap_or(0);
        while new_cursor.chain_length > old_height {
            for tx in new_cursor.transactions() {
                carry.remove(&tx.id());
            }
            match new_cursor.prev_block_hash.and_then(|h| chain.get(&h).cloned()) {
                Some(parent) => new_cursor = parent,
                None => break,
            }
        }

        // Walk both down in lockstep to the common ancestor
        while let Some(old) = old_cursor.clone() {
            if old.id() == new_cursor.id() {
                break;
            }
            for tx in old.transactions() {
                carry.insert(tx.id(), tx.clone());
            }
            for tx in new_cursor.transactions() {
                carry.remove(&tx.id());
            }
            old_cursor = old.prev_block_hash.and_then(|h| chain.get(&h).cloned());
            match new_cursor.prev_block_hash.and_then(|h| chain.get(&h).cloned()) {
                Some(parent) => new_cursor = parent,
                None => break,
            }
        }

        carry.into_values().collect()
    }

    /// Begins a fresh search on the current tip, re-staging the carried
    /// transactions.
    ///
    /// Per-sender nonce order is restored by sorting; transactions the new
    /// chain already settled fail `add_transaction` and are dropped
    /// silently.
    fn start_new_search(&mut self, mut carry: Vec<Transaction>) {
        let tip = self.client.tip().clone();
        self.current_block = self
            .client
            .config
            .make_block(self.client.address, &tip);

        carry.sort_by(|a, b| (a.from, a.nonce).cmp(&(b.from, b.nonce)));
        for tx in carry {
            let _ = self.current_block.add_transaction(tx);
        }
    }

    /// Stages a gossiped transaction into the block under construction.
    ///
    /// Out-of-order nonces are deferred, not errors: the transaction stays
    /// eligible once the gap closes (typically via a rebroadcast or the next
    /// search). Duplicates are silent.
    pub fn add_to_current_block(&mut self, tx: Transaction) {
        let id = tx.id();
        if let Err(reason) = self.current_block.add_transaction(tx) {
            match reason {
                TxRejection::OutOfOrderNonce { .. } => self
                    .client
                    .log
                    .info(&format!("deferring transaction {id}: {reason}")),
                TxRejection::Duplicate(_) => {}
                _ => self
                    .client
                    .log
                    .warn(&format!("refusing transaction {id}: {reason}")),
            }
        }
    }

    /// Decodes and dispatches one incoming frame.
    ///
    /// Unlike a pure client, a miner consumes `PostTransaction` gossip, and
    /// `StartMining` triggers a search batch.
    pub async fn handle_message(&mut self, bytes: &[u8]) {
        let msg = match Message::from_bytes(bytes) {
            Ok(m) => m,
            Err(e) => {
                self.client
                    .log
                    .warn(&format!("dropping malformed frame: {e}"));
                return;
            }
        };

        match msg.kind {
            MessageType::PostTransaction => match Transaction::from_bytes(&msg.payload) {
                Ok(tx) => self.add_to_current_block(tx),
                Err(e) => self
                    .client
                    .log
                    .warn(&format!("dropping malformed transaction: {e}")),
            },
            MessageType::ProofFound => match self.client.config.decode_block(&msg.payload) {
                Ok(block) => self.receive_block(block).await,
                Err(e) => self
                    .client
                    .log
                    .warn(&format!("dropping malformed block: {e}")),
            },
            MessageType::MissingBlock => match MissingBlockRequest::from_bytes(&msg.payload) {
                Ok(request) => self.client.provide_missing_block(request).await,
                Err(e) => self
                    .client
                    .log
                    .warn(&format!("dropping malformed request: {e}")),
            },
            MessageType::StartMining => {
                self.find_proof().await;
            }
        }
    }

    /// Processes every frame currently queued in the mailbox.
    pub async fn drain_mailbox(&mut self, rx: &mut Receiver<Bytes>) -> usize {
        let mut handled = 0;
        while let Ok(bytes) = rx.try_recv() {
            self.handle_message(&bytes).await;
            handled += 1;
        }
        handled
    }

    /// The cooperative mining loop: drain the mailbox, run one search
    /// batch, yield, repeat until the chain reaches `target_chain_length`.
    ///
    /// The yield between batches is the portable equivalent of re-arming the
    /// search with a zero-delay timer; queued messages are always serviced
    /// before the next batch.
    pub async fn mine_until(&mut self, rx: &mut Receiver<Bytes>, target_chain_length: u64) {
        while self.client.height() < target_chain_length {
            self.drain_mailbox(rx).await;
            self.find_proof().await;
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::simulator::SimulatedNet;
    use crate::utils::test_utils::fixtures::{quick_config, seal, signed_transfer};

    fn miner_on_net(
        name: &str,
        accounts: &[(&str, u64)],
    ) -> (
        Miner,
        Receiver<Bytes>,
        std::collections::HashMap<String, PrivateKey>,
        Arc<SimulatedNet>,
    ) {
        let (config, keys) = quick_config(accounts);
        let net = SimulatedNet::new();
        let genesis = config.make_genesis();

        let key = keys.get(name).cloned().unwrap_or_else(PrivateKey::new);
        let miner = Miner::new(name, key, genesis, config, net.clone());
        let rx = net.register(miner.client.address);
        (miner, rx, keys, net)
    }

    /// Runs search batches until a proof lands. The easy test target needs
    /// a few hundred attempts on average, far below one default batch.
    async fn mine_one_block(miner: &mut Miner) {
        for _ in 0..64 {
            if miner.find_proof().await {
                return;
            }
        }
        panic!("no proof found in 64 batches");
    }

    #[tokio::test]
    async fn first_search_builds_on_genesis() {
        let (miner, _rx, _keys, _net) = miner_on_net("minnie", &[("minnie", 400)]);

        assert_eq!(miner.current_block().chain_length, 1);
        assert_eq!(
            miner.current_block().prev_block_hash,
            Some(miner.client.tip().id())
        );
        assert_eq!(
            miner.current_block().reward_addr,
            Some(miner.client.address)
        );
    }

    #[tokio::test]
    async fn found_proof_is_adopted_and_announced() {
        let (mut miner, _rx, _keys, net) = miner_on_net("minnie", &[("minnie", 400)]);
        let mut observer_rx = net.register(PrivateKey::new().public_key().address);

        mine_one_block(&mut miner).await;

        // The miner advanced its own chain through the normal pipeline
        assert_eq!(miner.client.height(), 1);
        // ...and immediately started a search at the next length
        assert_eq!(miner.current_block().chain_length, 2);

        // Everyone else heard the announcement
        let bytes = observer_rx.recv().await.unwrap();
        let msg = Message::from_bytes(&bytes).unwrap();
        assert_eq!(msg.kind, MessageType::ProofFound);
    }

    #[tokio::test]
    async fn mining_rewards_mature_one_block_late() {
        let (mut miner, _rx, _keys, _net) = miner_on_net("minnie", &[("minnie", 400)]);
        let minnie = miner.client.address;

        mine_one_block(&mut miner).await;
        // Reward for block 1 is not in block 1's state
        assert_eq!(miner.client.tip().balance_of(minnie), 400);

        mine_one_block(&mut miner).await;
        // Block 2 credits block 1's coinbase
        assert_eq!(miner.client.tip().balance_of(minnie), 425);
    }

    #[tokio::test]
    async fn gossiped_transaction_lands_in_current_block() {
        let (mut miner, _rx, keys, _net) = miner_on_net("minnie", &[("minnie", 400), ("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;

        let tx = signed_transfer(alice, 0, &[(40, bob)], 1);
        let id = tx.id();
        miner.add_to_current_block(tx);

        assert!(miner.current_block().contains(&id));
    }

    #[tokio::test]
    async fn out_of_order_nonce_is_deferred_until_gap_closes() {
        let (mut miner, _rx, keys, _net) = miner_on_net("minnie", &[("minnie", 400), ("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;

        let first = signed_transfer(alice, 0, &[(10, bob)], 1);
        let second = signed_transfer(alice, 1, &[(20, bob)], 1);

        // Nonce 1 arrives first: not included yet
        miner.add_to_current_block(second.clone());
        assert!(!miner.current_block().contains(&second.id()));

        // Nonce 0 lands, then the rebroadcast of nonce 1 is accepted
        miner.add_to_current_block(first.clone());
        miner.add_to_current_block(second.clone());

        assert!(miner.current_block().contains(&first.id()));
        assert!(miner.current_block().contains(&second.id()));
    }

    #[tokio::test]
    async fn rival_block_restarts_search_on_new_tip() {
        let (mut miner, _rx, _keys, _net) = miner_on_net("minnie", &[("minnie", 400)]);
        let config = miner.client.config.clone();
        let rival_miner = PrivateKey::new().public_key().address;

        let mut rival = config.make_block(rival_miner, miner.client.tip());
        seal(&mut rival);

        miner.receive_block(rival.clone()).await;

        assert_eq!(miner.client.tip().id(), rival.id());
        assert_eq!(miner.current_block().chain_length, 2);
        assert_eq!(miner.current_block().prev_block_hash, Some(rival.id()));
    }

    #[tokio::test]
    async fn staged_transactions_survive_a_fork_switch() {
        let (mut miner, _rx, keys, _net) = miner_on_net("minnie", &[("minnie", 400), ("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let config = miner.client.config.clone();
        let rival_miner = PrivateKey::new().public_key().address;

        // Stage a transfer, then lose the race for block 1 to a rival
        // block that does not include it
        let tx = signed_transfer(alice, 0, &[(40, bob)], 1);
        let id = tx.id();
        miner.add_to_current_block(tx);

        let mut rival = config.make_block(rival_miner, miner.client.tip());
        seal(&mut rival);
        miner.receive_block(rival).await;

        // The new search carries the transfer forward
        assert_eq!(miner.current_block().chain_length, 2);
        assert!(miner.current_block().contains(&id));
    }

    #[tokio::test]
    async fn settled_transactions_are_not_carried_forward() {
        let (mut miner, _rx, keys, _net) = miner_on_net("minnie", &[("minnie", 400), ("alice", 233)]);
        let alice = &keys["alice"];
        let bob = PrivateKey::new().public_key().address;
        let config = miner.client.config.clone();
        let rival_miner = PrivateKey::new().public_key().address;

        let tx = signed_transfer(alice, 0, &[(40, bob)], 1);
        let id = tx.id();
        miner.add_to_current_block(tx.clone());

        // The rival block DID include the same transfer
        let mut rival = config.make_block(rival_miner, miner.client.tip());
        rival.add_transaction(tx).expect("transfer refused");
        seal(&mut rival);
        miner.receive_block(rival).await;

        assert!(!miner.current_block().contains(&id));
    }

    #[tokio::test]
    async fn mine_until_reaches_target_length() {
        let (mut miner, mut rx, _keys, _net) = miner_on_net("minnie", &[("minnie", 400)]);

        miner.mine_until(&mut rx, 3).await;

        assert!(miner.client.height() >= 3);
    }

    #[tokio::test]
    async fn miner_serves_missing_block_requests() {
        let (mut miner, mut miner_rx, _keys, net) = miner_on_net("minnie", &[("minnie", 400)]);

        mine_one_block(&mut miner).await;
        let block1_id = miner.client.tip().id();

        let donald = PrivateKey::new().public_key().address;
        let mut donald_rx = net.register(donald);

        let request = MissingBlockRequest {
            from: donald,
            missing: block1_id,
        };
        net.send_to(miner.client.address, &Message::missing_block(&request))
            .await
            .unwrap();

        miner.drain_mailbox(&mut miner_rx).await;

        let bytes = donald_rx.recv().await.unwrap();
        let msg = Message::from_bytes(&bytes).unwrap();
        assert_eq!(msg.kind, MessageType::ProofFound);
    }
}
