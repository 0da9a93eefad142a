//! Client participant: wallet operations and the block-acceptance pipeline.

use crate::core::block::{Block, BlockError};
use crate::core::chain::ChainStore;
use crate::core::config::ChainConfig;
use crate::core::transaction::{Output, Transaction};
use crate::crypto::key_pair::PrivateKey;
use crate::network::message::{Message, MessageType, MissingBlockRequest};
use crate::network::net::Network;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::Decode;
use crate::types::hash::Hash;
use crate::utils::log::Logger;
use goldnet_derive::Error;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// Errors surfaced to the wallet owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The transfer total exceeds the spendable confirmed balance.
    #[error("insufficient funds: needs {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },
}

/// A participant with a key pair, a wallet, and a replica of the chain.
///
/// All state is owned by the client and touched only from its own task;
/// other participants are reached exclusively through the network handle.
pub struct Client {
    /// Human-readable participant name, used for logging.
    pub name: String,
    /// Account identifier derived from the public key.
    pub address: Address,

    key: PrivateKey,
    /// Next outgoing transaction nonce.
    nonce: u64,
    /// Posted transactions not yet seen in the confirmed chain.
    pending_outgoing: Vec<(Hash, Transaction)>,

    pub(crate) chain: ChainStore,
    pub(crate) config: Arc<ChainConfig>,
    pub(crate) net: Arc<dyn Network>,
    pub(crate) log: Logger,
}

impl Client {
    /// Creates a participant seeded with the genesis block.
    ///
    /// Late joiners pass the same genesis; everything newer is fetched from
    /// peers through `MissingBlock` requests.
    pub fn new(
        name: impl Into<String>,
        key: PrivateKey,
        genesis: Block,
        config: Arc<ChainConfig>,
        net: Arc<dyn Network>,
    ) -> Self {
        let name = name.into();
        let address = key.public_key().address;

        Client {
            log: Logger::new(name.clone()),
            chain: ChainStore::new(genesis, config.confirmed_depth),
            name,
            address,
            key,
            nonce: 0,
            pending_outgoing: Vec::new(),
            config,
            net,
        }
    }

    /// Head of this participant's heaviest known chain.
    pub fn tip(&self) -> &Arc<Block> {
        self.chain.tip()
    }

    /// The deepest block this participant considers final.
    pub fn confirmed_block(&self) -> &Arc<Block> {
        self.chain.confirmed()
    }

    /// Chain length of the current head.
    pub fn height(&self) -> u64 {
        self.chain.height()
    }

    /// True if the block id has been accepted into the local replica.
    pub fn knows_block(&self, id: &Hash) -> bool {
        self.chain.contains(id)
    }

    /// Balance of this participant's own account in the confirmed block.
    pub fn confirmed_balance(&self) -> u64 {
        self.chain.confirmed().balance_of(self.address)
    }

    /// Confirmed balance of an arbitrary account, for display.
    pub fn confirmed_balance_of(&self, addr: Address) -> u64 {
        self.chain.confirmed().balance_of(addr)
    }

    /// Confirmed balance minus everything already promised in pending
    /// outgoing transactions.
    pub fn available_gold(&self) -> u64 {
        let promised: u64 = self
            .pending_outgoing
            .iter()
            .map(|(_, tx)| tx.total_output())
            .sum();
        self.confirmed_balance().saturating_sub(promised)
    }

    /// Number of posted transactions not yet confirmed.
    pub fn pending_count(&self) -> usize {
        self.pending_outgoing.len()
    }

    /// Builds, signs, records, and broadcasts a transfer.
    ///
    /// Fails without side effects when the total (outputs plus fee) exceeds
    /// [`Client::available_gold`]. On success the outgoing nonce advances
    /// and the transaction stays pending until it appears in the confirmed
    /// chain.
    pub async fn post_transaction(
        &mut self,
        outputs: Vec<Output>,
        fee: u64,
    ) -> Result<Transaction, WalletError> {
        let needed = outputs.iter().fold(fee, |acc, o| acc.saturating_add(o.amount));
        let available = self.available_gold();
        if needed > available {
            return Err(WalletError::InsufficientFunds { needed, available });
        }

        let pub_key = self.key.public_key();
        let mut tx =
            self.config
                .make_transaction(self.address, self.nonce, pub_key, outputs, fee, vec![]);
        tx.sign(&self.key);

        self.log.info(&format!(
            "posting transaction {} (nonce {}, total {})",
            tx.id(),
            tx.nonce,
            tx.total_output()
        ));

        self.pending_outgoing.push((tx.id(), tx.clone()));
        self.nonce += 1;

        if let Err(e) = self
            .net
            .broadcast(self.address, &Message::post_transaction(&tx))
            .await
        {
            self.log.warn(&format!("broadcast failed: {e}"));
        }

        Ok(tx)
    }

    /// Rebroadcasts every pending outgoing transaction.
    ///
    /// Idempotent: receivers treat duplicates as no-ops. Used after
    /// reconnecting or when messages may have been lost.
    pub async fn resend_pending_transactions(&self) {
        for (_, tx) in &self.pending_outgoing {
            if let Err(e) = self
                .net
                .broadcast(self.address, &Message::post_transaction(tx))
                .await
            {
                self.log.warn(&format!("rebroadcast failed: {e}"));
            }
        }
    }

    /// The block-acceptance pipeline.
    ///
    /// For the delivered block and every buffered descendant it unlocks:
    /// ignore duplicates, discard bad proofs, buffer orphans (requesting the
    /// missing parent once per unique parent id), replay transactions on the
    /// parent state, store the block, and advance the head when the new
    /// chain is strictly longer. Returns the longest newly accepted block,
    /// if any.
    pub async fn receive_block(&mut self, block: Block) -> Option<Arc<Block>> {
        let mut best: Option<Arc<Block>> = None;
        let mut worklist = VecDeque::new();
        worklist.push_back(block);

        while let Some(mut b) = worklist.pop_front() {
            let id = b.id();

            if self.chain.contains(&id) {
                continue;
            }

            if !b.is_genesis() && !b.has_valid_proof() {
                self.log
                    .warn(&format!("discarding: {}", BlockError::InvalidProof(id)));
                continue;
            }

            let parent = match b.prev_block_hash {
                None => None,
                Some(prev) => match self.chain.get(&prev) {
                    Some(p) => Some(p.clone()),
                    None => {
                        self.log.info(&format!(
                            "buffering: {}",
                            BlockError::MissingParent {
                                block: id,
                                missing: prev
                            }
                        ));
                        if self.chain.buffer_orphan(b) {
                            let request = MissingBlockRequest {
                                from: self.address,
                                missing: prev,
                            };
                            if let Err(e) = self
                                .net
                                .broadcast(self.address, &Message::missing_block(&request))
                                .await
                            {
                                self.log.warn(&format!("missing-block request failed: {e}"));
                            }
                        }
                        continue;
                    }
                },
            };

            if let Some(parent) = parent {
                if let Err(reason) = b.rerun(&parent) {
                    self.log.warn(&format!(
                        "discarding: {}",
                        BlockError::ReplayFailure { block: id, reason }
                    ));
                    continue;
                }
            }

            let accepted = self.chain.insert(b);
            if self.chain.try_advance_head(&accepted) {
                self.log.info(&format!(
                    "new head {} at length {}",
                    accepted.id(),
                    accepted.chain_length
                ));
                self.prune_confirmed_pending();
            }

            let is_longest_so_far = best
                .as_ref()
                .is_none_or(|b0| accepted.chain_length > b0.chain_length);
            if is_longest_so_far {
                best = Some(accepted.clone());
            }

            for orphan in self.chain.take_orphans(&id) {
                worklist.push_back(orphan);
            }
        }

        best
    }

    /// Drops pending transactions that the confirmed chain now includes.
    fn prune_confirmed_pending(&mut self) {
        let chain = &self.chain;
        self.pending_outgoing
            .retain(|(id, _)| !chain.confirmed_contains_tx(id));
    }

    /// Answers a `MissingBlock` request if the block is known.
    pub async fn provide_missing_block(&self, request: MissingBlockRequest) {
        if let Some(block) = self.chain.get(&request.missing) {
            self.log.info(&format!(
                "supplying block {} to {}",
                request.missing, request.from
            ));
            if let Err(e) = self
                .net
                .send_to(request.from, &Message::proof_found(block))
                .await
            {
                self.log.warn(&format!("supply failed: {e}"));
            }
        }
    }

    /// Decodes and dispatches one incoming frame.
    ///
    /// A pure client reacts to block announcements and missing-block
    /// requests; it builds no blocks, so `PostTransaction` is ignored.
    pub async fn handle_message(&mut self, bytes: &[u8]) {
        let msg = match Message::from_bytes(bytes) {
            Ok(m) => m,
            Err(e) => {
                self.log.warn(&format!("dropping malformed frame: {e}"));
                return;
            }
        };

        match msg.kind {
            MessageType::ProofFound => match self.config.decode_block(&msg.payload) {
                Ok(block) => {
                    self.receive_block(block).await;
                }
                Err(e) => self.log.warn(&format!("dropping malformed block: {e}")),
            },
            MessageType::MissingBlock => match MissingBlockRequest::from_bytes(&msg.payload) {
                Ok(request) => self.provide_missing_block(request).await,
                Err(e) => self.log.warn(&format!("dropping malformed request: {e}")),
            },
            MessageType::PostTransaction | MessageType::StartMining => {}
        }
    }

    /// Processes every frame currently queued in the mailbox.
    ///
    /// Returns the number of frames handled. Never blocks.
    pub async fn drain_mailbox(&mut self, rx: &mut Receiver<Bytes>) -> usize {
        let mut handled = 0;
        while let Ok(bytes) = rx.try_recv() {
            self.handle_message(&bytes).await;
            handled += 1;
        }
        handled
    }

    /// Serves the mailbox until the chain reaches `target_chain_length`.
    pub async fn listen_until(&mut self, rx: &mut Receiver<Bytes>, target_chain_length: u64) {
        while self.height() < target_chain_length {
            match rx.recv().await {
                Some(bytes) => self.handle_message(&bytes).await,
                None => break,
            }
        }
    }
}
