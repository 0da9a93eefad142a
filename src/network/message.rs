//! Protocol messages gossiped between participants.
//!
//! Every message on the wire is a [`Message`]: a type discriminant followed
//! by a serialized payload. The payload encoding is the canonical form of
//! the carried object, so receivers always decode their own private copy.

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use goldnet_derive::BinaryCodec;

/// Discriminant for message payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub enum MessageType {
    /// Payload is a serialized signed transaction.
    PostTransaction,
    /// Payload is a block in canonical wire form.
    ProofFound,
    /// Payload is a [`MissingBlockRequest`].
    MissingBlock,
    /// Empty payload. Internal to a miner; defined here for uniformity.
    StartMining,
}

/// Framed message with type header and serialized payload.
#[derive(Debug, Clone, BinaryCodec)]
pub struct Message {
    /// Type discriminant for payload deserialization.
    pub kind: MessageType,
    /// Serialized payload data.
    pub payload: Bytes,
}

impl Message {
    /// Creates a message with the given type and raw payload.
    pub fn new(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Wraps a transaction for broadcast.
    pub fn post_transaction(tx: &Transaction) -> Self {
        Self::new(MessageType::PostTransaction, tx.to_bytes())
    }

    /// Wraps a sealed (or genesis) block for announcement.
    pub fn proof_found(block: &Block) -> Self {
        Self::new(MessageType::ProofFound, block.to_wire())
    }

    /// Wraps a request for a block the sender is missing.
    pub fn missing_block(request: &MissingBlockRequest) -> Self {
        Self::new(MessageType::MissingBlock, request.to_bytes())
    }

    /// The empty self-scheduling message a miner sends itself.
    pub fn start_mining() -> Self {
        Self::new(MessageType::StartMining, Bytes::default())
    }
}

/// Payload of a [`MessageType::MissingBlock`] message.
///
/// Asks any peer holding block `missing` to send it back to `from` via a
/// targeted `ProofFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct MissingBlockRequest {
    /// Address of the participant that needs the block.
    pub from: Address,
    /// Id of the block whose parent chain is incomplete.
    pub missing: Hash,
}
