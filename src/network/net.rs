//! Abstract broadcast network joining all participants.
//!
//! The network is the only shared structure in the system: participants own
//! their state and talk to each other exclusively through this trait.
//! Messages are serialized at send time, so no receiver can observe another
//! participant's live objects.

use crate::network::message::Message;
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::wrapper_types::BoxFuture;
use goldnet_derive::Error;
use tokio::sync::mpsc::Receiver;

/// Errors that can occur during network operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// No participant with the given address is registered.
    #[error("unknown peer: {0}")]
    UnknownPeer(Address),

    /// The peer is registered but its mailbox is gone.
    #[error("failed to deliver to {0}")]
    SendFailed(Address),
}

/// Broadcast-capable network connecting participants by address.
///
/// Implementations must be safe under concurrent access; the returned
/// futures own everything they need so callers can await them anywhere.
pub trait Network: Send + Sync {
    /// Announces a participant and returns its mailbox.
    ///
    /// Incoming messages arrive as serialized [`Message`] frames.
    fn register(&self, address: Address) -> Receiver<Bytes>;

    /// True if a participant with this address has registered.
    fn recognises(&self, address: Address) -> bool;

    /// Delivers a message to every registered participant except `from`.
    fn broadcast(&self, from: Address, message: &Message)
    -> BoxFuture<'static, Result<(), NetError>>;

    /// Delivers a message to a single participant.
    fn send_to(&self, to: Address, message: &Message) -> BoxFuture<'static, Result<(), NetError>>;
}
