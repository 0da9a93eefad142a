//! Gossip networking: the wire protocol and its in-process implementation.
//!
//! - `message`: typed envelope carried between participants
//! - `net`: the abstract broadcast network participants talk through
//! - `simulator`: in-memory network with optional loss and delay

pub mod message;
pub mod net;
pub mod simulator;
