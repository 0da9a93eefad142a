//! In-memory network implementation for tests and single-process demos.
//!
//! Routes serialized messages directly between participant mailboxes without
//! network I/O. Optionally drops each message with a fixed probability and
//! delays each delivery by a uniform random amount, reproducibly from a
//! seed, so the gossip protocol can be exercised under unreliable
//! conditions.

use crate::network::message::Message;
use crate::network::net::{NetError, Network};
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::wrapper_types::BoxFuture;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// Mailbox depth per participant.
const MAILBOX_CAPACITY: usize = 1024;

/// In-memory broadcast network with optional loss and delay.
///
/// Thread-safe: the peer registry is shared, per-message randomness sits
/// behind a mutex, and delayed deliveries run on spawned tasks.
pub struct SimulatedNet {
    peers: DashMap<Address, Sender<Bytes>>,
    failure_rate: f64,
    delay_max: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedNet {
    /// Creates a reliable network: no loss, no delay.
    pub fn new() -> Arc<SimulatedNet> {
        Self::with_faults(0.0, Duration::ZERO, 0)
    }

    /// Creates a network that drops each message with probability
    /// `failure_rate` and delays each delivery uniformly in `[0, delay_max)`.
    ///
    /// The same seed reproduces the same loss and delay pattern.
    pub fn with_faults(failure_rate: f64, delay_max: Duration, seed: u64) -> Arc<SimulatedNet> {
        Arc::new(SimulatedNet {
            peers: DashMap::new(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            delay_max,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// Number of registered participants.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Decides the fate of one delivery: `None` to drop it, otherwise how
    /// long to hold it.
    fn plan_delivery(&self) -> Option<Duration> {
        let mut rng = self.rng.lock().unwrap();

        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return None;
        }

        let max_ms = self.delay_max.as_millis() as u64;
        if max_ms == 0 {
            Some(Duration::ZERO)
        } else {
            Some(Duration::from_millis(rng.gen_range(0..max_ms)))
        }
    }
}

/// Hands `bytes` to one mailbox, waiting out the planned delay first.
///
/// A closed mailbox means the participant has left; the message is dropped
/// the same way a lossy link would drop it.
async fn deliver(tx: Sender<Bytes>, bytes: Bytes, delay: Duration) {
    if delay.is_zero() {
        let _ = tx.send(bytes).await;
    } else {
        tokio::time::sleep(delay).await;
        let _ = tx.send(bytes).await;
    }
}

impl Network for SimulatedNet {
    fn register(&self, address: Address) -> Receiver<Bytes> {
        let (tx, rx) = channel(MAILBOX_CAPACITY);
        self.peers.insert(address, tx);
        rx
    }

    fn recognises(&self, address: Address) -> bool {
        self.peers.contains_key(&address)
    }

    fn broadcast(
        &self,
        from: Address,
        message: &Message,
    ) -> BoxFuture<'static, Result<(), NetError>> {
        let bytes = message.to_bytes();

        // Plan every delivery synchronously so the seeded randomness is
        // consumed in registration order, not task-scheduling order.
        let deliveries: Vec<(Sender<Bytes>, Duration)> = self
            .peers
            .iter()
            .filter(|entry| *entry.key() != from)
            .filter_map(|entry| self.plan_delivery().map(|delay| (entry.value().clone(), delay)))
            .collect();

        Box::pin(async move {
            for (tx, delay) in deliveries {
                if delay.is_zero() {
                    deliver(tx, bytes.clone(), delay).await;
                } else {
                    tokio::spawn(deliver(tx, bytes.clone(), delay));
                }
            }
            Ok(())
        })
    }

    fn send_to(&self, to: Address, message: &Message) -> BoxFuture<'static, Result<(), NetError>> {
        let bytes = message.to_bytes();
        let tx = self.peers.get(&to).map(|entry| entry.value().clone());
        let plan = self.plan_delivery();

        Box::pin(async move {
            let Some(tx) = tx else {
                return Err(NetError::UnknownPeer(to));
            };

            match plan {
                None => Ok(()), // lost in transit
                Some(delay) if delay.is_zero() => {
                    tx.send(bytes).await.map_err(|_| NetError::SendFailed(to))
                }
                Some(delay) => {
                    tokio::spawn(deliver(tx, bytes, delay));
                    Ok(())
                }
            }
        })
    }
}
