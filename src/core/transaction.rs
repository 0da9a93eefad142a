//! Signed transfer records.
//!
//! A transaction moves gold from one account to any number of outputs and
//! offers a fee to the miner that includes it. The per-sender nonce imposes
//! a total order on a payer's transfers and makes replays detectable.

use crate::core::block::Block;
use crate::crypto::key_pair::{PrivateKey, PublicKey, SerializableSignature};
use crate::types::address::Address;
use crate::types::bytes::Bytes;
use crate::types::encoding::{Encode, EncodeSink};
use crate::types::hash::{Hash, IdCache};
use goldnet_derive::{BinaryCodec, Error};

/// A single payment leg: `amount` gold credited to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct Output {
    /// Gold credited to the receiving account.
    pub amount: u64,
    /// Receiving account.
    pub to: Address,
}

/// Reasons a transaction is refused by a block under construction or during
/// replay.
///
/// `OutOfOrderNonce` is the one recoverable case: the transaction is not
/// included now but stays eligible once the gap closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxRejection {
    /// The block already contains this transaction id.
    #[error("duplicate transaction {0}")]
    Duplicate(Hash),

    /// The transaction was never signed.
    #[error("transaction is missing a signature")]
    MissingSignature,

    /// The signature does not verify, or the key does not match the payer.
    #[error("invalid signature on transaction {0}")]
    InvalidSignature(Hash),

    /// The payer's balance cannot cover outputs plus fee.
    #[error("insufficient funds: needs {needed}, balance is {balance}")]
    InsufficientFunds { needed: u64, balance: u64 },

    /// The nonce was already consumed by an earlier transaction.
    #[error("replayed nonce {got}, next expected nonce is {expected}")]
    ReplayedNonce { got: u64, expected: u64 },

    /// The nonce skips ahead; the transaction is deferred, not dropped.
    #[error("out-of-order nonce {got}, next expected nonce is {expected}")]
    OutOfOrderNonce { got: u64, expected: u64 },
}

/// A signed transfer, immutable once signed.
///
/// The id commits to every field except the signature; the signature covers
/// the id. The `data` attachment is an opaque key-value map, canonicalized
/// by key order so equal attachments always hash identically.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Transaction {
    /// Payer account.
    pub from: Address,
    /// Per-sender monotone counter establishing order.
    pub nonce: u64,
    /// Payer's public key; must hash to `from`.
    pub pub_key: PublicKey,
    /// Ordered payment legs.
    pub outputs: Vec<Output>,
    /// Gold claimed by the miner of the including block.
    pub fee: u64,
    /// Opaque attachment, key-sorted. Participates in the id.
    pub data: Vec<(String, Bytes)>,
    /// Signature over the id, absent until `sign` is called.
    pub sig: Option<SerializableSignature>,

    /// Lazily computed id, do not use directly.
    cached_id: IdCache,
}

impl Transaction {
    /// Creates a new unsigned transaction.
    ///
    /// The attachment entries are sorted by key so that logically equal
    /// attachments produce identical ids regardless of insertion order.
    pub fn new(
        from: Address,
        nonce: u64,
        pub_key: PublicKey,
        outputs: Vec<Output>,
        fee: u64,
        mut data: Vec<(String, Bytes)>,
    ) -> Self {
        data.sort_by(|a, b| a.0.cmp(&b.0));

        Transaction {
            from,
            nonce,
            pub_key,
            outputs,
            fee,
            data,
            sig: None,
            cached_id: IdCache::new(),
        }
    }

    /// Encodes the fields covered by the id and the signature.
    fn signed_fields_encode<S: EncodeSink>(&self, out: &mut S) {
        self.from.encode(out);
        self.nonce.encode(out);
        self.pub_key.encode(out);
        self.outputs.encode(out);
        self.fee.encode(out);
        self.data.encode(out);
    }

    /// Returns the unique transaction identifier.
    ///
    /// SHA-256 over a domain-separated encoding of everything but the
    /// signature. Computed lazily and cached; the transaction must not be
    /// mutated afterwards.
    pub fn id(&self) -> Hash {
        self.cached_id.get_or_compute(|| {
            let mut h = Hash::sha256();
            h.update(b"TX");
            self.signed_fields_encode(&mut h);
            h.finalize()
        })
    }

    /// Signs the transaction, binding the payer's key to the id.
    pub fn sign(&mut self, key: &PrivateKey) {
        self.sig = Some(key.sign(self.id().as_slice()));
    }

    /// Checks the signature.
    ///
    /// True iff a signature is present, the embedded public key hashes to
    /// the payer address, and the signature verifies over the id.
    pub fn valid_signature(&self) -> bool {
        match self.sig {
            Some(sig) => {
                self.pub_key.address == self.from
                    && self.pub_key.verify(self.id().as_slice(), sig)
            }
            None => false,
        }
    }

    /// True if the payer's balance in `block` covers outputs plus fee.
    pub fn sufficient_funds(&self, block: &Block) -> bool {
        self.total_output() <= block.balance_of(self.from)
    }

    /// Total gold leaving the payer: the fee plus every output amount.
    pub fn total_output(&self) -> u64 {
        self.outputs
            .iter()
            .fold(self.fee, |acc, o| acc.saturating_add(o.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::types::encoding::Decode;
    use crate::utils::test_utils::fixtures::{signed_transfer, transfer};

    #[test]
    fn total_output_is_fee_plus_outputs() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let tx = transfer(&key, 0, &[(40, to), (10, to)], 1);

        assert_eq!(tx.total_output(), 51);
    }

    #[test]
    fn total_output_with_no_outputs_is_fee() {
        let key = PrivateKey::new();
        let tx = transfer(&key, 0, &[], 3);
        assert_eq!(tx.total_output(), 3);
    }

    #[test]
    fn unsigned_transaction_is_invalid() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let tx = transfer(&key, 0, &[(40, to)], 1);

        assert!(tx.sig.is_none());
        assert!(!tx.valid_signature());
    }

    #[test]
    fn signed_transaction_is_valid() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let tx = signed_transfer(&key, 0, &[(40, to)], 1);

        assert!(tx.valid_signature());
    }

    #[test]
    fn tampered_fee_flips_validity() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let tx = signed_transfer(&key, 0, &[(40, to)], 1);

        // Rebuild with a different fee: the old signature no longer covers the id
        let mut tampered = Transaction::new(
            tx.from,
            tx.nonce,
            tx.pub_key,
            tx.outputs.clone(),
            tx.fee + 1,
            tx.data.clone(),
        );
        tampered.sig = tx.sig;

        assert!(!tampered.valid_signature());
    }

    #[test]
    fn tampered_outputs_flip_validity() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let eve = PrivateKey::new().public_key().address;
        let tx = signed_transfer(&key, 0, &[(40, to)], 1);

        let mut tampered = Transaction::new(
            tx.from,
            tx.nonce,
            tx.pub_key,
            vec![Output { amount: 40, to: eve }],
            tx.fee,
            tx.data.clone(),
        );
        tampered.sig = tx.sig;

        assert!(!tampered.valid_signature());
    }

    #[test]
    fn mismatched_payer_address_is_invalid() {
        let key = PrivateKey::new();
        let other = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;

        // Signed by `key` but claiming `other`'s address as payer
        let mut tx = Transaction::new(
            other.public_key().address,
            0,
            key.public_key(),
            vec![Output { amount: 40, to }],
            1,
            vec![],
        );
        tx.sign(&key);

        assert!(!tx.valid_signature());
    }

    #[test]
    fn id_is_stable_across_calls() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let tx = transfer(&key, 2, &[(7, to)], 1);

        assert_eq!(tx.id(), tx.id());
    }

    #[test]
    fn id_ignores_signature() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let mut tx = transfer(&key, 0, &[(40, to)], 1);

        let before = tx.id();
        tx.sign(&key);
        assert_eq!(tx.id(), before);
    }

    #[test]
    fn attachment_order_does_not_change_id() {
        let key = PrivateKey::new();
        let pub_key = key.public_key();
        let from = pub_key.address;

        let ab = Transaction::new(
            from,
            0,
            pub_key,
            vec![],
            1,
            vec![
                ("alpha".into(), Bytes::from("1")),
                ("beta".into(), Bytes::from("2")),
            ],
        );
        let ba = Transaction::new(
            from,
            0,
            pub_key,
            vec![],
            1,
            vec![
                ("beta".into(), Bytes::from("2")),
                ("alpha".into(), Bytes::from("1")),
            ],
        );

        assert_eq!(ab.id(), ba.id());
    }

    #[test]
    fn attachment_value_changes_id() {
        let key = PrivateKey::new();
        let pub_key = key.public_key();
        let from = pub_key.address;

        let one = Transaction::new(
            from,
            0,
            pub_key,
            vec![],
            1,
            vec![("memo".into(), Bytes::from("rent"))],
        );
        let two = Transaction::new(
            from,
            0,
            pub_key,
            vec![],
            1,
            vec![("memo".into(), Bytes::from("groceries"))],
        );

        assert_ne!(one.id(), two.id());
    }

    #[test]
    fn encode_decode_preserves_id_and_validity() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;
        let tx = signed_transfer(&key, 3, &[(25, to)], 2);

        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).expect("decode failed");

        assert_eq!(decoded, tx);
        assert_eq!(decoded.id(), tx.id());
        assert!(decoded.valid_signature());
    }

    #[test]
    fn different_nonces_different_ids() {
        let key = PrivateKey::new();
        let to = PrivateKey::new().public_key().address;

        let first = transfer(&key, 0, &[(40, to)], 1);
        let second = transfer(&key, 1, &[(40, to)], 1);

        assert_ne!(first.id(), second.id());
    }
}
