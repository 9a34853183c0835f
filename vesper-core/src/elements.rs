//! Dispatcher element types.
//!
//! A `ConsumerInput` is the unit of work flowing through a dispatcher: a
//! batch of block elements or transaction elements tagged with its source.
//! The hash stage fills in element hashes; they are immutable afterwards.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::{Block, Transaction};
use crate::crypto::{Address, Hash, PublicKey};

/// Identifier assigned to an input when it enters a dispatcher.
///
/// Ids are strictly increasing per dispatcher and never reused. Id 0 is
/// reserved to mean "nothing entered the pipeline" (empty ranges).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ElementId(pub u64);

impl ElementId {
    /// The reserved "no element" id.
    pub const NONE: Self = Self(0);

    /// Check whether this id refers to a real element.
    pub fn is_valid(&self) -> bool {
        0 != self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// Origin unknown.
    Unknown,
    /// Produced by this node.
    Local,
    /// Pulled from a remote peer during synchronization.
    RemotePull,
    /// Pushed by a remote peer.
    RemotePush,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Unknown => write!(f, "unknown"),
            InputSource::Local => write!(f, "local"),
            InputSource::RemotePull => write!(f, "remote (pull)"),
            InputSource::RemotePush => write!(f, "remote (push)"),
        }
    }
}

/// A transaction plus precomputed metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionElement {
    /// The transaction.
    pub transaction: Transaction,
    /// Content hash (filled by the hash calculator).
    pub entity_hash: Hash,
    /// Hash contributed to the block merkle tree.
    pub merkle_component_hash: Hash,
    /// Addresses touched by the transaction (filled by address extraction).
    pub addresses: Option<BTreeSet<Address>>,
    /// Set when an earlier stage decided later stages should ignore this
    /// element (known hash, stateless failure).
    pub skip: bool,
}

impl TransactionElement {
    /// Wrap a raw transaction; hashes start zeroed.
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            entity_hash: Hash::ZERO,
            merkle_component_hash: Hash::ZERO,
            addresses: None,
            skip: false,
        }
    }
}

/// A block plus precomputed metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockElement {
    /// The block.
    pub block: Block,
    /// Content hash (filled by the hash calculator).
    pub entity_hash: Hash,
    /// Generation hash (chained from the parent generation hash).
    pub generation_hash: Hash,
    /// Per-transaction elements.
    pub transactions: Vec<TransactionElement>,
}

impl BlockElement {
    /// Wrap a raw block; hashes start zeroed and transaction elements are
    /// derived from the block's transactions.
    pub fn new(block: Block) -> Self {
        let transactions = block
            .transactions
            .iter()
            .cloned()
            .map(TransactionElement::new)
            .collect();
        Self {
            block,
            entity_hash: Hash::ZERO,
            generation_hash: Hash::ZERO,
            transactions,
        }
    }

    /// Iterate over the entity hashes of the contained transactions.
    pub fn transaction_hashes(&self) -> impl Iterator<Item = Hash> + '_ {
        self.transactions.iter().map(|element| element.entity_hash)
    }
}

/// A detached (transaction, hash, addresses) triple used by the
/// unconfirmed-transaction cache and the status pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub transaction: Transaction,
    pub entity_hash: Hash,
    pub merkle_component_hash: Hash,
    pub addresses: Option<BTreeSet<Address>>,
}

impl TransactionInfo {
    /// Extract an info from a pipeline element.
    pub fn from_element(element: &TransactionElement) -> Self {
        Self {
            transaction: element.transaction.clone(),
            entity_hash: element.entity_hash,
            merkle_component_hash: element.merkle_component_hash,
            addresses: element.addresses.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum InputPayload {
    Blocks(Vec<BlockElement>),
    Transactions(Vec<TransactionElement>),
    /// Consumed by a later stage; remaining stages skip the input.
    Detached,
}

/// A batch of entities flowing through a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInput {
    payload: InputPayload,
    source: InputSource,
    source_public_key: Option<PublicKey>,
}

impl ConsumerInput {
    /// Create an input from a range of blocks.
    pub fn from_blocks(blocks: Vec<Block>, source: InputSource) -> Self {
        Self {
            payload: InputPayload::Blocks(blocks.into_iter().map(BlockElement::new).collect()),
            source,
            source_public_key: None,
        }
    }

    /// Create an input from a range of transactions.
    pub fn from_transactions(transactions: Vec<Transaction>, source: InputSource) -> Self {
        Self {
            payload: InputPayload::Transactions(
                transactions.into_iter().map(TransactionElement::new).collect(),
            ),
            source,
            source_public_key: None,
        }
    }

    /// Attach the public key of the range's origin.
    pub fn with_source_public_key(mut self, key: PublicKey) -> Self {
        self.source_public_key = Some(key);
        self
    }

    /// Where this input came from.
    pub fn source(&self) -> InputSource {
        self.source
    }

    /// The public key of the range's origin, when known.
    pub fn source_public_key(&self) -> Option<&PublicKey> {
        self.source_public_key.as_ref()
    }

    /// Check if the input carries no elements (empty or detached).
    pub fn is_empty(&self) -> bool {
        match &self.payload {
            InputPayload::Blocks(elements) => elements.is_empty(),
            InputPayload::Transactions(elements) => elements.is_empty(),
            InputPayload::Detached => true,
        }
    }

    /// Number of contained elements.
    pub fn len(&self) -> usize {
        match &self.payload {
            InputPayload::Blocks(elements) => elements.len(),
            InputPayload::Transactions(elements) => elements.len(),
            InputPayload::Detached => 0,
        }
    }

    /// Check if the input carries block elements.
    pub fn has_blocks(&self) -> bool {
        matches!(&self.payload, InputPayload::Blocks(_))
    }

    /// Check if the input carries transaction elements.
    pub fn has_transactions(&self) -> bool {
        matches!(&self.payload, InputPayload::Transactions(_))
    }

    /// Block elements (empty for transaction inputs).
    pub fn blocks(&self) -> &[BlockElement] {
        match &self.payload {
            InputPayload::Blocks(elements) => elements,
            _ => &[],
        }
    }

    /// Mutable block elements (empty for transaction inputs).
    pub fn blocks_mut(&mut self) -> &mut [BlockElement] {
        match &mut self.payload {
            InputPayload::Blocks(elements) => elements,
            _ => &mut [],
        }
    }

    /// Transaction elements (empty for block inputs).
    pub fn transactions(&self) -> &[TransactionElement] {
        match &self.payload {
            InputPayload::Transactions(elements) => elements,
            _ => &[],
        }
    }

    /// Mutable transaction elements (empty for block inputs).
    pub fn transactions_mut(&mut self) -> &mut [TransactionElement] {
        match &mut self.payload {
            InputPayload::Transactions(elements) => elements,
            _ => &mut [],
        }
    }

    /// Take ownership of the block elements, leaving the input detached.
    pub fn detach_block_elements(&mut self) -> Vec<BlockElement> {
        match std::mem::replace(&mut self.payload, InputPayload::Detached) {
            InputPayload::Blocks(elements) => elements,
            other => {
                self.payload = other;
                Vec::new()
            }
        }
    }

    /// Extract infos for all non-skipped transaction elements, leaving the
    /// input detached.
    pub fn detach_transaction_infos(&mut self) -> Vec<TransactionInfo> {
        match std::mem::replace(&mut self.payload, InputPayload::Detached) {
            InputPayload::Transactions(elements) => elements
                .iter()
                .filter(|element| !element.skip)
                .map(TransactionInfo::from_element)
                .collect(),
            other => {
                self.payload = other;
                Vec::new()
            }
        }
    }

    /// Drop any remaining elements (inspector cleanup).
    pub fn detach(&mut self) {
        self.payload = InputPayload::Detached;
    }
}

impl fmt::Display for ConsumerInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            InputPayload::Blocks(elements) => match (elements.first(), elements.last()) {
                (Some(first), Some(last)) => write!(
                    f,
                    "{} blocks [{}..{}] from {}",
                    elements.len(),
                    first.block.header.height,
                    last.block.header.height,
                    self.source
                ),
                _ => write!(f, "0 blocks from {}", self.source),
            },
            InputPayload::Transactions(elements) => {
                write!(f, "{} transactions from {}", elements.len(), self.source)
            }
            InputPayload::Detached => write!(f, "detached input from {}", self.source),
        }
    }
}
