//! Block and transaction types for Vesper.
//!
//! Blocks batch transactions together and link to form the chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash, hash_pair, Hash, PublicKey, SecretKey, Sig};
use crate::error::{Error, Result};
use crate::score::ChainScore;

/// Block height (strictly positive for real blocks; 0 is the nemesis anchor).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Height(pub u64);

impl Height {
    /// Get the next height.
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }

    /// Get the previous height, if any.
    pub fn prev(self) -> Option<Height> {
        self.0.checked_sub(1).map(Height)
    }
}

impl std::fmt::Display for Height {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block difficulty, the per-block score component.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Difficulty(pub u64);

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transfer-style transaction.
///
/// Plugin-specific semantics live behind the execution seams; the core
/// carries only the fields every pipeline stage needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Signer's public key.
    pub signer: PublicKey,
    /// Recipient address.
    pub recipient: crate::crypto::Address,
    /// Deadline after which the transaction is no longer valid.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub deadline: DateTime<Utc>,
    /// Maximum fee the signer is willing to pay.
    pub max_fee: u64,
    /// Opaque payload interpreted by plugins.
    pub payload: Vec<u8>,
    /// Signer's signature over the transaction (excluding this field).
    pub signature: Sig,
}

impl Transaction {
    /// Get the bytes to be signed (everything except the signature).
    pub fn signing_bytes(&self) -> Vec<u8> {
        let signable = SignableTransaction {
            signer: &self.signer,
            recipient: &self.recipient,
            deadline: self.deadline,
            max_fee: self.max_fee,
            payload: &self.payload,
        };
        bincode::serialize(&signable).expect("serialization should not fail")
    }

    /// Compute the content hash of this transaction.
    pub fn entity_hash(&self) -> Hash {
        let mut data = self.signing_bytes();
        data.extend_from_slice(&self.signature.as_bytes());
        hash(&data)
    }

    /// Approximate serialized size in bytes.
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(0)
    }

    /// Verify the signature.
    pub fn verify_signature(&self) -> Result<()> {
        self.signer.verify(&self.signing_bytes(), &self.signature)
    }
}

/// Helper for signing (excludes signature field).
#[derive(Serialize)]
struct SignableTransaction<'a> {
    signer: &'a PublicKey,
    recipient: &'a crate::crypto::Address,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    deadline: DateTime<Utc>,
    max_fee: u64,
    payload: &'a [u8],
}

/// Block header containing metadata and the seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (contiguous in any chain).
    pub height: Height,

    /// Harvester's timestamp, as Unix millis.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Public key of the block signer.
    pub signer: PublicKey,

    /// Hash of the previous block header.
    pub previous_block_hash: Hash,

    /// Block difficulty (the score component).
    pub difficulty: Difficulty,

    /// Fee multiplier applied to transaction sizes.
    pub fee_multiplier: u32,

    /// Merkle root of transaction hashes in this block.
    pub transactions_root: Hash,

    /// Signer's signature over the header (excluding this field).
    pub signature: Sig,
}

impl BlockHeader {
    /// Get the bytes to be signed (everything except the signature).
    pub fn signing_bytes(&self) -> Vec<u8> {
        let signable = SignableHeader {
            height: self.height,
            timestamp: self.timestamp,
            signer: &self.signer,
            previous_block_hash: &self.previous_block_hash,
            difficulty: self.difficulty,
            fee_multiplier: self.fee_multiplier,
            transactions_root: &self.transactions_root,
        };
        bincode::serialize(&signable).expect("serialization should not fail")
    }

    /// Compute the content hash of this header.
    pub fn entity_hash(&self) -> Hash {
        hash(&self.signing_bytes())
    }

    /// Verify the signature.
    pub fn verify_signature(&self) -> Result<()> {
        self.signer.verify(&self.signing_bytes(), &self.signature)
    }

    /// Validate this header against its parent.
    pub fn validate(&self, parent: &BlockHeader) -> Result<()> {
        if self.height != parent.height.next() {
            return Err(Error::invalid_block(format!(
                "height {} should be {}",
                self.height,
                parent.height.next()
            )));
        }

        if self.previous_block_hash != parent.entity_hash() {
            return Err(Error::invalid_block("previous block hash mismatch"));
        }

        if self.timestamp < parent.timestamp {
            return Err(Error::invalid_block("timestamp before parent"));
        }

        Ok(())
    }
}

/// Helper for signing (excludes signature field).
#[derive(Serialize)]
struct SignableHeader<'a> {
    height: Height,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    signer: &'a PublicKey,
    previous_block_hash: &'a Hash,
    difficulty: Difficulty,
    fee_multiplier: u32,
    transactions_root: &'a Hash,
}

/// A complete block with header and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the block's content hash.
    pub fn entity_hash(&self) -> Hash {
        self.header.entity_hash()
    }

    /// Get the block's score component.
    pub fn score(&self) -> ChainScore {
        ChainScore::from(self.header.difficulty.0)
    }

    /// Validate internal consistency: transactions root and signatures.
    pub fn validate(&self) -> Result<()> {
        self.header.verify_signature()?;

        let computed_root = compute_transactions_root(&self.transactions);
        if computed_root != self.header.transactions_root {
            return Err(Error::invalid_block("transactions root mismatch"));
        }

        for transaction in &self.transactions {
            transaction.verify_signature()?;
        }

        Ok(())
    }
}

/// Compute the merkle root of a list of transactions.
pub fn compute_transactions_root(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return Hash::ZERO;
    }

    // Get leaf hashes
    let mut hashes: Vec<Hash> = transactions.iter().map(|t| t.entity_hash()).collect();

    // Pad to power of 2
    while hashes.len() & (hashes.len() - 1) != 0 {
        hashes.push(*hashes.last().unwrap());
    }

    // Build tree bottom-up
    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity(hashes.len() / 2);
        for pair in hashes.chunks(2) {
            next_level.push(hash_pair(pair[0], pair[1]));
        }
        hashes = next_level;
    }

    hashes[0]
}

/// Builder for creating signed blocks.
pub struct BlockBuilder {
    parent: Option<BlockHeader>,
    transactions: Vec<Transaction>,
    difficulty: Difficulty,
    fee_multiplier: u32,
    timestamp: Option<DateTime<Utc>>,
}

impl BlockBuilder {
    /// Create a new block builder.
    pub fn new() -> Self {
        Self {
            parent: None,
            transactions: Vec::new(),
            difficulty: Difficulty(1),
            fee_multiplier: 0,
            timestamp: None,
        }
    }

    /// Set the parent block header.
    pub fn parent(mut self, parent: BlockHeader) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add transactions.
    pub fn transactions(mut self, transactions: Vec<Transaction>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Set the difficulty.
    pub fn difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Set the fee multiplier.
    pub fn fee_multiplier(mut self, fee_multiplier: u32) -> Self {
        self.fee_multiplier = fee_multiplier;
        self
    }

    /// Pin the timestamp (defaults to now).
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Build and sign the block.
    pub fn sign(self, key: &SecretKey) -> Block {
        let (height, previous_block_hash) = match &self.parent {
            Some(p) => (p.height.next(), p.entity_hash()),
            None => (Height(1), Hash::ZERO),
        };

        let transactions_root = compute_transactions_root(&self.transactions);

        let header = BlockHeader {
            height,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            signer: key.public_key(),
            previous_block_hash,
            difficulty: self.difficulty,
            fee_multiplier: self.fee_multiplier,
            transactions_root,
            signature: Sig::empty(),
        };

        let signature = key.sign(&header.signing_bytes());
        let header = BlockHeader { signature, ..header };

        Block {
            header,
            transactions: self.transactions,
        }
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;

    fn test_transaction(key: &SecretKey) -> Transaction {
        let mut transaction = Transaction {
            signer: key.public_key(),
            recipient: Address::of(&SecretKey::generate().public_key()),
            deadline: Utc::now() + chrono::Duration::hours(1),
            max_fee: 100,
            payload: b"payload".to_vec(),
            signature: Sig::empty(),
        };
        transaction.signature = key.sign(&transaction.signing_bytes());
        transaction
    }

    #[test]
    fn test_transaction_sign_verify() {
        let key = SecretKey::generate();
        let transaction = test_transaction(&key);

        assert!(transaction.verify_signature().is_ok());

        let mut tampered = transaction.clone();
        tampered.max_fee = 999;
        assert!(tampered.verify_signature().is_err());
    }

    #[test]
    fn test_transaction_hash_includes_signature() {
        let key = SecretKey::generate();
        let t1 = test_transaction(&key);
        let mut t2 = t1.clone();
        t2.signature = key.sign(b"other message");

        assert_ne!(t1.entity_hash(), t2.entity_hash());
    }

    #[test]
    fn test_block_build_and_validate() {
        let key = SecretKey::generate();
        let block = BlockBuilder::new()
            .transactions(vec![test_transaction(&key), test_transaction(&key)])
            .difficulty(Difficulty(1000))
            .sign(&key);

        assert_eq!(block.header.height, Height(1));
        assert_eq!(block.header.previous_block_hash, Hash::ZERO);
        assert!(block.validate().is_ok());
    }

    #[test]
    fn test_block_chain_links() {
        let key = SecretKey::generate();

        let block1 = BlockBuilder::new().sign(&key);
        let block2 = BlockBuilder::new().parent(block1.header.clone()).sign(&key);

        assert_eq!(block2.header.height, Height(2));
        assert_eq!(block2.header.previous_block_hash, block1.entity_hash());
        assert!(block2.header.validate(&block1.header).is_ok());
    }

    #[test]
    fn test_header_validate_rejects_wrong_height() {
        let key = SecretKey::generate();
        let block1 = BlockBuilder::new().sign(&key);
        let mut header = BlockBuilder::new().parent(block1.header.clone()).sign(&key).header;
        header.height = Height(5);

        assert!(header.validate(&block1.header).is_err());
    }

    #[test]
    fn test_header_validate_rejects_wrong_parent_hash() {
        let key = SecretKey::generate();
        let block1 = BlockBuilder::new().sign(&key);
        let mut header = BlockBuilder::new().parent(block1.header.clone()).sign(&key).header;
        header.previous_block_hash = hash(b"bogus");

        assert!(header.validate(&block1.header).is_err());
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let key = SecretKey::generate();
        let mut block = BlockBuilder::new()
            .transactions(vec![test_transaction(&key)])
            .sign(&key);

        block.header.difficulty = Difficulty(999_999);
        assert!(block.validate().is_err());
    }

    #[test]
    fn test_transactions_root_deterministic() {
        let key = SecretKey::generate();
        let transactions = vec![test_transaction(&key), test_transaction(&key)];

        assert_eq!(
            compute_transactions_root(&transactions),
            compute_transactions_root(&transactions)
        );
        assert_eq!(compute_transactions_root(&[]), Hash::ZERO);
    }

    #[test]
    fn test_block_score_follows_difficulty() {
        let key = SecretKey::generate();
        let block = BlockBuilder::new().difficulty(Difficulty(42)).sign(&key);
        assert_eq!(block.score(), ChainScore::from(42u64));
    }
}
