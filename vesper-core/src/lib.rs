//! Vesper Core - Fundamental types for the Vesper chain.
//!
//! This crate provides the data structures shared by every stage of the
//! ingestion pipeline:
//!
//! - [`crypto`] - Hashing (BLAKE3), signatures (Ed25519), and addresses
//! - [`block`] - Blocks, transactions, and the builder used in tests
//! - [`elements`] - Dispatcher inputs and the per-entity metadata attached
//!   to them as they move through the pipeline
//! - [`score`] - The 256-bit cumulative chain score
//! - [`error`] - Structured errors with stable numeric codes
//!
//! # Example
//!
//! ```rust
//! use vesper_core::{BlockBuilder, ConsumerInput, Difficulty, InputSource, SecretKey};
//!
//! let key = SecretKey::generate();
//! let block = BlockBuilder::new().difficulty(Difficulty(1000)).sign(&key);
//! assert!(block.validate().is_ok());
//!
//! let input = ConsumerInput::from_blocks(vec![block], InputSource::RemotePull);
//! assert_eq!(input.len(), 1);
//! ```

pub mod block;
pub mod crypto;
pub mod elements;
pub mod error;
pub mod score;
pub mod time;

// Re-exports for convenience
pub use block::{
    compute_transactions_root, Block, BlockBuilder, BlockHeader, Difficulty, Height, Transaction,
};
pub use crypto::{hash, hash_pair, Address, Hash, PublicKey, SecretKey, Sig};
pub use elements::{
    BlockElement, ConsumerInput, ElementId, InputSource, TransactionElement, TransactionInfo,
};
pub use error::{Error, ErrorCode, Result, ValidationResult};
pub use score::ChainScore;
pub use time::{fixed_time_supplier, system_time_supplier, TimeSupplier};
