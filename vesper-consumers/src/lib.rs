//! Pipeline stages for the Vesper dispatchers.
//!
//! Block pipeline, in order:
//! hash calculator → hash check → [address extraction] → chain check →
//! stateless validation → chain sync → new-block sink.
//!
//! Transaction pipeline, in order:
//! hash calculator → hash check → [address extraction] → stateless
//! validation → new-transactions consumer.

mod addresses;
mod chain_check;
mod hash;
mod sinks;
mod stateless;
mod sync;

pub use addresses::{BlockAddressExtraction, TransactionAddressExtraction};
pub use chain_check::BlockChainCheck;
pub use hash::{
    compute_block_element_hashes, compute_transaction_element_hashes, BlockHashCalculator,
    BlockHashCheck, KnownHashPredicate, TransactionHashCalculator, TransactionHashCheck,
};
pub use sinks::{NewBlockConsumer, NewBlockSink, NewTransactionsConsumer, NewTransactionsHandler};
pub use stateless::{
    BlockStatelessValidation, ParallelValidationPolicy, TransactionStatelessValidation,
};
pub use sync::{BlockChainSyncConsumer, BlockChainSyncHandlers, SyncState};
