//! Optional address precomputation.
//!
//! When enabled by configuration these consumers populate each transaction
//! element's address set so downstream subscribers do not have to derive it
//! again.

use std::sync::Arc;

use vesper_chain::AddressExtractor;
use vesper_core::ConsumerInput;
use vesper_disruptor::{ConsumerResult, DisruptorConsumer};

/// Fills address sets for transactions inside block elements.
pub struct BlockAddressExtraction {
    extractor: Arc<dyn AddressExtractor>,
}

impl BlockAddressExtraction {
    /// Create an extraction stage over the given extractor.
    pub fn new(extractor: Arc<dyn AddressExtractor>) -> Self {
        Self { extractor }
    }
}

impl DisruptorConsumer for BlockAddressExtraction {
    fn name(&self) -> &str {
        "block address extraction"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        for element in input.blocks_mut() {
            for transaction in &mut element.transactions {
                transaction.addresses =
                    Some(self.extractor.extract(&transaction.transaction));
            }
        }
        ConsumerResult::Continue
    }
}

/// Fills address sets for standalone transaction elements.
pub struct TransactionAddressExtraction {
    extractor: Arc<dyn AddressExtractor>,
}

impl TransactionAddressExtraction {
    /// Create an extraction stage over the given extractor.
    pub fn new(extractor: Arc<dyn AddressExtractor>) -> Self {
        Self { extractor }
    }
}

impl DisruptorConsumer for TransactionAddressExtraction {
    fn name(&self) -> &str {
        "transaction address extraction"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        for element in input.transactions_mut() {
            element.addresses = Some(self.extractor.extract(&element.transaction));
        }
        ConsumerResult::Continue
    }
}
