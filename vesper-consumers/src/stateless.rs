//! Stateless validation over an isolated worker pool.
//!
//! The parallel policy fans out per-entity checks across a dedicated rayon
//! pool and joins before returning, keeping validation load off the
//! dispatcher threads.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use vesper_chain::{AggregateStatelessValidator, EntityRef, TransactionStatusSink};
use vesper_core::{ConsumerInput, ErrorCode, TransactionInfo, ValidationResult};
use vesper_disruptor::{ConsumerResult, DisruptorConsumer};

use crate::hash::KnownHashPredicate;

/// Runs per-entity validation on an isolated thread pool.
pub struct ParallelValidationPolicy {
    pool: rayon::ThreadPool,
}

impl ParallelValidationPolicy {
    /// Build a policy with a dedicated pool of `num_threads` workers.
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("validator-{i}"))
            .build()
            .expect("failed to build validator pool");
        Self { pool }
    }

    /// Validate every entity, preserving input order.
    pub fn validate_all(
        &self,
        validator: &AggregateStatelessValidator,
        entities: &[EntityRef<'_>],
    ) -> Vec<ValidationResult> {
        self.pool.install(|| {
            entities
                .par_iter()
                .map(|entity| validator.validate(entity))
                .collect()
        })
    }
}

/// Stateless validation for block inputs.
///
/// Any failing entity aborts the whole input; transactions whose hashes are
/// already known to the node are not re-validated.
pub struct BlockStatelessValidation {
    validator: Arc<AggregateStatelessValidator>,
    policy: Arc<ParallelValidationPolicy>,
    known_hash_predicate: KnownHashPredicate,
}

impl BlockStatelessValidation {
    /// Create the stage.
    pub fn new(
        validator: Arc<AggregateStatelessValidator>,
        policy: Arc<ParallelValidationPolicy>,
        known_hash_predicate: KnownHashPredicate,
    ) -> Self {
        Self {
            validator,
            policy,
            known_hash_predicate,
        }
    }
}

impl DisruptorConsumer for BlockStatelessValidation {
    fn name(&self) -> &str {
        "block stateless validation"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let predicate = &self.known_hash_predicate;
        let mut entities = Vec::new();
        for element in input.blocks() {
            entities.push(EntityRef::Block(element));
            for transaction in &element.transactions {
                if !predicate(&transaction.entity_hash) {
                    entities.push(EntityRef::Transaction(transaction));
                }
            }
        }

        let results = self.policy.validate_all(&self.validator, &entities);
        for result in results {
            if let Some(code) = result.failure_code() {
                debug!(code = %code, "block input failed stateless validation");
                return ConsumerResult::abort_failure(code);
            }
        }

        ConsumerResult::Continue
    }
}

/// Stateless validation for transaction inputs.
///
/// Failing transactions are reported to the status sink and marked skipped;
/// the input is dropped when nothing validatable remains.
pub struct TransactionStatelessValidation {
    validator: Arc<AggregateStatelessValidator>,
    policy: Arc<ParallelValidationPolicy>,
    status_sink: TransactionStatusSink,
}

impl TransactionStatelessValidation {
    /// Create the stage.
    pub fn new(
        validator: Arc<AggregateStatelessValidator>,
        policy: Arc<ParallelValidationPolicy>,
        status_sink: TransactionStatusSink,
    ) -> Self {
        Self {
            validator,
            policy,
            status_sink,
        }
    }
}

impl DisruptorConsumer for TransactionStatelessValidation {
    fn name(&self) -> &str {
        "transaction stateless validation"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let pending: Vec<usize> = input
            .transactions()
            .iter()
            .enumerate()
            .filter(|(_, element)| !element.skip)
            .map(|(i, _)| i)
            .collect();

        let entities: Vec<EntityRef<'_>> = pending
            .iter()
            .map(|&i| EntityRef::Transaction(&input.transactions()[i]))
            .collect();
        let results = self.policy.validate_all(&self.validator, &entities);
        drop(entities);

        let mut last_failure = None;
        let mut remaining = 0usize;
        for (&i, result) in pending.iter().zip(results.iter()) {
            match result.failure_code() {
                Some(code) => {
                    let element = &mut input.transactions_mut()[i];
                    element.skip = true;
                    (self.status_sink)(&TransactionInfo::from_element(element), code);
                    last_failure = Some(code);
                }
                None => remaining += 1,
            }
        }

        if 0 == remaining {
            return match last_failure {
                Some(code) => ConsumerResult::abort_failure(code),
                None => ConsumerResult::abort_neutral(ErrorCode::DuplicateHash),
            };
        }

        ConsumerResult::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use vesper_chain::{SignatureValidator, StatelessValidator};
    use vesper_core::{
        Address, BlockBuilder, Hash, InputSource, SecretKey, Sig, Transaction,
    };

    fn test_transaction(key: &SecretKey, fee: u64) -> Transaction {
        let mut transaction = Transaction {
            signer: key.public_key(),
            recipient: Address::of(&key.public_key()),
            deadline: Utc::now() + Duration::hours(1),
            max_fee: fee,
            payload: Vec::new(),
            signature: Sig::empty(),
        };
        transaction.signature = key.sign(&transaction.signing_bytes());
        transaction
    }

    fn signature_only() -> Arc<AggregateStatelessValidator> {
        Arc::new(AggregateStatelessValidator::new(vec![Arc::new(
            SignatureValidator,
        )]))
    }

    fn policy() -> Arc<ParallelValidationPolicy> {
        Arc::new(ParallelValidationPolicy::new(2))
    }

    fn never_known() -> KnownHashPredicate {
        Arc::new(|_| false)
    }

    fn collecting_sink() -> (TransactionStatusSink, Arc<Mutex<Vec<(Hash, ErrorCode)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let sink: TransactionStatusSink = Arc::new(move |info: &TransactionInfo, code| {
            seen2.lock().push((info.entity_hash, code));
        });
        (sink, seen)
    }

    fn hashed_block_input(blocks: Vec<vesper_core::Block>) -> ConsumerInput {
        let mut input = ConsumerInput::from_blocks(blocks, InputSource::RemotePull);
        crate::hash::BlockHashCalculator.consume(&mut input);
        input
    }

    fn hashed_transaction_input(transactions: Vec<Transaction>) -> ConsumerInput {
        let mut input = ConsumerInput::from_transactions(transactions, InputSource::RemotePush);
        crate::hash::TransactionHashCalculator.consume(&mut input);
        input
    }

    #[test]
    fn test_valid_block_input_passes() {
        let key = SecretKey::generate();
        let block = BlockBuilder::new()
            .transactions(vec![test_transaction(&key, 1)])
            .sign(&key);
        let mut input = hashed_block_input(vec![block]);

        let mut stage = BlockStatelessValidation::new(signature_only(), policy(), never_known());
        assert_eq!(stage.consume(&mut input), ConsumerResult::Continue);
    }

    #[test]
    fn test_tampered_block_transaction_aborts_input() {
        let key = SecretKey::generate();
        let mut bad = test_transaction(&key, 1);
        bad.max_fee = 999;
        let block = BlockBuilder::new().transactions(vec![bad]).sign(&key);
        let mut input = hashed_block_input(vec![block]);

        let mut stage = BlockStatelessValidation::new(signature_only(), policy(), never_known());
        assert_eq!(
            stage.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::InvalidSignature)
        );
    }

    #[test]
    fn test_known_transactions_skip_block_validation() {
        let key = SecretKey::generate();
        let mut bad = test_transaction(&key, 1);
        bad.max_fee = 999;
        let bad_hash = bad.entity_hash();
        let block = BlockBuilder::new().transactions(vec![bad]).sign(&key);
        let mut input = hashed_block_input(vec![block]);

        // the invalid transaction is already known, so only the block itself
        // is validated
        let predicate: KnownHashPredicate = Arc::new(move |h| *h == bad_hash);
        let mut stage = BlockStatelessValidation::new(signature_only(), policy(), predicate);
        assert_eq!(stage.consume(&mut input), ConsumerResult::Continue);
    }

    #[test]
    fn test_failing_transactions_are_reported_and_skipped() {
        let key = SecretKey::generate();
        let good = test_transaction(&key, 1);
        let mut bad = test_transaction(&key, 2);
        bad.max_fee = 999;

        let mut input = hashed_transaction_input(vec![bad, good]);
        let bad_hash = input.transactions()[0].entity_hash;

        let (sink, seen) = collecting_sink();
        let mut stage = TransactionStatelessValidation::new(signature_only(), policy(), sink);

        assert_eq!(stage.consume(&mut input), ConsumerResult::Continue);
        assert!(input.transactions()[0].skip);
        assert!(!input.transactions()[1].skip);
        assert_eq!(*seen.lock(), vec![(bad_hash, ErrorCode::InvalidSignature)]);
    }

    #[test]
    fn test_all_failing_input_aborts_with_failure() {
        let key = SecretKey::generate();
        let mut bad = test_transaction(&key, 1);
        bad.max_fee = 999;
        let mut input = hashed_transaction_input(vec![bad]);

        let (sink, _seen) = collecting_sink();
        let mut stage = TransactionStatelessValidation::new(signature_only(), policy(), sink);

        assert_eq!(
            stage.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::InvalidSignature)
        );
    }

    #[test]
    fn test_all_skipped_input_aborts_neutral() {
        let key = SecretKey::generate();
        let mut input = hashed_transaction_input(vec![test_transaction(&key, 1)]);
        input.transactions_mut()[0].skip = true;

        let (sink, seen) = collecting_sink();
        let mut stage = TransactionStatelessValidation::new(signature_only(), policy(), sink);

        assert_eq!(
            stage.consume(&mut input),
            ConsumerResult::abort_neutral(ErrorCode::DuplicateHash)
        );
        assert!(seen.lock().is_empty());
    }

    struct RejectBlocks;
    impl StatelessValidator for RejectBlocks {
        fn name(&self) -> &str {
            "reject blocks"
        }
        fn validate(&self, entity: &EntityRef<'_>) -> ValidationResult {
            match entity {
                EntityRef::Block(_) => ValidationResult::Failure(ErrorCode::InvalidBlock),
                EntityRef::Transaction(_) => ValidationResult::Success,
            }
        }
    }

    #[test]
    fn test_block_level_failure_aborts() {
        let key = SecretKey::generate();
        let block = BlockBuilder::new().sign(&key);
        let mut input = hashed_block_input(vec![block]);

        let validator = Arc::new(AggregateStatelessValidator::new(vec![
            Arc::new(SignatureValidator),
            Arc::new(RejectBlocks),
        ]));
        let mut stage = BlockStatelessValidation::new(validator, policy(), never_known());
        assert_eq!(
            stage.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::InvalidBlock)
        );
    }
}
