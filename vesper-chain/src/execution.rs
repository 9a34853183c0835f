//! Execution seams.
//!
//! Plugins publish their behavior through these traits; the pipeline only
//! composes them. The bundle consumed by the processor and the
//! unconfirmed-transaction updater is [`ExecutionConfig`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use vesper_cache::CacheDelta;
use vesper_core::{
    Address, BlockElement, ErrorCode, Result, TimeSupplier, Transaction, TransactionElement,
    ValidationResult,
};

/// A stateless view of an entity under validation.
pub enum EntityRef<'a> {
    Block(&'a BlockElement),
    Transaction(&'a TransactionElement),
}

/// Checks that depend only on the entity itself and configuration.
pub trait StatelessValidator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Validate one entity.
    fn validate(&self, entity: &EntityRef<'_>) -> ValidationResult;
}

/// Checks evaluated against the current cache delta.
pub trait StatefulValidator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Validate one transaction against speculative state at `now`.
    fn validate(
        &self,
        transaction: &Transaction,
        delta: &CacheDelta,
        now: DateTime<Utc>,
    ) -> ValidationResult;
}

/// State transitions for blocks and transactions.
pub trait Observer: Send + Sync {
    /// Apply a block's effects to the delta.
    fn apply_block(&self, element: &BlockElement, delta: &mut CacheDelta) -> Result<()>;

    /// Roll back a block's effects from the delta.
    fn undo_block(&self, element: &BlockElement, delta: &mut CacheDelta) -> Result<()>;

    /// Apply a single transaction's effects to a speculative delta.
    ///
    /// Used by the unconfirmed-transaction updater so later transactions in
    /// a batch see the effects of earlier ones.
    fn apply_transaction(&self, _transaction: &Transaction, _delta: &mut CacheDelta) -> Result<()> {
        Ok(())
    }
}

/// Derives the address set touched by a transaction.
pub trait AddressExtractor: Send + Sync {
    /// Extract the addresses a transaction touches.
    fn extract(&self, transaction: &Transaction) -> BTreeSet<Address>;
}

/// Fold a list of stateless validators into one.
pub struct AggregateStatelessValidator {
    validators: Vec<Arc<dyn StatelessValidator>>,
}

impl AggregateStatelessValidator {
    /// Create an aggregate over the given validators.
    pub fn new(validators: Vec<Arc<dyn StatelessValidator>>) -> Self {
        Self { validators }
    }

    /// Run every validator, short-circuiting on the first failure.
    pub fn validate(&self, entity: &EntityRef<'_>) -> ValidationResult {
        let mut merged = ValidationResult::Success;
        for validator in &self.validators {
            let result = validator.validate(entity);
            if result.is_failure() {
                return result;
            }
            merged = merged.and(result);
        }
        merged
    }
}

/// The execution bundle: state transitions plus stateful validation.
#[derive(Clone)]
pub struct ExecutionConfig {
    /// The observer applying and undoing state transitions.
    pub observer: Arc<dyn Observer>,
    /// Registered stateful validators.
    pub stateful_validators: Vec<Arc<dyn StatefulValidator>>,
    /// Time source for "current time" validation.
    pub time_supplier: TimeSupplier,
}

impl ExecutionConfig {
    /// Run every stateful validator, short-circuiting on the first failure.
    pub fn validate_stateful(
        &self,
        transaction: &Transaction,
        delta: &CacheDelta,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut merged = ValidationResult::Success;
        for validator in &self.stateful_validators {
            let result = validator.validate(transaction, delta, now);
            if result.is_failure() {
                return result;
            }
            merged = merged.and(result);
        }
        merged
    }
}

// Core plugin set: the minimal behaviors the node registers regardless of
// which plugins are loaded.

/// Verifies block and transaction signatures.
pub struct SignatureValidator;

impl StatelessValidator for SignatureValidator {
    fn name(&self) -> &str {
        "signature"
    }

    fn validate(&self, entity: &EntityRef<'_>) -> ValidationResult {
        let ok = match entity {
            EntityRef::Block(element) => element.block.header.verify_signature().is_ok(),
            EntityRef::Transaction(element) => element.transaction.verify_signature().is_ok(),
        };
        if ok {
            ValidationResult::Success
        } else {
            ValidationResult::Failure(ErrorCode::InvalidSignature)
        }
    }
}

/// Rejects transactions past their deadline.
pub struct DeadlineValidator;

impl StatefulValidator for DeadlineValidator {
    fn name(&self) -> &str {
        "deadline"
    }

    fn validate(
        &self,
        transaction: &Transaction,
        _delta: &CacheDelta,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        if transaction.deadline > now {
            ValidationResult::Success
        } else {
            ValidationResult::Failure(ErrorCode::DeadlineExpired)
        }
    }
}

/// Maintains the difficulty sub-cache across applies and undos.
pub struct CoreBlockObserver;

impl Observer for CoreBlockObserver {
    fn apply_block(&self, element: &BlockElement, delta: &mut CacheDelta) -> Result<()> {
        let header = &element.block.header;
        delta.difficulties.insert(header.height, header.difficulty);
        Ok(())
    }

    fn undo_block(&self, element: &BlockElement, delta: &mut CacheDelta) -> Result<()> {
        delta.difficulties.remove(element.block.header.height);
        Ok(())
    }
}

/// Extracts the signer and recipient addresses.
pub struct CoreAddressExtractor;

impl AddressExtractor for CoreAddressExtractor {
    fn extract(&self, transaction: &Transaction) -> BTreeSet<Address> {
        let mut addresses = BTreeSet::new();
        addresses.insert(transaction.signer.address());
        addresses.insert(transaction.recipient);
        addresses
    }
}
