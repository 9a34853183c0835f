//! Block chain synchronization consumer.
//!
//! The stateful heart of the block pipeline. Given a candidate suffix, it
//! determines the common ancestor with the local chain, undoes the local
//! blocks past it against the single mutating cache delta, replays the
//! candidate through the processor, compares scores, and either commits the
//! delta (new best chain) or discards it. Steps are atomic with respect to
//! external observers: either the delta is committed and every notification
//! is published, or nothing observable changes.

use std::sync::Arc;

use tracing::{debug, error, info};

use vesper_cache::{CacheDelta, StateCache};
use vesper_chain::{
    ParentInfo, ProcessResult, RollbackInfo, StateChangeInfo, TransactionsChangeInfo,
};
use vesper_core::{
    Block, BlockElement, ChainScore, ConsumerInput, ErrorCode, Hash, Height, TransactionInfo,
};
use vesper_disruptor::{ConsumerResult, DisruptorConsumer};
use vesper_storage::BlockStore;

use crate::hash::compute_block_element_hashes;

/// Externally supplied behaviors the sync consumer composes.
pub struct BlockChainSyncHandlers {
    /// Reports how many leading candidate blocks have acceptable
    /// difficulties, evaluated against the post-rollback delta.
    pub difficulty_checker: Box<dyn Fn(&[BlockElement], &CacheDelta) -> usize + Send>,
    /// Rolls back one applied block, writing into the delta.
    pub undo_block: Box<dyn Fn(&BlockElement, &mut CacheDelta) + Send>,
    /// Stateful validator/executor for the candidate suffix.
    pub processor:
        Box<dyn Fn(&ParentInfo, &mut [BlockElement], &mut CacheDelta) -> ProcessResult + Send>,
    /// Publishes the committed score/state change (and persists rollback
    /// accounting).
    pub state_change: Box<dyn Fn(&StateChangeInfo) + Send>,
    /// Publishes confirmed and reverted transactions.
    pub transactions_change: Box<dyn Fn(&TransactionsChangeInfo) + Send>,
}

/// Shared node state the sync consumer operates on.
pub struct SyncState {
    /// The live state cache (single mutating delta).
    pub cache: StateCache,
    /// Block storage.
    pub storage: Arc<dyn BlockStore>,
    /// Rollback accounting.
    pub rollback_info: Arc<RollbackInfo>,
}

/// The chain synchronization stage.
pub struct BlockChainSyncConsumer {
    state: SyncState,
    max_rollback_blocks: usize,
    handlers: BlockChainSyncHandlers,
}

impl BlockChainSyncConsumer {
    /// Create the stage.
    pub fn new(
        state: SyncState,
        max_rollback_blocks: usize,
        handlers: BlockChainSyncHandlers,
    ) -> Self {
        Self {
            state,
            max_rollback_blocks,
            handlers,
        }
    }

    fn synchronize(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        let local_height = match self.state.storage.chain_height() {
            Ok(height) => height,
            Err(e) => {
                error!(error = %e, "failed to read chain height");
                return ConsumerResult::abort_failure(ErrorCode::StorageRead);
            }
        };

        let count = input.blocks().len();
        let first_height = input.blocks()[0].block.header.height;

        // the candidate cannot be longer than the rollback window plus the
        // one block extending it
        if count > self.max_rollback_blocks + 1 {
            return ConsumerResult::abort_failure(ErrorCode::RemoteChainTooManyBlocks);
        }

        if 0 == first_height.0 {
            return ConsumerResult::abort_failure(ErrorCode::InvalidInput);
        }

        if first_height.0 > local_height.0 + 1 {
            debug!(%first_height, %local_height, "candidate does not attach to the local chain");
            return ConsumerResult::abort_failure(ErrorCode::RemoteChainTooFarAhead);
        }

        let common_ancestor = Height(first_height.0 - 1);
        let undo_count = (local_height.0 - common_ancestor.0) as usize;
        if undo_count > self.max_rollback_blocks {
            debug!(undo_count, "candidate requires too deep a rollback");
            return ConsumerResult::abort_failure(ErrorCode::TooManyRollbacks);
        }

        let local_suffix = match self
            .state
            .storage
            .blocks_from(common_ancestor.next(), undo_count)
        {
            Ok(blocks) if blocks.len() == undo_count => blocks,
            Ok(_) | Err(_) => {
                error!(%common_ancestor, undo_count, "failed to load local chain suffix");
                return ConsumerResult::abort_failure(ErrorCode::StorageRead);
            }
        };

        let mut delta = match self.state.cache.delta() {
            Ok(delta) => delta,
            Err(e) => {
                error!(error = %e, "failed to acquire cache delta");
                return ConsumerResult::abort_failure(ErrorCode::DeltaInUse);
            }
        };

        // undo the local suffix, highest first
        let mut reverted = Vec::new();
        let mut undone_score = ChainScore::ZERO;
        for block in local_suffix.iter().rev() {
            debug!(height = %block.header.height, "rolling back block");
            let mut element = BlockElement::new(block.clone());
            compute_block_element_hashes(&mut element);

            self.state.rollback_info.increment();
            (self.handlers.undo_block)(&element, &mut delta);

            undone_score += element.block.score();
            reverted.extend(element.transactions.iter().map(TransactionInfo::from_element));
        }

        let accepted = (self.handlers.difficulty_checker)(input.blocks(), &delta);
        if accepted < count {
            debug!(accepted, count, "candidate difficulties do not verify");
            self.state.rollback_info.reset();
            return ConsumerResult::abort_failure(ErrorCode::InvalidDifficulty);
        }

        let parent_info = if 0 == common_ancestor.0 {
            ParentInfo::nemesis()
        } else {
            match self.state.storage.block_at(common_ancestor) {
                Ok(Some(block)) => ParentInfo::from_block(&block),
                Ok(None) | Err(_) => {
                    error!(%common_ancestor, "common ancestor missing from storage");
                    self.state.rollback_info.reset();
                    return ConsumerResult::abort_failure(ErrorCode::StorageRead);
                }
            }
        };

        let applied_score =
            match (self.handlers.processor)(&parent_info, input.blocks_mut(), &mut delta) {
                Ok(score) => score,
                Err(code) => {
                    debug!(code = %code, "candidate chain failed processing");
                    self.state.rollback_info.reset();
                    return ConsumerResult::abort_failure(code);
                }
            };

        // candidate score = local - undone + applied; it wins only when it
        // strictly exceeds the local score
        if applied_score <= undone_score {
            debug!("candidate chain does not improve the local score");
            self.state.rollback_info.ignore();
            return ConsumerResult::abort_failure(ErrorCode::LowerScore);
        }
        let score_delta = applied_score.saturating_sub(undone_score);

        let new_height = Height(common_ancestor.0 + count as u64);
        let new_blocks: Vec<Block> = input.blocks().iter().map(|e| e.block.clone()).collect();
        let added_hashes: Vec<Hash> = input
            .blocks()
            .iter()
            .flat_map(|e| e.transaction_hashes())
            .collect();

        if let Err(e) = delta.commit(new_height) {
            error!(error = %e, "cache commit failed");
            self.state.rollback_info.reset();
            return ConsumerResult::abort_failure(ErrorCode::Internal);
        }

        if let Err(e) = self.state.storage.save_blocks(new_blocks) {
            // cache and storage have diverged; the node must not continue
            error!(error = %e, "storage failure after cache commit");
            return ConsumerResult::abort_fatal(ErrorCode::StorageWrite);
        }

        info!(
            height = %new_height,
            blocks = count,
            undone = undo_count,
            "committed chain part"
        );

        (self.handlers.state_change)(&StateChangeInfo {
            score_delta,
            height: new_height,
        });
        (self.handlers.transactions_change)(&TransactionsChangeInfo {
            added_transaction_hashes: added_hashes,
            reverted_transaction_infos: reverted,
        });

        ConsumerResult::Continue
    }
}

impl DisruptorConsumer for BlockChainSyncConsumer {
    fn name(&self) -> &str {
        "block chain sync"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        if input.blocks().is_empty() {
            return ConsumerResult::Continue;
        }
        self.synchronize(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::BlockHashCalculator;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use vesper_chain::{
        check_difficulties, BlockChainProcessor, CoreBlockObserver, ExecutionConfig,
        LocalChainScore, Observer, RollbackCounterType, RollbackResult,
    };
    use vesper_core::{
        system_time_supplier, Address, BlockBuilder, BlockHeader, Difficulty, InputSource,
        SecretKey, Sig, Transaction,
    };
    use vesper_storage::MemoryBlockStore;

    fn test_transaction(key: &SecretKey, fee: u64) -> Transaction {
        let mut transaction = Transaction {
            signer: key.public_key(),
            recipient: Address::of(&key.public_key()),
            deadline: Utc::now() + Duration::hours(1),
            max_fee: fee,
            payload: fee.to_le_bytes().to_vec(),
            signature: Sig::empty(),
        };
        transaction.signature = key.sign(&transaction.signing_bytes());
        transaction
    }

    fn build_chain(
        key: &SecretKey,
        parent: Option<&BlockHeader>,
        difficulties: &[u64],
        fee_seed: u64,
    ) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut parent = parent.cloned();
        for (i, &difficulty) in difficulties.iter().enumerate() {
            let mut builder = BlockBuilder::new()
                .difficulty(Difficulty(difficulty))
                .transactions(vec![test_transaction(key, fee_seed + i as u64)]);
            if let Some(p) = &parent {
                builder = builder.parent(p.clone());
            }
            let block = builder.sign(key);
            parent = Some(block.header.clone());
            blocks.push(block);
        }
        blocks
    }

    struct Fixture {
        cache: StateCache,
        storage: Arc<MemoryBlockStore>,
        rollback: Arc<RollbackInfo>,
        score: LocalChainScore,
        state_changes: Arc<Mutex<Vec<StateChangeInfo>>>,
        tx_changes: Arc<Mutex<Vec<TransactionsChangeInfo>>>,
        key: SecretKey,
    }

    fn fixture(local_difficulties: &[u64], max_rollback_blocks: usize) -> (Fixture, BlockChainSyncConsumer) {
        let key = SecretKey::generate();
        let blocks = build_chain(&key, None, local_difficulties, 1_000);

        let cache = StateCache::new();
        let mut local_score = ChainScore::ZERO;
        if !blocks.is_empty() {
            let mut delta = cache.delta().unwrap();
            for block in &blocks {
                delta
                    .difficulties
                    .insert(block.header.height, block.header.difficulty);
                local_score += block.score();
            }
            delta
                .commit(Height(local_difficulties.len() as u64))
                .unwrap();
        }

        let storage = Arc::new(MemoryBlockStore::with_blocks(blocks).unwrap());
        let rollback = Arc::new(RollbackInfo::new(
            system_time_supplier(),
            Duration::seconds(3600),
        ));
        let score = LocalChainScore::with_score(local_score);

        let execution = ExecutionConfig {
            observer: Arc::new(CoreBlockObserver),
            stateful_validators: Vec::new(),
            time_supplier: system_time_supplier(),
        };
        let processor = BlockChainProcessor::new(execution);

        let state_changes = Arc::new(Mutex::new(Vec::new()));
        let tx_changes = Arc::new(Mutex::new(Vec::new()));

        let handlers = {
            let score = score.clone();
            let rollback = Arc::clone(&rollback);
            let state_changes = Arc::clone(&state_changes);
            let tx_changes = Arc::clone(&tx_changes);
            BlockChainSyncHandlers {
                difficulty_checker: Box::new(|elements, delta| check_difficulties(elements, delta)),
                undo_block: Box::new(|element, delta| {
                    CoreBlockObserver.undo_block(element, delta).unwrap();
                }),
                processor: Box::new(move |parent, elements, delta| {
                    processor.process(parent, elements, delta)
                }),
                state_change: Box::new(move |info| {
                    score.add(info.score_delta);
                    state_changes.lock().push(info.clone());
                    rollback.save();
                }),
                transactions_change: Box::new(move |info| {
                    tx_changes.lock().push(info.clone());
                }),
            }
        };

        let consumer = BlockChainSyncConsumer::new(
            SyncState {
                cache: cache.clone(),
                storage: Arc::clone(&storage) as Arc<dyn BlockStore>,
                rollback_info: Arc::clone(&rollback),
            },
            max_rollback_blocks,
            handlers,
        );

        let fixture = Fixture {
            cache,
            storage,
            rollback,
            score,
            state_changes,
            tx_changes,
            key,
        };
        (fixture, consumer)
    }

    fn candidate_input(f: &Fixture, ancestor_height: u64, difficulties: &[u64]) -> ConsumerInput {
        let parent = if 0 == ancestor_height {
            None
        } else {
            Some(
                f.storage
                    .block_at(Height(ancestor_height))
                    .unwrap()
                    .unwrap()
                    .header,
            )
        };
        let blocks = build_chain(&f.key, parent.as_ref(), difficulties, 9_000);
        let mut input = ConsumerInput::from_blocks(blocks, InputSource::RemotePull);
        BlockHashCalculator.consume(&mut input);
        input
    }

    fn committed(f: &Fixture) -> u64 {
        f.rollback
            .counter(RollbackResult::Committed, RollbackCounterType::All)
    }

    fn ignored(f: &Fixture) -> u64 {
        f.rollback
            .counter(RollbackResult::Ignored, RollbackCounterType::All)
    }

    #[test]
    fn test_single_block_extends_chain() {
        let (f, mut consumer) = fixture(&[100, 100], 40);
        let mut input = candidate_input(&f, 2, &[100]);

        assert_eq!(consumer.consume(&mut input), ConsumerResult::Continue);

        assert_eq!(f.cache.height(), Height(3));
        assert_eq!(f.storage.chain_height().unwrap(), Height(3));
        assert_eq!(f.score.get(), ChainScore::from(300u64));

        // no undo happened
        assert_eq!(committed(&f), 0);
        assert_eq!(ignored(&f), 0);

        let state_changes = f.state_changes.lock();
        assert_eq!(state_changes.len(), 1);
        assert_eq!(state_changes[0].score_delta, ChainScore::from(100u64));
        assert_eq!(state_changes[0].height, Height(3));

        let tx_changes = f.tx_changes.lock();
        assert_eq!(tx_changes[0].added_transaction_hashes.len(), 1);
        assert!(tx_changes[0].reverted_transaction_infos.is_empty());
    }

    #[test]
    fn test_better_fork_replaces_local_suffix() {
        let (f, mut consumer) = fixture(&[100, 100, 100, 100], 40);
        // replace the local suffix [3, 4] with a three-block fork
        let mut input = candidate_input(&f, 2, &[100, 100, 100]);

        assert_eq!(consumer.consume(&mut input), ConsumerResult::Continue);

        assert_eq!(f.cache.height(), Height(5));
        assert_eq!(f.storage.chain_height().unwrap(), Height(5));
        // 400 - 200 + 300
        assert_eq!(f.score.get(), ChainScore::from(500u64));

        assert_eq!(committed(&f), 2);
        assert_eq!(
            f.rollback
                .counter(RollbackResult::Committed, RollbackCounterType::Recent),
            2
        );

        let tx_changes = f.tx_changes.lock();
        assert_eq!(tx_changes[0].added_transaction_hashes.len(), 3);
        assert_eq!(tx_changes[0].reverted_transaction_infos.len(), 2);
    }

    #[test]
    fn test_equal_score_fork_is_ignored() {
        let (f, mut consumer) = fixture(&[100, 100, 100, 100], 40);
        // candidate has the same cumulative score as the replaced suffix
        let mut input = candidate_input(&f, 2, &[100, 100]);

        assert_eq!(
            consumer.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::LowerScore)
        );

        // nothing observable changed
        assert_eq!(f.cache.height(), Height(4));
        assert_eq!(f.storage.chain_height().unwrap(), Height(4));
        assert_eq!(f.score.get(), ChainScore::from(400u64));
        assert!(f.state_changes.lock().is_empty());
        assert!(f.tx_changes.lock().is_empty());

        assert_eq!(committed(&f), 0);
        assert_eq!(ignored(&f), 1);
        assert_eq!(f.rollback.pending(), 0);
    }

    #[test]
    fn test_too_many_rollbacks_rejected_before_delta() {
        let (f, mut consumer) = fixture(&[100, 100, 100, 100], 2);
        // attaching at height 1 would undo three blocks
        let mut input = candidate_input(&f, 1, &[100, 100, 100]);

        assert_eq!(
            consumer.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::TooManyRollbacks)
        );

        assert_eq!(f.cache.height(), Height(4));
        assert_eq!(f.rollback.pending(), 0);
        // the delta was never acquired
        assert!(f.cache.delta().is_ok());
    }

    #[test]
    fn test_candidate_too_far_ahead_rejected() {
        let (_f, mut consumer) = fixture(&[100, 100], 40);
        let key = SecretKey::generate();
        let mut orphan = BlockBuilder::new().difficulty(Difficulty(100)).sign(&key);
        orphan.header.height = Height(4);
        let mut input = ConsumerInput::from_blocks(vec![orphan], InputSource::RemotePush);
        BlockHashCalculator.consume(&mut input);

        assert_eq!(
            consumer.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::RemoteChainTooFarAhead)
        );
    }

    #[test]
    fn test_oversized_candidate_rejected() {
        let (f, mut consumer) = fixture(&[100], 2);
        let mut input = candidate_input(&f, 1, &[100, 100, 100, 100]);

        assert_eq!(
            consumer.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::RemoteChainTooManyBlocks)
        );
    }

    #[test]
    fn test_difficulty_mismatch_discards_rollback() {
        let (f, mut consumer) = fixture(&[100, 100, 100], 40);
        // the difficulty band allows at most a 2x step
        let mut input = candidate_input(&f, 2, &[900]);

        assert_eq!(
            consumer.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::InvalidDifficulty)
        );

        assert_eq!(f.cache.height(), Height(3));
        assert_eq!(f.rollback.pending(), 0);
        assert_eq!(committed(&f), 0);
        assert_eq!(ignored(&f), 0);
        assert!(f.cache.delta().is_ok());
    }

    #[test]
    fn test_processor_failure_discards_delta() {
        let (f, mut consumer) = fixture(&[100, 100], 40);
        let mut input = candidate_input(&f, 2, &[100, 100]);
        // break the internal link so the processor rejects the suffix
        input.blocks_mut()[1].block.header.previous_block_hash = vesper_core::hash(b"fork");

        assert_eq!(
            consumer.consume(&mut input),
            ConsumerResult::abort_failure(ErrorCode::BrokenChainLink)
        );

        assert_eq!(f.cache.height(), Height(2));
        assert_eq!(f.rollback.pending(), 0);
        assert!(f.state_changes.lock().is_empty());
        assert!(f.cache.delta().is_ok());
    }

    #[test]
    fn test_sync_from_empty_chain() {
        let (f, mut consumer) = fixture(&[], 40);
        let mut input = candidate_input(&f, 0, &[100, 100]);

        assert_eq!(consumer.consume(&mut input), ConsumerResult::Continue);
        assert_eq!(f.cache.height(), Height(2));
        assert_eq!(f.score.get(), ChainScore::from(200u64));
    }

    #[test]
    fn test_transaction_input_is_skipped() {
        let (f, mut consumer) = fixture(&[100], 40);
        let mut input = ConsumerInput::from_transactions(
            vec![test_transaction(&f.key, 1)],
            InputSource::RemotePush,
        );

        assert_eq!(consumer.consume(&mut input), ConsumerResult::Continue);
        assert_eq!(f.cache.height(), Height(1));
    }

    #[test]
    fn test_delta_is_released_after_commit() {
        let (f, mut consumer) = fixture(&[100], 40);
        let mut input = candidate_input(&f, 1, &[100]);

        consumer.consume(&mut input);
        assert!(f.cache.delta().is_ok());
    }
}
