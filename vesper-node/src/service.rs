//! Dispatcher service registration.
//!
//! Builds the block and transaction pipelines, wires the hooks, and
//! registers every service and counter. This is the composition root of the
//! ingestion core; everything it consumes arrives through [`ServiceState`].

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use vesper_cache::{StateCache, UtCache};
use vesper_chain::{
    check_difficulties, subscriber_to_sink, AddressExtractor, AggregateStatelessValidator,
    BlockChainProcessor, ExecutionConfig, LocalChainScore, RollbackCounterType, RollbackInfo,
    RollbackResult, StateChangeSubscriber, StatelessValidator, ThrottleConfig,
    TransactionStatusSubscriber, UtUpdater,
};
use vesper_consumers::{
    BlockAddressExtraction, BlockChainCheck, BlockChainSyncConsumer, BlockChainSyncHandlers,
    BlockHashCalculator, BlockHashCheck, BlockStatelessValidation, NewBlockConsumer,
    NewTransactionsConsumer, NewTransactionsHandler, ParallelValidationPolicy, SyncState,
    TransactionAddressExtraction, TransactionHashCalculator, TransactionHashCheck,
    TransactionStatelessValidation,
};
use vesper_core::{
    Block, ConsumerInput, InputSource, Result, TimeSupplier, Transaction, TransactionInfo,
};
use vesper_disruptor::{
    audit_directory, AuditConsumer, BatchRangeDispatcher, ConsumerDispatcher, DispatcherOptions,
    DisruptorConsumer, Inspector,
};
use vesper_storage::BlockStore;

use crate::config::{ChainConfig, NodeConfig};
use crate::hooks::{
    BlockRangeConsumer, CompletionAwareBlockRangeConsumer, NodeHooks, TransactionRangeConsumer,
};
use crate::locator::ServiceLocator;

/// Display name of the block dispatcher.
pub const BLOCK_DISPATCHER_NAME: &str = "block dispatcher";
/// Display name of the transaction dispatcher.
pub const TRANSACTION_DISPATCHER_NAME: &str = "transaction dispatcher";

/// Everything the dispatcher service composes.
pub struct ServiceState {
    /// Dispatcher and cache configuration.
    pub node_config: NodeConfig,
    /// Chain rule configuration.
    pub chain_config: ChainConfig,
    /// Mempool admission thresholds.
    pub throttle_config: ThrottleConfig,

    /// The live state cache.
    pub cache: StateCache,
    /// The unconfirmed-transaction cache.
    pub ut_cache: Arc<UtCache>,
    /// Block storage.
    pub storage: Arc<dyn BlockStore>,
    /// The local chain score.
    pub score: LocalChainScore,

    /// Execution bundle published by the loaded plugins.
    pub execution: ExecutionConfig,
    /// Registered stateless validators.
    pub stateless_validators: Vec<Arc<dyn StatelessValidator>>,
    /// Address extractor used when precomputation is enabled.
    pub address_extractor: Arc<dyn AddressExtractor>,

    /// Receives per-transaction statuses.
    pub status_subscriber: Arc<dyn TransactionStatusSubscriber>,
    /// Receives committed state changes.
    pub state_change_subscriber: Arc<dyn StateChangeSubscriber>,

    /// Time source.
    pub time_supplier: TimeSupplier,
    /// Hook set connecting surrounding services.
    pub hooks: Arc<NodeHooks>,
}

/// Handles on the running dispatcher service.
///
/// Dropping the service shuts the dispatchers down before the validator
/// pool, so no validation task outlives its pool.
pub struct DispatcherService {
    block_dispatcher: Arc<ConsumerDispatcher>,
    transaction_dispatcher: Arc<ConsumerDispatcher>,
    batch_dispatcher: Arc<BatchRangeDispatcher>,
    ut_updater: Arc<UtUpdater>,
    rollback_info: Arc<RollbackInfo>,
    validator_policy: Arc<ParallelValidationPolicy>,
}

impl DispatcherService {
    /// The block dispatcher.
    pub fn block_dispatcher(&self) -> &Arc<ConsumerDispatcher> {
        &self.block_dispatcher
    }

    /// The transaction dispatcher.
    pub fn transaction_dispatcher(&self) -> &Arc<ConsumerDispatcher> {
        &self.transaction_dispatcher
    }

    /// The batch front-end of the transaction dispatcher. Drive it with
    /// [`vesper_disruptor::batch_transaction_task`].
    pub fn batch_dispatcher(&self) -> &Arc<BatchRangeDispatcher> {
        &self.batch_dispatcher
    }

    /// The unconfirmed-transaction updater.
    pub fn ut_updater(&self) -> &Arc<UtUpdater> {
        &self.ut_updater
    }

    /// Rollback accounting.
    pub fn rollback_info(&self) -> &Arc<RollbackInfo> {
        &self.rollback_info
    }

    /// The isolated stateless-validation pool.
    pub fn validator_policy(&self) -> &Arc<ParallelValidationPolicy> {
        &self.validator_policy
    }

    /// Stop both dispatchers; queued elements are aborted with `Shutdown`.
    pub fn shutdown(&self) {
        self.block_dispatcher.shutdown();
        self.transaction_dispatcher.shutdown();
    }
}

impl Drop for DispatcherService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the dispatchers, register every service and counter, and wire the
/// hooks.
pub fn register_dispatcher_service(
    locator: &ServiceLocator,
    state: &ServiceState,
) -> Result<DispatcherService> {
    let boot_millis = (state.time_supplier)().timestamp_millis();

    // the validator pool must outlive the dispatchers (shutdown order)
    let validator_policy = Arc::new(ParallelValidationPolicy::new(
        state.node_config.validator_pool_size,
    ));
    let stateless_validator = Arc::new(AggregateStatelessValidator::new(
        state.stateless_validators.clone(),
    ));

    let rollback_info = create_and_register_rollback_info(locator, state)?;
    let ut_updater = create_and_register_ut_updater(locator, state)?;
    let known_hash_predicate = state.hooks.known_hash_predicate(Arc::clone(&state.ut_cache));

    // block dispatcher
    let mut consumers: Vec<Box<dyn DisruptorConsumer>> = Vec::new();
    push_audit_consumer(&mut consumers, &state.node_config, BLOCK_DISPATCHER_NAME, boot_millis)?;
    consumers.push(Box::new(BlockHashCalculator));
    consumers.push(Box::new(BlockHashCheck::new(
        state.time_supplier.clone(),
        state.node_config.short_lived_cache_block_duration(),
        state.node_config.max_element_age(),
    )));
    if state.node_config.should_precompute_transaction_addresses {
        consumers.push(Box::new(BlockAddressExtraction::new(Arc::clone(
            &state.address_extractor,
        ))));
    }
    consumers.push(Box::new(BlockChainCheck::new(
        state.chain_config.max_blocks_per_sync_attempt,
        state.chain_config.max_block_future_time(),
        state.time_supplier.clone(),
    )));
    consumers.push(Box::new(BlockStatelessValidation::new(
        Arc::clone(&stateless_validator),
        Arc::clone(&validator_policy),
        Arc::clone(&known_hash_predicate),
    )));
    consumers.push(Box::new(BlockChainSyncConsumer::new(
        SyncState {
            cache: state.cache.clone(),
            storage: Arc::clone(&state.storage),
            rollback_info: Arc::clone(&rollback_info),
        },
        state.chain_config.max_rollback_blocks,
        create_sync_handlers(state, &rollback_info),
    )));
    consumers.push(Box::new(NewBlockConsumer::new(
        {
            let hooks = Arc::clone(&state.hooks);
            Arc::new(move |elements: Vec<vesper_core::BlockElement>| {
                if let Some(sink) = hooks.new_block_sink() {
                    sink(elements);
                }
            })
        },
        InputSource::Local,
    )));

    let block_dispatcher = Arc::new(ConsumerDispatcher::new(
        DispatcherOptions::new(BLOCK_DISPATCHER_NAME, state.node_config.block_disruptor_size)
            .element_trace_interval(state.node_config.block_element_trace_interval)
            .should_throw_if_full(state.node_config.should_abort_when_dispatcher_is_full),
        consumers,
        create_inspector(Arc::clone(&state.status_subscriber)),
    ));
    locator.register_service("dispatcher.block", Arc::clone(&block_dispatcher))?;
    add_dispatcher_counters(locator, &block_dispatcher, "BLK");
    register_block_range_hooks(state, &block_dispatcher)?;

    // transaction dispatcher
    let mut consumers: Vec<Box<dyn DisruptorConsumer>> = Vec::new();
    push_audit_consumer(
        &mut consumers,
        &state.node_config,
        TRANSACTION_DISPATCHER_NAME,
        boot_millis,
    )?;
    consumers.push(Box::new(TransactionHashCalculator));
    consumers.push(Box::new(TransactionHashCheck::new(
        state.time_supplier.clone(),
        state.node_config.short_lived_cache_transaction_duration(),
        Arc::clone(&known_hash_predicate),
        subscriber_to_sink(Arc::clone(&state.status_subscriber)),
    )));
    if state.node_config.should_precompute_transaction_addresses {
        consumers.push(Box::new(TransactionAddressExtraction::new(Arc::clone(
            &state.address_extractor,
        ))));
    }
    consumers.push(Box::new(TransactionStatelessValidation::new(
        Arc::clone(&stateless_validator),
        Arc::clone(&validator_policy),
        subscriber_to_sink(Arc::clone(&state.status_subscriber)),
    )));
    consumers.push(Box::new(NewTransactionsConsumer::new(
        create_new_transactions_handler(state, &ut_updater),
    )));

    let transaction_dispatcher = Arc::new(ConsumerDispatcher::new(
        DispatcherOptions::new(
            TRANSACTION_DISPATCHER_NAME,
            state.node_config.transaction_disruptor_size,
        )
        .element_trace_interval(state.node_config.transaction_element_trace_interval)
        .should_throw_if_full(state.node_config.should_abort_when_dispatcher_is_full),
        consumers,
        create_inspector(Arc::clone(&state.status_subscriber)),
    ));
    locator.register_service("dispatcher.transaction", Arc::clone(&transaction_dispatcher))?;
    add_dispatcher_counters(locator, &transaction_dispatcher, "TX");

    let batch_dispatcher = Arc::new(BatchRangeDispatcher::new(Arc::clone(
        &transaction_dispatcher,
    )));
    locator.register_service("dispatcher.transaction.batch", Arc::clone(&batch_dispatcher))?;
    {
        let batch = Arc::clone(&batch_dispatcher);
        state
            .hooks
            .set_transaction_range_consumer_factory(Arc::new(move |source| {
                let batch = Arc::clone(&batch);
                Arc::new(move |transactions: Vec<Transaction>| {
                    batch.queue(transactions, source, None);
                }) as TransactionRangeConsumer
            }))?;
    }

    if state.node_config.should_precompute_transaction_addresses {
        locator.register_service(
            "dispatcher.notificationPublisher",
            Arc::new(Arc::clone(&state.address_extractor)),
        )?;
    }

    Ok(DispatcherService {
        block_dispatcher,
        transaction_dispatcher,
        batch_dispatcher,
        ut_updater,
        rollback_info,
        validator_policy,
    })
}

fn create_and_register_rollback_info(
    locator: &ServiceLocator,
    state: &ServiceState,
) -> Result<Arc<RollbackInfo>> {
    // the "recent" window spans half the full rollback duration
    let full = state.chain_config.full_rollback_duration();
    let recent_window = Duration::milliseconds(full.num_milliseconds() / 2);
    let rollback_info = Arc::new(RollbackInfo::new(state.time_supplier.clone(), recent_window));
    locator.register_service("rollbacks", Arc::clone(&rollback_info))?;

    add_rollback_counter(locator, "RB COMMIT ALL", &rollback_info, RollbackResult::Committed, RollbackCounterType::All);
    add_rollback_counter(locator, "RB COMMIT RCT", &rollback_info, RollbackResult::Committed, RollbackCounterType::Recent);
    add_rollback_counter(locator, "RB IGNORE ALL", &rollback_info, RollbackResult::Ignored, RollbackCounterType::All);
    add_rollback_counter(locator, "RB IGNORE RCT", &rollback_info, RollbackResult::Ignored, RollbackCounterType::Recent);

    Ok(rollback_info)
}

fn create_and_register_ut_updater(
    locator: &ServiceLocator,
    state: &ServiceState,
) -> Result<Arc<UtUpdater>> {
    let ut_updater = Arc::new(UtUpdater::new(
        Arc::clone(&state.ut_cache),
        state.cache.clone(),
        state.execution.clone(),
        state.throttle_config.clone(),
        state.time_supplier.clone(),
        subscriber_to_sink(Arc::clone(&state.status_subscriber)),
    ));
    locator.register_service("dispatcher.utUpdater", Arc::clone(&ut_updater))?;

    let updater = Arc::clone(&ut_updater);
    state.hooks.add_transactions_change_handler(Arc::new(move |info| {
        updater.update_after_chain_change(
            &info.added_transaction_hashes,
            info.reverted_transaction_infos.clone(),
        );
    }));

    Ok(ut_updater)
}

fn create_sync_handlers(
    state: &ServiceState,
    rollback_info: &Arc<RollbackInfo>,
) -> BlockChainSyncHandlers {
    let observer = Arc::clone(&state.execution.observer);
    let processor = BlockChainProcessor::new(state.execution.clone());
    let score = state.score.clone();
    let subscriber = Arc::clone(&state.state_change_subscriber);
    let rollback = Arc::clone(rollback_info);
    let transactions_change = state.hooks.transactions_change_handler();

    BlockChainSyncHandlers {
        difficulty_checker: Box::new(|elements, delta| check_difficulties(elements, delta)),
        undo_block: Box::new(move |element, delta| {
            if let Err(e) = observer.undo_block(element, delta) {
                warn!(height = %element.block.header.height, error = %e, "block undo failed");
            }
        }),
        processor: Box::new(move |parent, elements, delta| {
            processor.process(parent, elements, delta)
        }),
        state_change: Box::new(move |info| {
            let new_score = score.add(info.score_delta);
            subscriber.notify_score_change(new_score);
            subscriber.notify_state_change(info);
            rollback.save();
        }),
        transactions_change: Box::new(move |info| transactions_change(info)),
    }
}

/// All infos are broadcast even when some transactions failed stateful
/// validation: a transaction rejected here can pass on another node, and a
/// badly synced node would otherwise suppress perfectly valid traffic.
fn create_new_transactions_handler(
    state: &ServiceState,
    ut_updater: &Arc<UtUpdater>,
) -> NewTransactionsHandler {
    let hooks = Arc::clone(&state.hooks);
    let ut_updater = Arc::clone(ut_updater);
    Arc::new(move |infos: Vec<TransactionInfo>| {
        if let Some(sink) = hooks.new_transactions_sink() {
            sink(infos.clone());
        }
        ut_updater.update(infos);
    })
}

fn create_inspector(subscriber: Arc<dyn TransactionStatusSubscriber>) -> Inspector {
    Box::new(move |input, _completion| {
        subscriber.flush();
        input.detach();
    })
}

fn push_audit_consumer(
    consumers: &mut Vec<Box<dyn DisruptorConsumer>>,
    config: &NodeConfig,
    dispatcher_name: &str,
    boot_millis: i64,
) -> Result<()> {
    if !config.should_audit_dispatcher_inputs {
        return Ok(());
    }

    let directory = audit_directory(&config.data_directory, dispatcher_name, boot_millis);
    debug!(path = %directory.display(), "enabling dispatcher auditing");
    consumers.push(Box::new(AuditConsumer::new(directory)?));
    Ok(())
}

fn register_block_range_hooks(
    state: &ServiceState,
    dispatcher: &Arc<ConsumerDispatcher>,
) -> Result<()> {
    {
        let dispatcher = Arc::clone(dispatcher);
        state
            .hooks
            .set_block_range_consumer_factory(Arc::new(move |source| {
                let dispatcher = Arc::clone(&dispatcher);
                Arc::new(move |blocks: Vec<Block>| {
                    let input = ConsumerInput::from_blocks(blocks, source);
                    if let Err(e) = dispatcher.process_element(input) {
                        warn!(error = %e, "failed to enqueue block range");
                    }
                }) as BlockRangeConsumer
            }))?;
    }

    let dispatcher = Arc::clone(dispatcher);
    state
        .hooks
        .set_completion_aware_block_range_consumer_factory(Arc::new(move |source| {
            let dispatcher = Arc::clone(&dispatcher);
            Arc::new(move |blocks: Vec<Block>, callback| {
                dispatcher.process_element_with(ConsumerInput::from_blocks(blocks, source), callback)
            }) as CompletionAwareBlockRangeConsumer
        }))
}

fn add_dispatcher_counters(
    locator: &ServiceLocator,
    dispatcher: &Arc<ConsumerDispatcher>,
    prefix: &str,
) {
    let total = Arc::clone(dispatcher);
    locator.register_counter(format!("{prefix} ELEM TOT"), move || {
        total.num_added_elements()
    });

    let active = Arc::clone(dispatcher);
    locator.register_counter(format!("{prefix} ELEM ACT"), move || {
        active.num_active_elements()
    });
}

fn add_rollback_counter(
    locator: &ServiceLocator,
    name: &str,
    rollback_info: &Arc<RollbackInfo>,
    result: RollbackResult,
    counter_type: RollbackCounterType,
) {
    let rollback_info = Arc::clone(rollback_info);
    locator.register_counter(name.to_string(), move || {
        rollback_info.counter(result, counter_type)
    });
}
