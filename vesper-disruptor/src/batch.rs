//! Batch range dispatcher.
//!
//! Sits in front of the transaction dispatcher and aggregates small range
//! fragments per source, amortizing dispatcher entry cost. A periodic task
//! drains the queue into the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vesper_core::{ConsumerInput, InputSource, PublicKey, Transaction};

use crate::dispatcher::ConsumerDispatcher;

struct Bucket {
    source: InputSource,
    source_public_key: Option<PublicKey>,
    transactions: Vec<Transaction>,
}

/// Aggregates transaction range fragments per source before dispatch.
pub struct BatchRangeDispatcher {
    dispatcher: Arc<ConsumerDispatcher>,
    buckets: Mutex<Vec<Bucket>>,
}

impl BatchRangeDispatcher {
    /// Create a batch front-end for a dispatcher.
    pub fn new(dispatcher: Arc<ConsumerDispatcher>) -> Self {
        Self {
            dispatcher,
            buckets: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a range fragment.
    ///
    /// Fragments with the same source and origin key are concatenated in
    /// arrival order.
    pub fn queue(
        &self,
        transactions: Vec<Transaction>,
        source: InputSource,
        source_public_key: Option<PublicKey>,
    ) {
        if transactions.is_empty() {
            return;
        }

        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets
            .iter_mut()
            .find(|b| b.source == source && b.source_public_key == source_public_key)
        {
            bucket.transactions.extend(transactions);
        } else {
            buckets.push(Bucket {
                source,
                source_public_key,
                transactions,
            });
        }
    }

    /// Check whether anything is queued.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Drain the queue into the dispatcher, one input per bucket.
    ///
    /// Returns the number of inputs dispatched.
    pub fn dispatch(&self) -> usize {
        let buckets = std::mem::take(&mut *self.buckets.lock());
        let mut dispatched = 0;

        for bucket in buckets {
            let mut input = ConsumerInput::from_transactions(bucket.transactions, bucket.source);
            if let Some(key) = bucket.source_public_key {
                input = input.with_source_public_key(key);
            }

            match self.dispatcher.process_element(input) {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    warn!(
                        dispatcher = self.dispatcher.name(),
                        error = %e,
                        "dropping batched transaction range"
                    );
                }
            }
        }

        dispatched
    }
}

/// Periodically drain a batch range dispatcher until shutdown.
pub async fn batch_transaction_task(
    batch: Arc<BatchRangeDispatcher>,
    interval: Duration,
    mut shutdown: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("batch transaction task shutting down");
                break;
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    let dispatched = batch.dispatch();
                    debug!(dispatched, "dispatched batched transaction ranges");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{consumer_fn, DispatcherOptions, Inspector};
    use crate::result::ConsumerResult;
    use chrono::Utc;
    use vesper_core::{Address, SecretKey, Sig};

    fn test_transactions(count: usize) -> Vec<Transaction> {
        let key = SecretKey::generate();
        (0..count)
            .map(|i| {
                let mut transaction = Transaction {
                    signer: key.public_key(),
                    recipient: Address::of(&key.public_key()),
                    deadline: Utc::now() + chrono::Duration::hours(1),
                    max_fee: i as u64,
                    payload: Vec::new(),
                    signature: Sig::empty(),
                };
                transaction.signature = key.sign(&transaction.signing_bytes());
                transaction
            })
            .collect()
    }

    fn recording_dispatcher() -> (Arc<ConsumerDispatcher>, Arc<Mutex<Vec<(usize, InputSource)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let consumer = consumer_fn("record", move |input: &mut ConsumerInput| {
            seen2.lock().push((input.len(), input.source()));
            ConsumerResult::Continue
        });
        let inspector: Inspector = Box::new(|input, _| input.detach());
        let dispatcher = Arc::new(ConsumerDispatcher::new(
            DispatcherOptions::new("tx test", 16),
            vec![consumer],
            inspector,
        ));
        (dispatcher, seen)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_fragments_aggregate_per_source() {
        let (dispatcher, seen) = recording_dispatcher();
        let batch = BatchRangeDispatcher::new(Arc::clone(&dispatcher));

        batch.queue(test_transactions(2), InputSource::RemotePush, None);
        batch.queue(test_transactions(3), InputSource::RemotePush, None);
        batch.queue(test_transactions(1), InputSource::RemotePull, None);
        assert!(!batch.is_empty());

        assert_eq!(batch.dispatch(), 2);
        assert!(batch.is_empty());

        wait_until(|| seen.lock().len() == 2);
        let seen = seen.lock();
        assert_eq!(seen[0], (5, InputSource::RemotePush));
        assert_eq!(seen[1], (1, InputSource::RemotePull));
    }

    #[test]
    fn test_empty_fragment_is_ignored() {
        let (dispatcher, _seen) = recording_dispatcher();
        let batch = BatchRangeDispatcher::new(dispatcher);

        batch.queue(Vec::new(), InputSource::RemotePush, None);
        assert!(batch.is_empty());
        assert_eq!(batch.dispatch(), 0);
    }

    #[test]
    fn test_distinct_origin_keys_stay_separate() {
        let (dispatcher, seen) = recording_dispatcher();
        let batch = BatchRangeDispatcher::new(dispatcher);
        let key = SecretKey::generate().public_key();

        batch.queue(test_transactions(1), InputSource::RemotePush, None);
        batch.queue(test_transactions(1), InputSource::RemotePush, Some(key));

        assert_eq!(batch.dispatch(), 2);
        wait_until(|| seen.lock().len() == 2);
    }

    #[tokio::test]
    async fn test_batch_task_drains_queue() {
        let (dispatcher, seen) = recording_dispatcher();
        let batch = Arc::new(BatchRangeDispatcher::new(dispatcher));
        batch.queue(test_transactions(2), InputSource::RemotePush, None);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(batch_transaction_task(
            Arc::clone(&batch),
            Duration::from_millis(5),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).await.unwrap();
        task.await.unwrap();

        assert!(batch.is_empty());
        assert_eq!(seen.lock().len(), 1);
    }
}
