//! The consumer dispatcher.
//!
//! A dispatcher owns a bounded ring of in-flight inputs and a dedicated
//! worker thread that hands each input through an ordered list of consumers.
//! After the last consumer (or an abort) an inspector runs exactly once per
//! element for cleanup and status flushing.
//!
//! Back-pressure is configurable: when the ring is full, `process_element`
//! either fails with `DispatcherFull` or blocks until a slot frees.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use vesper_core::{ConsumerInput, ElementId, Error, ErrorCode, Result};

use crate::result::{CompletionResult, ConsumerResult, Severity};

/// A single stage of the pipeline.
pub trait DisruptorConsumer: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Process one input.
    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult;
}

struct FnConsumer<F> {
    name: String,
    f: F,
}

impl<F> DisruptorConsumer for FnConsumer<F>
where
    F: FnMut(&mut ConsumerInput) -> ConsumerResult + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        (self.f)(input)
    }
}

/// Wrap a closure as a consumer.
pub fn consumer_fn<F>(name: impl Into<String>, f: F) -> Box<dyn DisruptorConsumer>
where
    F: FnMut(&mut ConsumerInput) -> ConsumerResult + Send + 'static,
{
    Box::new(FnConsumer {
        name: name.into(),
        f,
    })
}

/// Runs once per element after the last consumer.
pub type Inspector = Box<dyn FnMut(&mut ConsumerInput, &CompletionResult) + Send>;

/// Fires with the element's final disposition, after the inspector.
pub type CompletionCallback = Box<dyn FnOnce(ElementId, &CompletionResult) + Send>;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Dispatcher name used in logs and the audit directory layout.
    pub name: String,
    /// Capacity of the in-flight ring (a power of two is recommended).
    pub ring_size: usize,
    /// Log every N-th element at debug (0 disables tracing).
    pub element_trace_interval: u64,
    /// When the ring is full: `true` fails `process_element`, `false`
    /// blocks the caller until a slot frees.
    pub should_throw_if_full: bool,
}

impl DispatcherOptions {
    /// Create options with defaults for tracing and back-pressure.
    pub fn new(name: impl Into<String>, ring_size: usize) -> Self {
        Self {
            name: name.into(),
            ring_size,
            element_trace_interval: 1,
            should_throw_if_full: false,
        }
    }

    /// Set the element trace interval.
    pub fn element_trace_interval(mut self, interval: u64) -> Self {
        self.element_trace_interval = interval;
        self
    }

    /// Set the full-ring policy.
    pub fn should_throw_if_full(mut self, throw: bool) -> Self {
        self.should_throw_if_full = throw;
        self
    }
}

struct Element {
    id: ElementId,
    input: ConsumerInput,
    callback: Option<CompletionCallback>,
}

struct PushState {
    sender: Option<crossbeam_channel::Sender<Element>>,
    next_id: u64,
}

/// A staged pipeline over a bounded ring, drained by one worker thread.
pub struct ConsumerDispatcher {
    name: String,
    should_throw_if_full: bool,
    push: Mutex<PushState>,
    shutdown_flag: Arc<AtomicBool>,
    num_added: Arc<AtomicU64>,
    num_active: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerDispatcher {
    /// Create a dispatcher and start its worker thread.
    pub fn new(
        options: DispatcherOptions,
        consumers: Vec<Box<dyn DisruptorConsumer>>,
        inspector: Inspector,
    ) -> Self {
        let (sender, receiver) = bounded(options.ring_size);
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let num_active = Arc::new(AtomicU64::new(0));

        info!(
            dispatcher = %options.name,
            ring_size = options.ring_size,
            consumers = consumers.len(),
            "starting dispatcher"
        );

        let worker = {
            let name = options.name.clone();
            let shutdown = Arc::clone(&shutdown_flag);
            let active = Arc::clone(&num_active);
            let trace_interval = options.element_trace_interval;
            std::thread::Builder::new()
                .name(options.name.clone())
                .spawn(move || {
                    run_worker(name, receiver, consumers, inspector, shutdown, active, trace_interval)
                })
                .expect("failed to spawn dispatcher thread")
        };

        Self {
            name: options.name,
            should_throw_if_full: options.should_throw_if_full,
            push: Mutex::new(PushState {
                sender: Some(sender),
                next_id: 1,
            }),
            shutdown_flag,
            num_added: Arc::new(AtomicU64::new(0)),
            num_active,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Dispatcher name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total elements ever accepted.
    pub fn num_added_elements(&self) -> u64 {
        self.num_added.load(Ordering::Relaxed)
    }

    /// Elements currently in flight.
    pub fn num_active_elements(&self) -> u64 {
        self.num_active.load(Ordering::Relaxed)
    }

    /// Check whether the dispatcher accepts new elements.
    pub fn is_running(&self) -> bool {
        !self.shutdown_flag.load(Ordering::Acquire)
    }

    /// Enter an input into the pipeline.
    ///
    /// Returns the id assigned to the element, or [`ElementId::NONE`] for an
    /// empty input (which is dropped without entering the pipeline).
    pub fn process_element(&self, input: ConsumerInput) -> Result<ElementId> {
        self.push(input, None)
    }

    /// Enter an input and register a completion callback.
    pub fn process_element_with(
        &self,
        input: ConsumerInput,
        callback: CompletionCallback,
    ) -> Result<ElementId> {
        self.push(input, Some(callback))
    }

    fn push(&self, input: ConsumerInput, callback: Option<CompletionCallback>) -> Result<ElementId> {
        if input.is_empty() {
            warn!(dispatcher = %self.name, "ignoring empty input from {}", input.source());
            return Ok(ElementId::NONE);
        }

        let mut state = self.push.lock();
        let Some(sender) = state.sender.as_ref() else {
            return Err(Error::shutdown());
        };

        let id = ElementId(state.next_id);
        let element = Element { id, input, callback };

        if self.should_throw_if_full {
            match sender.try_send(element) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => return Err(Error::dispatcher_full(&self.name)),
                Err(TrySendError::Disconnected(_)) => return Err(Error::shutdown()),
            }
        } else if sender.send(element).is_err() {
            return Err(Error::shutdown());
        }

        state.next_id += 1;
        self.num_added.fetch_add(1, Ordering::Relaxed);
        self.num_active.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Stop accepting elements and abort everything still queued.
    ///
    /// Queued and in-flight elements complete with a `Shutdown` abort; the
    /// inspector runs for each of them.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Release);
        self.push.lock().sender = None;
    }
}

impl Drop for ConsumerDispatcher {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(dispatcher = %self.name, "dispatcher worker panicked");
            }
        }
    }
}

fn run_worker(
    name: String,
    receiver: Receiver<Element>,
    mut consumers: Vec<Box<dyn DisruptorConsumer>>,
    mut inspector: Inspector,
    shutdown: Arc<AtomicBool>,
    num_active: Arc<AtomicU64>,
    trace_interval: u64,
) {
    while let Ok(mut element) = receiver.recv() {
        let completion = if shutdown.load(Ordering::Acquire) {
            CompletionResult::aborted(ErrorCode::Shutdown, Severity::Neutral)
        } else {
            if 0 != trace_interval && 0 == element.id.0 % trace_interval {
                debug!(
                    dispatcher = %name,
                    id = %element.id,
                    input = %element.input,
                    "processing element"
                );
            }
            run_consumers(&name, &mut consumers, &mut element, &shutdown)
        };

        inspector(&mut element.input, &completion);
        num_active.fetch_sub(1, Ordering::Release);

        if let Some(callback) = element.callback.take() {
            callback(element.id, &completion);
        }

        if Severity::Fatal == completion.severity {
            // A fatal abort means committed state has diverged from storage;
            // continuing would serve a corrupt chain.
            error!(dispatcher = %name, code = ?completion.code, "fatal element failure");
            panic!("dispatcher {name} aborted fatally: {:?}", completion.code);
        }
    }

    debug!(dispatcher = %name, "dispatcher worker stopped");
}

fn run_consumers(
    name: &str,
    consumers: &mut [Box<dyn DisruptorConsumer>],
    element: &mut Element,
    shutdown: &AtomicBool,
) -> CompletionResult {
    for consumer in consumers.iter_mut() {
        if shutdown.load(Ordering::Acquire) {
            return CompletionResult::aborted(ErrorCode::Shutdown, Severity::Neutral);
        }

        match consumer.consume(&mut element.input) {
            ConsumerResult::Continue => {}
            ConsumerResult::CompleteSuccess => break,
            ConsumerResult::Abort { code, severity } => {
                debug!(
                    dispatcher = %name,
                    id = %element.id,
                    consumer = consumer.name(),
                    code = %code,
                    "element aborted"
                );
                return CompletionResult::aborted(code, severity);
            }
        }
    }

    CompletionResult::success()
}
