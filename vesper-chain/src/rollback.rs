//! Rollback accounting.
//!
//! Tracks how many blocks have been undone during chain synchronization,
//! split into committed rollbacks (the candidate chain won) and ignored
//! rollbacks (the candidate was abandoned), each as a lifetime total and a
//! sliding recent window.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use vesper_core::TimeSupplier;

/// What happened to a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackResult {
    /// The undone blocks were replaced by a better chain.
    Committed,
    /// The candidate chain was abandoned.
    Ignored,
}

/// Which counter flavor to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackCounterType {
    /// Lifetime total.
    All,
    /// Only events within the recent window.
    Recent,
}

#[derive(Debug, Default)]
struct Inner {
    pending: u64,
    total_committed: u64,
    total_ignored: u64,
    recent_committed: VecDeque<(DateTime<Utc>, u64)>,
    recent_ignored: VecDeque<(DateTime<Utc>, u64)>,
}

/// Sliding-window rollback counters.
///
/// `increment` is called once per undone block; the pending count is then
/// either `save`d (chain switch committed), `ignore`d (candidate lost the
/// score comparison), or `reset` (difficulty mismatch, nothing recorded).
pub struct RollbackInfo {
    time_supplier: TimeSupplier,
    recent_window: Duration,
    inner: Mutex<Inner>,
}

impl RollbackInfo {
    /// Create rollback accounting with the given recent window.
    pub fn new(time_supplier: TimeSupplier, recent_window: Duration) -> Self {
        Self {
            time_supplier,
            recent_window,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of blocks undone by the in-progress rollback.
    pub fn pending(&self) -> u64 {
        self.inner.lock().pending
    }

    /// Count one undone block.
    pub fn increment(&self) {
        self.inner.lock().pending += 1;
    }

    /// Discard the pending rollback without recording anything.
    pub fn reset(&self) {
        self.inner.lock().pending = 0;
    }

    /// Record the pending rollback as committed.
    pub fn save(&self) {
        let now = (self.time_supplier)();
        let mut inner = self.inner.lock();
        if 0 != inner.pending {
            inner.total_committed += inner.pending;
            let pending = inner.pending;
            inner.recent_committed.push_back((now, pending));
        }
        inner.pending = 0;
    }

    /// Record one ignored-rollback occurrence and discard the pending count.
    pub fn ignore(&self) {
        let now = (self.time_supplier)();
        let mut inner = self.inner.lock();
        if 0 != inner.pending {
            inner.total_ignored += 1;
            inner.recent_ignored.push_back((now, 1));
        }
        inner.pending = 0;
    }

    /// Read a counter.
    pub fn counter(&self, result: RollbackResult, kind: RollbackCounterType) -> u64 {
        let now = (self.time_supplier)();
        let window = self.recent_window;
        let mut inner = self.inner.lock();

        match (result, kind) {
            (RollbackResult::Committed, RollbackCounterType::All) => inner.total_committed,
            (RollbackResult::Ignored, RollbackCounterType::All) => inner.total_ignored,
            (RollbackResult::Committed, RollbackCounterType::Recent) => {
                prune(&mut inner.recent_committed, now, window);
                inner.recent_committed.iter().map(|(_, n)| n).sum()
            }
            (RollbackResult::Ignored, RollbackCounterType::Recent) => {
                prune(&mut inner.recent_ignored, now, window);
                inner.recent_ignored.iter().map(|(_, n)| n).sum()
            }
        }
    }
}

fn prune(entries: &mut VecDeque<(DateTime<Utc>, u64)>, now: DateTime<Utc>, window: Duration) {
    while let Some((timestamp, _)) = entries.front() {
        if now - *timestamp <= window {
            break;
        }
        entries.pop_front();
    }
}
