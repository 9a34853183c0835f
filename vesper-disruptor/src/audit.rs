//! Audit consumer.
//!
//! When auditing is enabled the registrar inserts this consumer at position
//! 0 so every accepted input is persisted before any other stage touches it.
//! Each input is written as a bincode blob to
//! `<data_dir>/audit/<dispatcher_name>/<boot_ts_millis>/<element_id>`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use vesper_core::{ConsumerInput, ErrorCode, Result};

use crate::dispatcher::DisruptorConsumer;
use crate::result::ConsumerResult;

/// Compute the audit directory for a dispatcher at a boot timestamp.
pub fn audit_directory(data_dir: &Path, dispatcher_name: &str, boot_millis: i64) -> PathBuf {
    data_dir
        .join("audit")
        .join(dispatcher_name)
        .join(boot_millis.to_string())
}

/// Writes every input it sees to the audit directory.
///
/// The consumer numbers files itself; because it runs at position 0 of a
/// dispatcher that assigns gap-free ids starting at 1, file names match
/// element ids.
pub struct AuditConsumer {
    directory: PathBuf,
    next_id: u64,
}

impl AuditConsumer {
    /// Create the consumer, creating the directory if needed (idempotent).
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            next_id: 1,
        })
    }

    /// The directory inputs are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn write(&self, input: &ConsumerInput) -> Result<()> {
        let blob = bincode::serialize(input)?;
        let path = self.directory.join(self.next_id.to_string());
        fs::write(path, blob)?;
        Ok(())
    }
}

impl DisruptorConsumer for AuditConsumer {
    fn name(&self) -> &str {
        "audit"
    }

    fn consume(&mut self, input: &mut ConsumerInput) -> ConsumerResult {
        if let Err(e) = self.write(input) {
            warn!(directory = %self.directory.display(), error = %e, "audit write failed");
            return ConsumerResult::abort_failure(ErrorCode::StorageWrite);
        }

        self.next_id += 1;
        ConsumerResult::Continue
    }
}
