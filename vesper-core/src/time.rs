//! Injectable time source.
//!
//! Every component that needs "now" takes a `TimeSupplier` so tests can
//! drive the clock deterministically.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// Shared closure producing the current time.
pub type TimeSupplier = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A supplier backed by the system clock.
pub fn system_time_supplier() -> TimeSupplier {
    Arc::new(Utc::now)
}

/// A supplier pinned to a fixed instant (tests).
pub fn fixed_time_supplier(millis: i64) -> TimeSupplier {
    Arc::new(move || {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    })
}
