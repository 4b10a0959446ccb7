//! Wall-clock timestamps for run metadata.
//!
//! Execution control never depends on these; budgets use fuel and the
//! runtime's own deadline machinery.

use serde::{Deserialize, Serialize};

/// Wall clock timestamp - for run metadata only, not for execution logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub seconds: u64,
    /// Nanosecond remainder
    pub nanos: u32,
}

impl Timestamp {
    /// Create a new timestamp
    #[must_use]
    pub const fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Get current timestamp
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards");
        Self {
            seconds: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
    }

    /// Convert to milliseconds since the epoch
    #[must_use]
    pub const fn as_millis(&self) -> u128 {
        self.seconds as u128 * 1_000 + self.nanos as u128 / 1_000_000
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}
