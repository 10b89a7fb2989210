//! Per-collection batching configuration.

use std::num::NonZeroU64;
use std::time::Duration;

/// Default number of buffered writes after which a flush is forced.
pub const DEFAULT_MAX_WITHOUT_SYNC: u64 = 100;

/// Default quiet period before a deferred flush fires.
pub const DEFAULT_DELAY_BEFORE_SYNC: Duration = Duration::from_millis(100);

/// Write-batching settings of one collection instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Flush after every buffered write instead of deferring.
    pub sync_immediate: bool,
    /// Buffered-write count that forces a flush before the next write is
    /// admitted. 0 behaves like 1.
    pub max_without_sync: u64,
    /// How long an open batch may wait before a deferred flush sends it.
    pub delay_before_sync: Duration,
}

impl CollectionConfig {
    /// The flush threshold actually applied, never zero.
    #[must_use]
    pub fn flush_threshold(&self) -> NonZeroU64 {
        NonZeroU64::new(self.max_without_sync).unwrap_or(NonZeroU64::MIN)
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            sync_immediate: false,
            max_without_sync: DEFAULT_MAX_WITHOUT_SYNC,
            delay_before_sync: DEFAULT_DELAY_BEFORE_SYNC,
        }
    }
}
