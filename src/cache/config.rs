//! Query cache configuration.
//!
//! Loaded from the `[cache]` table of `vitrine.toml`; every field has a
//! default so the table may be omitted entirely.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_STALE_TIME_MS: u64 = 30_000;
const DEFAULT_GC_TIME_MS: u64 = 300_000;
const DEFAULT_MAX_ENTRIES: usize = 512;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_NOTICE_CAPACITY: usize = 64;

/// Upper bound for a single retry backoff.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Cache configuration from `vitrine.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age (ms) after which a successful entry is refetched on the next read.
    pub stale_time_ms: u64,
    /// How long (ms) an entry without observers survives garbage collection.
    pub gc_time_ms: u64,
    /// Maximum number of entries before LRU eviction.
    pub max_entries: usize,
    /// First retry delay (ms); doubled on each further attempt.
    pub retry_base_delay_ms: u64,
    /// Default for queries that do not set `refetch_on_focus` themselves.
    pub refetch_on_focus: bool,
    /// Default retry count for queries.
    pub retry_count: u32,
    /// Buffered notices per subscriber before the oldest are dropped.
    pub notice_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: DEFAULT_STALE_TIME_MS,
            gc_time_ms: DEFAULT_GC_TIME_MS,
            max_entries: DEFAULT_MAX_ENTRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            refetch_on_focus: false,
            retry_count: 0,
            notice_capacity: DEFAULT_NOTICE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Broadcast channels reject a zero capacity.
    pub fn notice_capacity_non_zero(&self) -> usize {
        self.notice_capacity.max(1)
    }

    /// Delay before retry number `attempt` (0-based), capped at [`MAX_RETRY_DELAY`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_base_delay()
            .checked_mul(factor)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }
}
