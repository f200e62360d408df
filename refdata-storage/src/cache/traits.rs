//! Cache lifecycle trait and statistics.

use refdata_core::RefDataResult;
use serde::Serialize;

use super::watermark::Watermark;

/// A cache that can be refreshed in bulk by the registry or a scheduler.
///
/// Implementations must be thread-safe; refresh methods serialize among
/// themselves per instance while readers keep using the current snapshot.
pub trait RefreshableCache: Send + Sync {
    /// Name used in logs and registry lookups.
    fn name(&self) -> &str;

    /// Reload if the store's watermark moved. Returns whether a new snapshot
    /// was swapped in.
    fn check_and_refresh(&self) -> RefDataResult<bool>;

    /// Reload unconditionally.
    fn rebuild(&self) -> RefDataResult<()>;

    /// Watermark of the current snapshot.
    fn watermark(&self) -> Watermark;

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// `get_snapshot()` calls
    pub reads: u64,
    /// Freshness probes run against the store
    pub probes: u64,
    /// Full working-set fetches
    pub loads: u64,
    /// Entries in the current snapshot
    pub entry_count: u64,
    /// Version of the current snapshot (0 = never loaded)
    pub version: u64,
}

impl CacheStats {
    /// Fraction of reads served without a full fetch (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.reads.saturating_sub(self.loads) as f64 / self.reads as f64
        }
    }
}
