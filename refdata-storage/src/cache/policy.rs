//! Refresh policies for snapshot caches.
//!
//! Every cache is a read cache over data mutated elsewhere. The policy only
//! decides *when* the freshness probe runs.

use refdata_core::CacheConfig;
use std::time::Duration;

/// When a snapshot cache checks the store for newer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Built at construction, refreshed only by explicit
    /// `check_and_refresh()` / `rebuild()` calls.
    Eager,

    /// Probed on `get_snapshot()`, at most once per `min_refresh_interval`.
    ///
    /// Within the window readers get the current snapshot without touching
    /// the store, trading bounded staleness for no refresh storms.
    Lazy {
        min_refresh_interval: Duration,
    },
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::Eager
    }
}

impl RefreshPolicy {
    pub fn eager() -> Self {
        Self::Eager
    }

    pub fn lazy(min_refresh_interval: Duration) -> Self {
        Self::Lazy {
            min_refresh_interval,
        }
    }

    /// Lazy policy using the configured interval.
    pub fn lazy_from_config(config: &CacheConfig) -> Self {
        Self::lazy(config.min_refresh_interval)
    }

    pub fn is_eager(&self) -> bool {
        matches!(self, Self::Eager)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::Lazy { .. })
    }

    /// The probe throttle window, zero for eager caches.
    pub fn min_refresh_interval(&self) -> Duration {
        match self {
            Self::Eager => Duration::ZERO,
            Self::Lazy {
                min_refresh_interval,
            } => *min_refresh_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_eager() {
        let policy = RefreshPolicy::eager();
        assert!(policy.is_eager());
        assert!(!policy.is_lazy());
        assert_eq!(policy.min_refresh_interval(), Duration::ZERO);
    }

    #[test]
    fn test_policy_lazy_from_config() {
        let config = CacheConfig::default().with_min_refresh_interval(Duration::from_secs(7));
        let policy = RefreshPolicy::lazy_from_config(&config);
        assert!(policy.is_lazy());
        assert_eq!(policy.min_refresh_interval(), Duration::from_secs(7));
    }

    #[test]
    fn test_policy_default_is_eager() {
        assert!(RefreshPolicy::default().is_eager());
    }
}
