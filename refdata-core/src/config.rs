//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Upper bound on the retry budget; anything larger is almost certainly a typo.
const MAX_RETRY_BUDGET: u32 = 32;

// ============================================================================
// EXECUTOR
// ============================================================================

/// Retry and isolation settings for the transactional executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of retries after the first attempt (0 disables retries)
    pub retry_budget: u32,
    /// Retries allowed for resource-exhaustion failures, never above `retry_budget`
    pub max_resource_retries: u32,
    /// Backoff before the first retry, doubled per retry before jitter
    pub base_delay: Duration,
    /// Ceiling for a single backoff sleep
    pub max_delay: Duration,
    pub read_isolation: IsolationLevel,
    pub write_isolation: IsolationLevel,
    /// Emit per-attempt timing events
    pub diagnostics: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            max_resource_retries: 2,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(1000),
            read_isolation: IsolationLevel::ReadCommitted,
            write_isolation: IsolationLevel::Serializable,
            diagnostics: false,
        }
    }
}

impl ExecutorConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `REFDATA_RETRY_BUDGET`: Retries after the first attempt (default: 5)
    /// - `REFDATA_RESOURCE_RETRIES`: Retries for resource exhaustion (default: 2)
    /// - `REFDATA_RETRY_BASE_DELAY_MS`: Initial backoff (default: 20)
    /// - `REFDATA_RETRY_MAX_DELAY_MS`: Backoff ceiling (default: 1000)
    /// - `REFDATA_READ_ISOLATION`: Isolation for reads (default: READ COMMITTED)
    /// - `REFDATA_EXECUTOR_DIAGNOSTICS`: Emit timing events (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            retry_budget: env_parse("REFDATA_RETRY_BUDGET").unwrap_or(defaults.retry_budget),
            max_resource_retries: env_parse("REFDATA_RESOURCE_RETRIES")
                .unwrap_or(defaults.max_resource_retries),
            base_delay: env_parse("REFDATA_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: env_parse("REFDATA_RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            read_isolation: env_parse("REFDATA_READ_ISOLATION")
                .unwrap_or(defaults.read_isolation),
            write_isolation: defaults.write_isolation,
            diagnostics: env_parse("REFDATA_EXECUTOR_DIAGNOSTICS").unwrap_or(defaults.diagnostics),
        }
    }

    /// A config that never retries. Useful for background probes.
    pub fn no_retry() -> Self {
        Self {
            retry_budget: 0,
            max_resource_retries: 0,
            ..Self::default()
        }
    }

    /// Set the retry budget.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the resource-exhaustion retry cap.
    pub fn with_resource_retries(mut self, retries: u32) -> Self {
        self.max_resource_retries = retries;
        self
    }

    /// Set base and maximum backoff.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Enable or disable diagnostic timing events.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Retries available to resource-exhaustion failures.
    pub fn resource_retry_limit(&self) -> u32 {
        self.max_resource_retries.min(self.retry_budget)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - retry_budget <= 32
    /// - base_delay <= max_delay
    /// - write_isolation is Serializable
    /// - read_isolation is not stricter than write_isolation
    pub fn validate(&self) -> RefDataResult<()> {
        if self.retry_budget > MAX_RETRY_BUDGET {
            return Err(invalid(
                "retry_budget",
                self.retry_budget.to_string(),
                format!("retry_budget must be at most {}", MAX_RETRY_BUDGET),
            ));
        }

        if self.base_delay > self.max_delay {
            return Err(invalid(
                "base_delay",
                format!("{:?}", self.base_delay),
                "base_delay must not exceed max_delay",
            ));
        }

        if self.write_isolation != IsolationLevel::Serializable {
            return Err(invalid(
                "write_isolation",
                self.write_isolation.to_string(),
                "writes must run SERIALIZABLE",
            ));
        }

        if self.read_isolation > self.write_isolation {
            return Err(invalid(
                "read_isolation",
                self.read_isolation.to_string(),
                "read_isolation must not be stricter than write_isolation",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Settings shared by the snapshot caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum time between freshness probes for lazy caches
    pub min_refresh_interval: Duration,
    /// Hard cap on name search results
    pub max_search_results: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval: Duration::from_secs(30),
            max_search_results: 50,
        }
    }
}

impl CacheConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `REFDATA_MIN_REFRESH_INTERVAL_MS`: Lazy probe throttle (default: 30000)
    /// - `REFDATA_MAX_SEARCH_RESULTS`: Search result cap (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            min_refresh_interval: env_parse("REFDATA_MIN_REFRESH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_refresh_interval),
            max_search_results: env_parse("REFDATA_MAX_SEARCH_RESULTS")
                .unwrap_or(defaults.max_search_results),
        }
    }

    /// Set the lazy refresh interval.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the search result cap.
    pub fn with_max_search_results(mut self, max: usize) -> Self {
        self.max_search_results = max;
        self
    }

    pub fn validate(&self) -> RefDataResult<()> {
        if self.max_search_results == 0 {
            return Err(invalid(
                "max_search_results",
                "0",
                "max_search_results must be greater than 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ERROR CODE MAP
// ============================================================================

/// Maps store-specific error codes onto [`StoreErrorCode`].
///
/// Which raw code means "deadlock" is a property of the backing store, not of
/// the retry logic, so the mapping is configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorCodeMap {
    codes: HashMap<String, StoreErrorCode>,
}

impl ErrorCodeMap {
    /// An empty map: every raw code resolves to `Unclassified`.
    pub fn new() -> Self {
        Self::default()
    }

    /// PostgreSQL SQLSTATE codes.
    pub fn postgres() -> Self {
        Self::new()
            .with("40P01", StoreErrorCode::Deadlock)
            .with("40001", StoreErrorCode::SerializationFailure)
            .with("53300", StoreErrorCode::TooManyConnections)
            .with("53200", StoreErrorCode::OutOfMemory)
            .with("53000", StoreErrorCode::InsufficientResources)
            .with("53100", StoreErrorCode::DiskFull)
            .with("57014", StoreErrorCode::Cancelled)
    }

    /// SQL Server error numbers.
    pub fn sql_server() -> Self {
        Self::new()
            .with("1205", StoreErrorCode::Deadlock)
            .with("3960", StoreErrorCode::SerializationFailure)
            .with("10928", StoreErrorCode::TooManyConnections)
            .with("701", StoreErrorCode::OutOfMemory)
            .with("8645", StoreErrorCode::InsufficientResources)
            .with("1105", StoreErrorCode::DiskFull)
            .with("3980", StoreErrorCode::Cancelled)
    }

    /// Add or replace a mapping.
    pub fn with(mut self, raw_code: impl Into<String>, code: StoreErrorCode) -> Self {
        self.codes.insert(raw_code.into(), code);
        self
    }

    /// Resolve a raw code, `Unclassified` when unknown.
    pub fn resolve(&self, raw_code: &str) -> StoreErrorCode {
        self.codes
            .get(raw_code.trim())
            .copied()
            .unwrap_or(StoreErrorCode::Unclassified)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RefDataConfig {
    pub executor: ExecutorConfig,
    pub cache: CacheConfig,
    pub error_codes: ErrorCodeMap,
}

impl RefDataConfig {
    /// Executor and cache settings from the environment, PostgreSQL error codes.
    pub fn from_env() -> Self {
        Self {
            executor: ExecutorConfig::from_env(),
            cache: CacheConfig::from_env(),
            error_codes: ErrorCodeMap::postgres(),
        }
    }

    pub fn validate(&self) -> RefDataResult<()> {
        self.executor.validate()?;
        self.cache.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn invalid(field: &str, value: impl Into<String>, reason: impl Into<String>) -> RefDataError {
    RefDataError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.into(),
        reason: reason.into(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
