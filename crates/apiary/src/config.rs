//! Pool, retry, and security configuration

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Serde support for durations expressed as integer milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Retry policy with exponential backoff and uniform jitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Whether failed tasks are retried at all
    pub enabled: bool,

    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound on any single delay, applied before jitter
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier applied per retry attempt
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy with retries switched on and default timing.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Compute the delay before retry number `attempt` (0-based: the delay
    /// after the first failure is `delay_for_attempt(0)`).
    ///
    /// The exponential value is capped at `max_delay`, then jittered by a
    /// uniform ±25% so simultaneous failures do not retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((capped * jitter_factor).max(0.0) as u64)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::RetryAttemptsZero);
        }
        Ok(())
    }
}

/// Input-hardening limits applied before a task is admitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Maximum job name length in bytes
    pub max_job_name_len: usize,

    /// Reject context keys that collide with reserved engine fields
    pub block_reserved_keys: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_job_name_len: 1024 * 1024,
            block_reserved_keys: true,
        }
    }
}

/// Context keys that can never be supplied by callers when
/// [`SecurityConfig::block_reserved_keys`] is set.
pub(crate) const RESERVED_CONTEXT_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum pooled (non-temporary) workers
    pub pool_size: usize,

    /// Workers kept warm through idle eviction (0 still keeps one alive)
    pub min_threads: usize,

    /// Maximum pending tasks across all priorities
    pub max_queue_size: usize,

    /// Maximum temporary overflow workers alive at once
    pub max_temporary_workers: usize,

    /// Idle time before a pooled worker above the warm floor is evicted
    #[serde(with = "duration_millis")]
    pub worker_idle_timeout: Duration,

    /// Per-worker job resolution cache capacity
    pub function_cache_size: usize,

    /// Shrink caches and disable affinity tracking to save memory
    pub low_memory_mode: bool,

    /// Deduplicate identical in-flight tasks
    pub coalescing: bool,

    /// Default retry policy for tasks that do not override it
    pub retry: RetryPolicy,

    /// Input-hardening limits
    pub security: SecurityConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            pool_size: cores.saturating_sub(1).max(2),
            min_threads: 0,
            max_queue_size: 1000,
            max_temporary_workers: 10,
            worker_idle_timeout: Duration::from_secs(30),
            function_cache_size: 100,
            low_memory_mode: false,
            coalescing: true,
            retry: RetryPolicy::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_min_threads(mut self, min_threads: usize) -> Self {
        self.min_threads = min_threads;
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_max_temporary_workers(mut self, max_temporary_workers: usize) -> Self {
        self.max_temporary_workers = max_temporary_workers;
        self
    }

    pub fn with_worker_idle_timeout(mut self, worker_idle_timeout: Duration) -> Self {
        self.worker_idle_timeout = worker_idle_timeout;
        self
    }

    pub fn with_function_cache_size(mut self, function_cache_size: usize) -> Self {
        self.function_cache_size = function_cache_size;
        self
    }

    pub fn with_low_memory_mode(mut self, low_memory_mode: bool) -> Self {
        self.low_memory_mode = low_memory_mode;
        self
    }

    pub fn with_coalescing(mut self, coalescing: bool) -> Self {
        self.coalescing = coalescing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::PoolSizeZero);
        }
        if self.min_threads > self.pool_size {
            return Err(ConfigError::MinThreadsExceedsPoolSize {
                min_threads: self.min_threads,
                pool_size: self.pool_size,
            });
        }
        if self.function_cache_size == 0 {
            return Err(ConfigError::FunctionCacheSizeZero);
        }
        self.retry.validate()?;
        Ok(())
    }

    /// Effective per-worker cache size, accounting for low-memory mode.
    pub(crate) fn effective_cache_size(&self) -> usize {
        if self.low_memory_mode {
            self.function_cache_size.min(10)
        } else {
            self.function_cache_size
        }
    }

    /// Workers the idle reaper may never evict below.
    pub(crate) fn eviction_floor(&self) -> usize {
        if self.min_threads > 1 {
            self.min_threads
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pool_size >= 2);
        assert_eq!(config.max_queue_size, 1000);
        assert!(!config.retry.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_pool_size() {
        let config = PoolConfig::default().with_pool_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::PoolSizeZero)));
    }

    #[test]
    fn test_validate_rejects_min_threads_above_pool_size() {
        let config = PoolConfig::default().with_pool_size(2).with_min_threads(5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MinThreadsExceedsPoolSize { .. })
        ));
    }

    #[test]
    fn test_low_memory_mode_shrinks_cache() {
        let config = PoolConfig::default()
            .with_function_cache_size(100)
            .with_low_memory_mode(true);
        assert_eq!(config.effective_cache_size(), 10);
    }

    #[test]
    fn test_eviction_floor_keeps_one_worker() {
        assert_eq!(PoolConfig::default().with_min_threads(0).eviction_floor(), 1);
        assert_eq!(PoolConfig::default().with_min_threads(1).eviction_floor(), 1);
        assert_eq!(
            PoolConfig::default()
                .with_pool_size(8)
                .with_min_threads(4)
                .eviction_floor(),
            4
        );
    }

    #[test]
    fn test_delay_respects_cap_and_jitter_bounds() {
        let policy = RetryPolicy::enabled()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_backoff_factor(2.0);

        for attempt in 0..8 {
            let delay = policy.delay_for_attempt(attempt);
            // capped exponential is at most 500ms, jitter at most +25%
            assert!(delay <= Duration::from_millis(625));
        }

        // first retry: 100ms ±25%
        let first = policy.delay_for_attempt(0);
        assert!(first >= Duration::from_millis(75));
        assert!(first <= Duration::from_millis(125));
    }

    #[test]
    fn test_delay_grows_exponentially_before_cap() {
        let policy = RetryPolicy::enabled()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(60))
            .with_backoff_factor(2.0);

        // attempt 3 is 800ms ±25%; strictly above attempt 0's upper bound
        let late = policy.delay_for_attempt(3);
        assert!(late >= Duration::from_millis(600));
        assert!(late <= Duration::from_millis(1000));
    }

    #[test]
    fn test_duration_millis_round_trip() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(250));
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["base_delay"], serde_json::json!(250));

        let parsed: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.base_delay, Duration::from_millis(250));
    }
}
