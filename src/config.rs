//! Queue configuration.
//!
//! Every protocol constant is externally tunable: concurrency, lock TTL and
//! poll interval, dispatch and sweep periods, the staleness threshold, and
//! the claim budget.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Tunables for the queue protocol and its worker loops.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Name of the list holding unclaimed jobs.
    pub pending_list: String,
    /// Name of the list holding claimed jobs.
    pub in_flight_list: String,
    /// Maximum number of concurrently executing job bodies per worker
    /// instance. A fleet of N instances executes up to N times this many.
    pub max_concurrency: usize,
    /// Lifetime of a lock key before the store expires it on behalf of a
    /// crashed holder.
    pub lock_ttl: Duration,
    /// How long a contender sleeps between lock acquisition attempts.
    pub lock_poll_interval: Duration,
    /// Period of the dispatch loop.
    pub dispatch_interval: Duration,
    /// Period of the retry sweep loop.
    pub sweep_interval: Duration,
    /// Age of a claim after which the sweeper reclaims the job.
    ///
    /// Independent of `lock_ttl` by design, and of job runtime by
    /// accident: an execution that legitimately outlives this threshold
    /// will be requeued while still running, producing a duplicate
    /// execution. Keep executions comfortably shorter than the threshold.
    pub stale_threshold: Duration,
    /// Claim budget stamped onto newly produced jobs.
    pub max_attempts: u32,
    /// Maximum runtime the bundled command handler allows a job body.
    pub job_timeout: Duration,
    /// How long pool shutdown waits for the loops to finish.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            pending_list: "pending".to_string(),
            in_flight_list: "in-flight".to_string(),
            max_concurrency: 3,
            lock_ttl: Duration::from_secs(10),
            lock_poll_interval: Duration::from_secs(5),
            dispatch_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(600),
            stale_threshold: Duration::from_secs(600),
            max_attempts: 3,
            job_timeout: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
    /// - `CONVEYOR_PENDING_LIST`: pending list name (default: pending)
    /// - `CONVEYOR_IN_FLIGHT_LIST`: in-flight list name (default: in-flight)
    /// - `CONVEYOR_MAX_CONCURRENCY`: concurrent executions (default: 3)
    /// - `CONVEYOR_LOCK_TTL_SECS`: lock TTL in seconds (default: 10)
    /// - `CONVEYOR_LOCK_POLL_SECS`: lock retry interval (default: 5)
    /// - `CONVEYOR_DISPATCH_INTERVAL_MS`: dispatch period (default: 1000)
    /// - `CONVEYOR_SWEEP_INTERVAL_SECS`: sweep period (default: 600)
    /// - `CONVEYOR_STALE_THRESHOLD_SECS`: staleness age (default: 600)
    /// - `CONVEYOR_MAX_ATTEMPTS`: claim budget (default: 3)
    /// - `CONVEYOR_JOB_TIMEOUT_SECS`: command handler timeout (default: 1800)
    /// - `CONVEYOR_SHUTDOWN_TIMEOUT_SECS`: shutdown grace (default: 60)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REDIS_URL") {
            config.redis_url = val;
        }
        if let Ok(val) = std::env::var("CONVEYOR_PENDING_LIST") {
            config.pending_list = val;
        }
        if let Ok(val) = std::env::var("CONVEYOR_IN_FLIGHT_LIST") {
            config.in_flight_list = val;
        }
        if let Ok(val) = std::env::var("CONVEYOR_MAX_CONCURRENCY") {
            config.max_concurrency = parse_env_value(&val, "CONVEYOR_MAX_CONCURRENCY")?;
        }
        if let Ok(val) = std::env::var("CONVEYOR_LOCK_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "CONVEYOR_LOCK_TTL_SECS")?;
            config.lock_ttl = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CONVEYOR_LOCK_POLL_SECS") {
            let secs: u64 = parse_env_value(&val, "CONVEYOR_LOCK_POLL_SECS")?;
            config.lock_poll_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CONVEYOR_DISPATCH_INTERVAL_MS") {
            let millis: u64 = parse_env_value(&val, "CONVEYOR_DISPATCH_INTERVAL_MS")?;
            config.dispatch_interval = Duration::from_millis(millis);
        }
        if let Ok(val) = std::env::var("CONVEYOR_SWEEP_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "CONVEYOR_SWEEP_INTERVAL_SECS")?;
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CONVEYOR_STALE_THRESHOLD_SECS") {
            let secs: u64 = parse_env_value(&val, "CONVEYOR_STALE_THRESHOLD_SECS")?;
            config.stale_threshold = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CONVEYOR_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "CONVEYOR_MAX_ATTEMPTS")?;
        }
        if let Ok(val) = std::env::var("CONVEYOR_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CONVEYOR_JOB_TIMEOUT_SECS")?;
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = std::env::var("CONVEYOR_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CONVEYOR_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the maximum number of concurrent executions.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the claim budget for newly produced jobs.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the dispatch loop period.
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Sets the sweep loop period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the staleness threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` describing the first
    /// violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_list.is_empty() || self.in_flight_list.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue list names must be non-empty".to_string(),
            ));
        }
        if self.pending_list == self.in_flight_list {
            return Err(ConfigError::ValidationFailed(
                "pending and in-flight lists must be distinct".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lock_ttl.is_zero()
            || self.lock_poll_interval.is_zero()
            || self.dispatch_interval.is_zero()
            || self.sweep_interval.is_zero()
            || self.stale_threshold.is_zero()
        {
            return Err(ConfigError::ValidationFailed(
                "intervals and thresholds must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses an environment variable value into the requested type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = QueueConfig::default();

        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.lock_ttl, Duration::from_secs(10));
        assert_eq!(config.lock_poll_interval, Duration::from_secs(5));
        assert_eq!(config.stale_threshold, Duration::from_secs(600));
        assert_eq!(config.sweep_interval, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = QueueConfig::new()
            .with_redis_url("redis://queue-host:6380")
            .with_max_concurrency(8)
            .with_max_attempts(5)
            .with_dispatch_interval(Duration::from_millis(250))
            .with_sweep_interval(Duration::from_secs(30))
            .with_stale_threshold(Duration::from_secs(120));

        assert_eq!(config.redis_url, "redis://queue-host:6380");
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.dispatch_interval, Duration::from_millis(250));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.stale_threshold, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = QueueConfig::default().with_max_concurrency(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = QueueConfig::default().with_max_attempts(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_identical_list_names() {
        let mut config = QueueConfig::default();
        config.in_flight_list = config.pending_list.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let config = QueueConfig::default().with_stale_threshold(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_value_reports_key() {
        let err = parse_env_value::<u32>("not-a-number", "CONVEYOR_MAX_ATTEMPTS").unwrap_err();
        assert!(err.to_string().contains("CONVEYOR_MAX_ATTEMPTS"));
    }
}
