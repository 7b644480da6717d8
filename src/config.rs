//! Configuration types for provider-fanout

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Largest accepted poll interval
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Smallest accepted wall-clock budget for a job
pub const MIN_MAX_WAIT: Duration = Duration::from_secs(30);
/// Largest accepted wall-clock budget for a job
pub const MAX_MAX_WAIT: Duration = Duration::from_secs(3600);

/// Main configuration
///
/// Fields are organized into two sub-configs:
/// - [`fan_out`](FanOutConfig): per-call timeout, width cap, failure surfacing
/// - [`polling`](PollingConfig): poll interval, wall-clock budget, status retries
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fan-out settings
    #[serde(default)]
    pub fan_out: FanOutConfig,

    /// Job polling settings
    #[serde(default)]
    pub polling: PollingConfig,
}

impl Config {
    /// Parse a JSON document and validate it
    ///
    /// Missing sections and fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check bounded values, reporting the first offending key
    pub fn validate(&self) -> Result<()> {
        self.fan_out.validate()?;
        self.polling.validate()
    }
}

/// Fan-out behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Maximum time one provider call may take (default: 120 seconds)
    #[serde(default = "default_per_call_timeout", with = "millis_serde")]
    pub per_call_timeout: Duration,

    /// Cap on simultaneous provider calls (None = all requests at once)
    ///
    /// When set, a counting semaphore is acquired before each call and released
    /// when it settles, whether it succeeded or not.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// Surface failed results alongside successful ones (default: false)
    #[serde(default)]
    pub include_failures: bool,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            per_call_timeout: default_per_call_timeout(),
            max_concurrency: None,
            include_failures: false,
        }
    }
}

impl FanOutConfig {
    /// Check this section's bounded values
    pub fn validate(&self) -> Result<()> {
        if self.per_call_timeout.is_zero() {
            return Err(Error::config(
                "fan_out.per_call_timeout",
                "per-call timeout must be greater than zero",
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(Error::config(
                "fan_out.max_concurrency",
                "max concurrency must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Job polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between status queries (default: 5 seconds, valid 1-60)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Wall-clock budget measured from submit (default: 600 seconds, valid 30-3600)
    #[serde(default = "default_max_wait", with = "duration_serde")]
    pub max_wait: Duration,

    /// Retries for a status query that failed at the transport level
    ///
    /// Defaults to zero retries: the first transport failure is fatal.
    #[serde(default = "default_status_retry")]
    pub status_retry: RetryConfig,

    /// Call the remote cancel endpoint when the local wait is cancelled (default: false)
    #[serde(default)]
    pub cancel_remote_on_abort: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_wait: default_max_wait(),
            status_retry: default_status_retry(),
            cancel_remote_on_abort: false,
        }
    }
}

impl PollingConfig {
    /// Check this section's bounded values
    pub fn validate(&self) -> Result<()> {
        if !(MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(&self.poll_interval) {
            return Err(Error::config(
                "polling.poll_interval",
                format!(
                    "poll interval must be between {}s and {}s, got {:?}",
                    MIN_POLL_INTERVAL.as_secs(),
                    MAX_POLL_INTERVAL.as_secs(),
                    self.poll_interval
                ),
            ));
        }
        if !(MIN_MAX_WAIT..=MAX_MAX_WAIT).contains(&self.max_wait) {
            return Err(Error::config(
                "polling.max_wait",
                format!(
                    "max wait must be between {}s and {}s, got {:?}",
                    MIN_MAX_WAIT.as_secs(),
                    MAX_MAX_WAIT.as_secs(),
                    self.max_wait
                ),
            ));
        }
        Ok(())
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

fn default_per_call_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(600)
}

fn default_status_retry() -> RetryConfig {
    RetryConfig::none()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

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
