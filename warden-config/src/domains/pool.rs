//! Worker pool configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use warden_resilience::BackoffStrategy;

use crate::domains::utils::{serde_duration_ms, serde_duration_ms_option};
use crate::error::ConfigResult;
use crate::validation::{validate_no_empty_entries, validate_positive, Validatable};

/// Stop backstop when workers take no part in the stop handshake
pub const DEFAULT_PLAIN_STOP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Stop backstop for enhanced pools
pub const DEFAULT_ENHANCED_STOP_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Drain window for a recycled worker
pub const DEFAULT_RECYCLE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers take part in the started/stop handshake
    #[serde(default = "crate::domains::utils::default_false")]
    pub enhanced: bool,

    /// Replace workers that exit unexpectedly
    #[serde(default = "crate::domains::utils::default_true")]
    pub respawn: bool,

    /// Delay before the first respawn of a crash streak
    #[serde(with = "serde_duration_ms")]
    pub respawn_delay: Duration,

    /// Upper bound for backed-off respawn delays
    #[serde(with = "serde_duration_ms")]
    pub max_respawn_delay: Duration,

    /// How respawn delays grow over a crash streak
    pub respawn_backoff: BackoffStrategy,

    /// Spread respawn delays by +/-20%
    #[serde(default = "crate::domains::utils::default_false")]
    pub respawn_jitter: bool,

    /// Number of workers; defaults to the number of CPUs
    pub count: Option<usize>,

    /// Requests a worker serves before it is recycled
    pub max_connections: Option<u64>,

    /// Backstop for `stop()`
    #[serde(with = "serde_duration_ms_option")]
    pub stop_timeout: Option<Duration>,

    /// Drain window for recycled workers
    #[serde(with = "serde_duration_ms_option")]
    pub recycle_timeout: Option<Duration>,

    /// How often an enhanced stop checks for remaining workers
    #[serde(with = "serde_duration_ms")]
    pub stop_poll_interval: Duration,

    /// Arguments placed before the program's own arguments
    pub exec_args: Vec<String>,

    /// Discard worker stderr
    #[serde(default = "crate::domains::utils::default_false")]
    pub silent: bool,

    /// Arguments passed to every worker
    pub args: Vec<String>,

    /// Extra environment for every worker
    pub env: BTreeMap<String, String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enhanced: false,
            respawn: true,
            respawn_delay: Duration::from_millis(1000),
            max_respawn_delay: Duration::from_secs(30),
            respawn_backoff: BackoffStrategy::default(),
            respawn_jitter: false,
            count: None,
            max_connections: None,
            stop_timeout: None,
            recycle_timeout: None,
            stop_poll_interval: Duration::from_millis(1000),
            exec_args: Vec::new(),
            silent: false,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

impl PoolConfig {
    pub fn with_enhanced(mut self, enhanced: bool) -> Self {
        self.enhanced = enhanced;
        self
    }

    pub fn with_respawn(mut self, respawn: bool) -> Self {
        self.respawn = respawn;
        self
    }

    pub fn with_respawn_delay(mut self, delay: Duration) -> Self {
        self.respawn_delay = delay;
        self
    }

    pub fn with_respawn_backoff(mut self, strategy: BackoffStrategy, jitter: bool) -> Self {
        self.respawn_backoff = strategy;
        self.respawn_jitter = jitter;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_max_connections(mut self, max: u64) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    pub fn with_recycle_timeout(mut self, timeout: Duration) -> Self {
        self.recycle_timeout = Some(timeout);
        self
    }

    pub fn with_stop_poll_interval(mut self, interval: Duration) -> Self {
        self.stop_poll_interval = interval;
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Stop backstop, falling back to the mode's default
    pub fn effective_stop_timeout(&self) -> Duration {
        self.stop_timeout.unwrap_or(if self.enhanced {
            DEFAULT_ENHANCED_STOP_TIMEOUT
        } else {
            DEFAULT_PLAIN_STOP_TIMEOUT
        })
    }

    pub fn effective_recycle_timeout(&self) -> Duration {
        self.recycle_timeout.unwrap_or(DEFAULT_RECYCLE_TIMEOUT)
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(count) = self.count {
            validate_positive(count, "count", self.domain_name())?;
        }

        if let Some(max) = self.max_connections {
            validate_positive(max, "max_connections", self.domain_name())?;
        }

        if self.stop_poll_interval.is_zero() {
            return Err(self.validation_error("stop_poll_interval must be greater than 0"));
        }

        if let BackoffStrategy::Exponential { base } = self.respawn_backoff {
            if !base.is_finite() || base < 1.0 {
                return Err(self.validation_error("respawn_backoff base must be at least 1.0"));
            }
        }

        validate_no_empty_entries(&self.exec_args, "exec_args", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_follow_mode() {
        let plain = PoolConfig::default();
        assert_eq!(plain.effective_stop_timeout(), DEFAULT_PLAIN_STOP_TIMEOUT);

        let enhanced = PoolConfig::default().with_enhanced(true);
        assert_eq!(enhanced.effective_stop_timeout(), DEFAULT_ENHANCED_STOP_TIMEOUT);

        let explicit = PoolConfig::default().with_stop_timeout(Duration::from_millis(100));
        assert_eq!(explicit.effective_stop_timeout(), Duration::from_millis(100));
        assert_eq!(explicit.effective_recycle_timeout(), DEFAULT_RECYCLE_TIMEOUT);
    }

    #[test]
    fn test_yaml_durations_are_milliseconds() {
        let yaml = r#"
enhanced: true
count: 2
max_connections: 10
stop_timeout: 100
respawn_delay: 0
env:
  PORT: "3000"
"#;
        let config: PoolConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.enhanced);
        assert!(config.respawn);
        assert_eq!(config.count, Some(2));
        assert_eq!(config.max_connections, Some(10));
        assert_eq!(config.stop_timeout, Some(Duration::from_millis(100)));
        assert_eq!(config.respawn_delay, Duration::ZERO);
        assert_eq!(config.recycle_timeout, None);
        assert_eq!(config.env.get("PORT").map(String::as_str), Some("3000"));
        assert_eq!(config.respawn_backoff, BackoffStrategy::default());
        assert!(!config.respawn_jitter);
    }

    #[test]
    fn test_yaml_respawn_backoff() {
        let yaml = r#"
respawn_backoff:
  type: linear
respawn_jitter: true
"#;
        let config: PoolConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.respawn_backoff, BackoffStrategy::Linear);
        assert!(config.respawn_jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::default().with_count(0).validate().is_err());
        assert!(PoolConfig::default().with_max_connections(0).validate().is_err());
        assert!(PoolConfig::default()
            .with_stop_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::default()
            .with_respawn_backoff(BackoffStrategy::Exponential { base: 0.5 }, false)
            .validate()
            .is_err());
    }
}
