use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::ConfigError;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCircuitBreakerConfig")]
pub struct CircuitBreakerConfig {
    /// Failures while closed that trip the breaker
    pub failure_threshold: u32,
    /// Minimum time spent open before a probe is allowed
    pub cooldown: Duration,
    /// Probes admitted per half-open episode
    pub max_probe_requests: u32,
    /// Reset the failure tally when a probe fails and the breaker re-opens.
    /// Off by default: the tally accumulated before the trip is kept.
    pub reset_failures_on_reopen: bool,
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: u32,
        cooldown: Duration,
        max_probe_requests: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            failure_threshold,
            cooldown,
            max_probe_requests,
            reset_failures_on_reopen: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_reset_failures_on_reopen(mut self, enabled: bool) -> Self {
        self.reset_failures_on_reopen = enabled;
        self
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }

        if self.max_probe_requests == 0 {
            return Err(ConfigError::invalid("max_probe_requests", "must be at least 1"));
        }

        Ok(())
    }
}

/// Wire shape of `CircuitBreakerConfig`, validated on the way in
#[derive(Deserialize)]
struct RawCircuitBreakerConfig {
    failure_threshold: u32,
    cooldown: Duration,
    max_probe_requests: u32,
    #[serde(default)]
    reset_failures_on_reopen: bool,
}

impl TryFrom<RawCircuitBreakerConfig> for CircuitBreakerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawCircuitBreakerConfig) -> Result<Self, Self::Error> {
        Ok(Self::new(raw.failure_threshold, raw.cooldown, raw.max_probe_requests)?
            .with_reset_failures_on_reopen(raw.reset_failures_on_reopen))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            max_probe_requests: 1,
            reset_failures_on_reopen: false,
        }
    }
}
