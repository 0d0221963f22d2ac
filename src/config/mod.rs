pub mod defaults;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::simulation::{FlakyService, HarnessOptions};
use crate::stability::{CircuitBreakerConfig, ConfigError};
use self::defaults::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub breaker: BreakerSettings,
    pub demo: DemoSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub max_probe_requests: u32,
    pub reset_failures_on_reopen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub calls: u32,
    pub call_interval_ms: u64,
    pub failure_rate: f64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub concurrency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl AppConfig {
    /// `<config dir>/circuit-guard/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILENAME)
    }

    /// Load from `config_path`, or from the default location if a file exists
    /// there, or fall back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_config_path();
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        self.to_breaker_config()
            .context("Invalid [breaker] section")?;

        if self.demo.calls == 0 {
            return Err(anyhow::anyhow!("Demo calls must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.demo.failure_rate) {
            return Err(anyhow::anyhow!("Demo failure rate must be between 0.0 and 1.0"));
        }

        if self.demo.min_delay_ms > self.demo.max_delay_ms {
            return Err(anyhow::anyhow!("Demo min_delay_ms must not exceed max_delay_ms"));
        }

        if self.demo.concurrency == 0 {
            return Err(anyhow::anyhow!("Demo concurrency must be greater than 0"));
        }

        if !SUPPORTED_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "Unsupported log level '{}', expected one of {:?}",
                self.logging.level,
                SUPPORTED_LOG_LEVELS
            ));
        }

        Ok(())
    }

    /// Convert breaker settings to a validated CircuitBreakerConfig
    pub fn to_breaker_config(&self) -> Result<CircuitBreakerConfig, ConfigError> {
        Ok(CircuitBreakerConfig::new(
            self.breaker.failure_threshold,
            Duration::from_millis(self.breaker.cooldown_ms),
            self.breaker.max_probe_requests,
        )?
        .with_reset_failures_on_reopen(self.breaker.reset_failures_on_reopen))
    }

    pub fn to_harness_options(&self) -> HarnessOptions {
        HarnessOptions {
            calls: self.demo.calls,
            call_interval: Duration::from_millis(self.demo.call_interval_ms),
            concurrency: self.demo.concurrency,
        }
    }

    /// Simulated dependency described by the demo settings
    pub fn build_demo_service(&self, name: &str) -> FlakyService {
        FlakyService::new(
            name,
            self.demo.failure_rate,
            Duration::from_millis(self.demo.min_delay_ms),
            Duration::from_millis(self.demo.max_delay_ms),
        )
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_probe_requests: DEFAULT_MAX_PROBE_REQUESTS,
            reset_failures_on_reopen: false,
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            calls: DEFAULT_DEMO_CALLS,
            call_interval_ms: DEFAULT_CALL_INTERVAL_MS,
            failure_rate: DEFAULT_FAILURE_RATE,
            min_delay_ms: DEFAULT_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();

        let breaker = config.to_breaker_config().unwrap();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.cooldown, Duration::from_millis(1000));
        assert_eq!(breaker.max_probe_requests, 1);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("[breaker]\nfailure_threshold = 7\n").unwrap();
        assert_eq!(config.breaker.failure_threshold, 7);
        assert_eq!(config.breaker.cooldown_ms, DEFAULT_COOLDOWN_MS);
        assert_eq!(config.demo, DemoSettings::default());
    }

    #[test]
    fn test_invalid_breaker_section_rejected() {
        let mut config = AppConfig::default();
        config.breaker.max_probe_requests = 0;

        let err = config.validate().unwrap_err();
        assert!(err.root_cause().to_string().contains("max_probe_requests"));
    }

    #[test]
    fn test_invalid_demo_settings_rejected() {
        let mut config = AppConfig::default();
        config.demo.failure_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.demo.min_delay_ms = 500;
        config.demo.max_delay_ms = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_harness_options_conversion() {
        let mut config = AppConfig::default();
        config.demo.concurrency = 4;

        let options = config.to_harness_options();
        assert_eq!(options.calls, DEFAULT_DEMO_CALLS);
        assert_eq!(options.call_interval, Duration::from_millis(DEFAULT_CALL_INTERVAL_MS));
        assert_eq!(options.concurrency, 4);
    }
}
