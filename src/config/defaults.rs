/// Default configuration constants for circuit-guard

// Breaker defaults
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;
pub const DEFAULT_MAX_PROBE_REQUESTS: u32 = 1;

// Demo harness defaults
pub const DEFAULT_DEMO_CALLS: u32 = 20;
pub const DEFAULT_CALL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_FAILURE_RATE: f64 = 0.5;
pub const DEFAULT_MIN_DELAY_MS: u64 = 10;
pub const DEFAULT_MAX_DELAY_MS: u64 = 200;
pub const DEFAULT_CONCURRENCY: u32 = 1;

// Logging
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const SUPPORTED_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// Files
pub const APP_DIR_NAME: &str = "circuit-guard";
pub const CONFIG_FILENAME: &str = "config.toml";
pub const DEMO_SERVICE_NAME: &str = "flaky-service";
