pub mod config;
pub mod simulation;
pub mod stability;

// Re-export commonly used types
pub use config::AppConfig;
pub use simulation::{Dependency, DependencyError, DemoReport, FlakyService, Harness, HarnessOptions, ScriptedService, Step};
pub use stability::{
    CallError,
    CircuitBreaker,
    CircuitBreakerConfig,
    CircuitBreakerRegistry,
    CircuitBreakerStats,
    CircuitState,
    Clock,
    ConfigError,
    MockClock,
    SystemClock,
};
