pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod errors;

pub use circuit_breaker::{
    CircuitBreaker,
    CircuitBreakerRegistry,
    CircuitBreakerStats,
    CircuitState
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::CircuitBreakerConfig;
pub use errors::{CallError, ConfigError};
