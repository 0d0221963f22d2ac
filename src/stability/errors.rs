use std::time::Duration;
use thiserror::Error;

/// Failure of a call made through a circuit breaker.
///
/// `CircuitOpen` and `ProbeLimitExceeded` are produced by the breaker itself and
/// mean the protected operation was never invoked. `Dependency` carries the
/// operation's own error untouched.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("Circuit breaker '{name}' is OPEN, retry in {retry_in:?}")]
    CircuitOpen { name: String, retry_in: Duration },

    #[error("Circuit breaker '{name}' is HALF-OPEN and all {max_probes} probe(s) are in use")]
    ProbeLimitExceeded { name: String, max_probes: u32 },

    #[error("{0}")]
    Dependency(E),
}

impl<E> CallError<E> {
    /// True when the breaker rejected the call without running the operation
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CallError::Dependency(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    pub fn is_probe_limit_exceeded(&self) -> bool {
        matches!(self, CallError::ProbeLimitExceeded { .. })
    }

    /// The dependency's error, if this was one
    pub fn into_dependency(self) -> Option<E> {
        match self {
            CallError::Dependency(e) => Some(e),
            _ => None,
        }
    }

    pub fn dependency(&self) -> Option<&E> {
        match self {
            CallError::Dependency(e) => Some(e),
            _ => None,
        }
    }
}

/// Construction-time validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidConfiguration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
