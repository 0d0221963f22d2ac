//! Stand-ins for a remote dependency and the driver that compares latency
//! with and without a circuit breaker in front of it.

pub mod flaky;
pub mod harness;
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;

pub use flaky::FlakyService;
pub use harness::{DemoReport, Harness, HarnessOptions, LatencySummary};
pub use scripted::{ScriptedService, Step};

/// Errors raised by simulated dependencies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Service {service} is unavailable")]
    Unavailable { service: String },

    #[error("Scripted failure: {message}")]
    Scripted { message: String },
}

/// A remote operation that either returns a payload or fails
#[async_trait]
pub trait Dependency: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self) -> Result<String, DependencyError>;

    /// Number of times `invoke` has been entered
    fn invocations(&self) -> u64;
}
