use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{Dependency, DependencyError};

/// Dependency that fails at random and answers after a random delay
pub struct FlakyService {
    name: String,
    failure_rate: f64,
    min_delay: Duration,
    max_delay: Duration,
    invocations: AtomicU64,
}

impl FlakyService {
    /// `failure_rate` is clamped to `[0.0, 1.0]` and the delay bounds are
    /// swapped if given in the wrong order.
    pub fn new(name: impl Into<String>, failure_rate: f64, min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };

        Self {
            name: name.into(),
            failure_rate: if failure_rate.is_nan() { 0.0 } else { failure_rate.clamp(0.0, 1.0) },
            min_delay,
            max_delay,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }
}

#[async_trait]
impl Dependency for FlakyService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self) -> Result<String, DependencyError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let (delay, fails) = {
            let mut rng = rand::thread_rng();
            let min_ms = self.min_delay.as_millis() as u64;
            let max_ms = self.max_delay.as_millis() as u64;
            (
                Duration::from_millis(rng.gen_range(min_ms..=max_ms)),
                rng.gen_bool(self.failure_rate),
            )
        };

        tokio::time::sleep(delay).await;

        if fails {
            debug!(service = %self.name, ?delay, "Simulated failure");
            Err(DependencyError::Unavailable {
                service: self.name.clone(),
            })
        } else {
            Ok(format!("{} responded after {:?}", self.name, delay))
        }
    }

    fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}
