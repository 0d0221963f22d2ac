use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use super::Dependency;
use crate::stability::circuit_breaker::average_duration;
use crate::stability::{CircuitBreaker, CircuitBreakerStats, CircuitState, Clock};

/// How the harness drives a dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessOptions {
    pub calls: u32,
    pub call_interval: Duration,
    /// Logical callers sharing the breaker during the guarded run
    pub concurrency: u32,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            calls: 20,
            call_interval: Duration::from_millis(200),
            concurrency: 1,
        }
    }
}

/// Outcome counts and latency for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub average: Duration,
    pub max: Duration,
}

impl LatencySummary {
    fn from_samples(samples: &[Duration], successes: u64, failures: u64, rejections: u64) -> Self {
        Self {
            calls: samples.len() as u64,
            successes,
            failures,
            rejections,
            average: average_duration(samples),
            max: samples.iter().max().copied().unwrap_or_default(),
        }
    }
}

/// Side-by-side latency of the unprotected and protected runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoReport {
    pub generated_at: DateTime<Utc>,
    pub options: HarnessOptions,
    pub direct: LatencySummary,
    pub guarded: LatencySummary,
    pub final_state: CircuitState,
    pub breaker: CircuitBreakerStats,
}

impl DemoReport {
    /// How much lower the guarded average was than the direct one
    pub fn average_saved(&self) -> Duration {
        self.direct.average.saturating_sub(self.guarded.average)
    }

    pub fn log_summary(&self) {
        info!(
            "Direct  - {} calls, {} ok, {} failed, avg {:?}, max {:?}",
            self.direct.calls, self.direct.successes, self.direct.failures, self.direct.average, self.direct.max
        );
        info!(
            "Guarded - {} calls, {} ok, {} failed, {} rejected, avg {:?}, max {:?}",
            self.guarded.calls,
            self.guarded.successes,
            self.guarded.failures,
            self.guarded.rejections,
            self.guarded.average,
            self.guarded.max
        );
        info!(
            "Breaker '{}' finished {} after {} transition(s), avg saved {:?}",
            self.breaker.name,
            self.final_state,
            self.breaker.state_transitions,
            self.average_saved()
        );
    }
}

#[derive(Default)]
struct Tally {
    successes: AtomicU32,
    failures: AtomicU32,
    rejections: AtomicU32,
}

impl Tally {
    fn summary(&self, samples: &[Duration]) -> LatencySummary {
        LatencySummary::from_samples(
            samples,
            self.successes.load(Ordering::Relaxed) as u64,
            self.failures.load(Ordering::Relaxed) as u64,
            self.rejections.load(Ordering::Relaxed) as u64,
        )
    }
}

/// Repeatedly calls a dependency and averages the response times
pub struct Harness {
    options: HarnessOptions,
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    /// Call the dependency with no protection, sequentially
    pub async fn run_direct(&self, dependency: &dyn Dependency) -> LatencySummary {
        let tally = Tally::default();
        let mut samples = Vec::with_capacity(self.options.calls as usize);

        for attempt in 0..self.options.calls {
            if attempt > 0 {
                tokio::time::sleep(self.options.call_interval).await;
            }

            let start = Instant::now();
            let result = dependency.invoke().await;
            samples.push(start.elapsed());

            match result {
                Ok(_) => tally.successes.fetch_add(1, Ordering::Relaxed),
                Err(_) => tally.failures.fetch_add(1, Ordering::Relaxed),
            };
        }

        tally.summary(&samples)
    }

    /// Call the dependency through `breaker`, spreading the calls over the
    /// configured number of logical callers. Latencies come from the samples
    /// the breaker appended during this run.
    pub async fn run_guarded<C: Clock>(
        &self,
        dependency: &dyn Dependency,
        breaker: &CircuitBreaker<C>,
    ) -> LatencySummary {
        let tally = Tally::default();
        let remaining = AtomicU32::new(self.options.calls);
        let history_before = breaker.response_time_history().len();
        let first_call = Mutex::new(true);

        let (tally_ref, remaining, first_call) = (&tally, &remaining, &first_call);
        let workers = (0..self.options.concurrency.max(1)).map(|_| async move {
            loop {
                let claimed = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if !claimed {
                    break;
                }

                let is_first = {
                    let mut first = first_call.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    std::mem::replace(&mut *first, false)
                };
                if !is_first {
                    tokio::time::sleep(self.options.call_interval).await;
                }

                match breaker.call(|| dependency.invoke()).await {
                    Ok(_) => tally_ref.successes.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.is_rejection() => tally_ref.rejections.fetch_add(1, Ordering::Relaxed),
                    Err(_) => tally_ref.failures.fetch_add(1, Ordering::Relaxed),
                };
            }
        });
        join_all(workers).await;

        let history = breaker.response_time_history();
        tally.summary(&history[history_before.min(history.len())..])
    }

    /// Run both passes and build the comparison report
    pub async fn compare<C: Clock>(
        &self,
        direct: &dyn Dependency,
        guarded: &dyn Dependency,
        breaker: &CircuitBreaker<C>,
    ) -> DemoReport {
        info!("Running {} direct call(s) against '{}'", self.options.calls, direct.name());
        let direct_summary = self.run_direct(direct).await;

        info!(
            "Running {} guarded call(s) against '{}' with {} caller(s)",
            self.options.calls,
            guarded.name(),
            self.options.concurrency.max(1)
        );
        let guarded_summary = self.run_guarded(guarded, breaker).await;

        DemoReport {
            generated_at: Utc::now(),
            options: self.options.clone(),
            direct: direct_summary,
            guarded: guarded_summary,
            final_state: breaker.current_state(),
            breaker: breaker.stats(),
        }
    }
}
