use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::CircuitBreakerConfig;
use super::errors::{CallError, ConfigError};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing, reject requests
    HalfOpen, // Testing if service recovered
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Why the gate refused a call
enum Rejection {
    Open { retry_in: Duration },
    ProbeLimit,
}

/// Mutable tracking state. Only ever touched while holding the breaker's lock.
#[derive(Debug)]
struct BreakerContext {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    probe_count: u32,
    response_times: Vec<Duration>,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    state_transitions: u64,
}

impl BreakerContext {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            probe_count: 0,
            response_times: Vec::new(),
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            state_transitions: 0,
        }
    }

    fn reset_counters(&mut self) {
        self.failure_count = 0;
        self.last_failure_time = None;
        self.probe_count = 0;
    }
}

/// Circuit breaker guarding one remote dependency.
///
/// All state lives behind a single mutex. The gate check and the probe
/// increment happen under one lock acquisition, and the lock is never held
/// while the protected operation runs, so concurrent callers can share one
/// breaker through an `Arc`.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    clock: C,
    context: Mutex<BreakerContext>,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Build a breaker reading time from `clock`. Fails if `config` does not validate.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            name: name.into(),
            config,
            clock,
            context: Mutex::new(BreakerContext::new()),
        })
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// The operation is only invoked when the gate admits the call. Exactly one
    /// response-time sample is appended per invocation of `call`, whatever the
    /// outcome.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = self.clock.now();

        if let Err(rejection) = self.admit(start) {
            return Err(self.rejection_error(rejection));
        }

        let result = operation().await;
        let finished = self.clock.now();
        let elapsed = finished.saturating_duration_since(start);

        match result {
            Ok(value) => {
                self.on_success(elapsed);
                debug!(breaker = %self.name, ?elapsed, "Operation succeeded");
                Ok(value)
            }
            Err(e) => {
                self.on_failure(finished, elapsed);
                debug!(breaker = %self.name, ?elapsed, "Operation failed");
                Err(CallError::Dependency(e))
            }
        }
    }

    /// Check if a call issued now would be admitted. Never changes state.
    pub fn can_execute(&self) -> bool {
        let ctx = self.lock();
        match ctx.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.remaining_cooldown(&ctx, self.clock.now()).is_none(),
            CircuitState::HalfOpen => ctx.probe_count < self.config.max_probe_requests,
        }
    }

    /// Get current circuit state
    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    /// Elapsed time of every call attempt, in completion order
    pub fn response_time_history(&self) -> Vec<Duration> {
        self.lock().response_times.clone()
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn probe_count(&self) -> u32 {
        self.lock().probe_count
    }

    /// Time since the last recorded failure, if one is on record
    pub fn last_failure_age(&self) -> Option<Duration> {
        let last_failure = self.lock().last_failure_time;
        last_failure.map(|at| self.clock.now().saturating_duration_since(at))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Clear failure count, last failure time and probe count.
    /// State and response-time history are left untouched.
    pub fn reset_counters(&self) {
        self.lock().reset_counters();
        debug!(breaker = %self.name, "Counters reset");
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let mut ctx = self.lock();
        if ctx.state != CircuitState::Closed {
            self.transition(&mut ctx, CircuitState::Closed);
        }
        ctx.reset_counters();
        info!(breaker = %self.name, "Circuit breaker has been reset");
    }

    /// Get failure statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        let ctx = self.lock();
        let now = self.clock.now();
        let average_response_time = average_duration(&ctx.response_times);

        CircuitBreakerStats {
            name: self.name.clone(),
            state: ctx.state,
            failure_count: ctx.failure_count,
            probe_count: ctx.probe_count,
            last_failure_age: ctx
                .last_failure_time
                .map(|at| now.saturating_duration_since(at)),
            total_calls: ctx.response_times.len() as u64,
            successful_calls: ctx.successful_calls,
            failed_calls: ctx.failed_calls,
            rejected_calls: ctx.rejected_calls,
            state_transitions: ctx.state_transitions,
            average_response_time,
            max_response_time: ctx.response_times.iter().max().copied().unwrap_or_default(),
            config: self.config.clone(),
        }
    }

    // Private methods

    fn lock(&self) -> MutexGuard<'_, BreakerContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate check. Decides, atomically with respect to other callers, whether
    /// this call may run. Rejections record their timing sample here.
    fn admit(&self, start: Instant) -> Result<(), Rejection> {
        let mut ctx = self.lock();

        if ctx.state == CircuitState::Open {
            match self.remaining_cooldown(&ctx, start) {
                Some(retry_in) => {
                    self.record_rejection(&mut ctx, start);
                    debug!(breaker = %self.name, ?retry_in, "Call rejected, circuit is OPEN");
                    return Err(Rejection::Open { retry_in });
                }
                // Cooldown elapsed: this same call is evaluated as a probe
                None => self.transition(&mut ctx, CircuitState::HalfOpen),
            }
        }

        if ctx.state == CircuitState::HalfOpen {
            if ctx.probe_count >= self.config.max_probe_requests {
                // Restart the cooldown so no new half-open episode begins
                // while the admitted probes are still in flight
                ctx.last_failure_time = Some(start);
                self.transition(&mut ctx, CircuitState::Open);
                self.record_rejection(&mut ctx, start);
                debug!(
                    breaker = %self.name,
                    max_probes = self.config.max_probe_requests,
                    "Call rejected, probe budget exhausted"
                );
                return Err(Rejection::ProbeLimit);
            }
            ctx.probe_count += 1;
            debug!(breaker = %self.name, probe = ctx.probe_count, "Admitting probe call");
        }

        Ok(())
    }

    /// Cooldown still to wait, or `None` once a probe may be attempted.
    /// An open breaker with no failure on record (counters reset by hand) is
    /// treated as cooled down.
    fn remaining_cooldown(&self, ctx: &BreakerContext, now: Instant) -> Option<Duration> {
        let last_failure = ctx.last_failure_time?;
        let waited = now.saturating_duration_since(last_failure);
        if waited >= self.config.cooldown {
            None
        } else {
            Some(self.config.cooldown - waited)
        }
    }

    fn record_rejection(&self, ctx: &mut BreakerContext, start: Instant) {
        let elapsed = self.clock.now().saturating_duration_since(start);
        ctx.response_times.push(elapsed);
        ctx.rejected_calls += 1;
    }

    fn rejection_error<E>(&self, rejection: Rejection) -> CallError<E> {
        match rejection {
            Rejection::Open { retry_in } => CallError::CircuitOpen {
                name: self.name.clone(),
                retry_in,
            },
            Rejection::ProbeLimit => CallError::ProbeLimitExceeded {
                name: self.name.clone(),
                max_probes: self.config.max_probe_requests,
            },
        }
    }

    fn on_success(&self, elapsed: Duration) {
        let mut ctx = self.lock();
        ctx.response_times.push(elapsed);
        ctx.successful_calls += 1;

        match ctx.state {
            CircuitState::Closed => ctx.reset_counters(),
            CircuitState::HalfOpen => self.transition(&mut ctx, CircuitState::Closed),
            CircuitState::Open => {
                // Another caller re-opened the circuit while this call was in flight
                debug!(breaker = %self.name, "Late success ignored, circuit is OPEN");
            }
        }
    }

    fn on_failure(&self, now: Instant, elapsed: Duration) {
        let mut ctx = self.lock();
        ctx.response_times.push(elapsed);
        ctx.failed_calls += 1;
        ctx.failure_count += 1;
        ctx.last_failure_time = Some(now);

        match ctx.state {
            CircuitState::Closed => {
                if ctx.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = ctx.failure_count,
                        "Circuit breaker tripped"
                    );
                    self.transition(&mut ctx, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                if self.config.reset_failures_on_reopen {
                    ctx.failure_count = 1;
                }
                warn!(breaker = %self.name, "Probe failed, circuit re-opening");
                self.transition(&mut ctx, CircuitState::Open);
            }
            CircuitState::Open => {
                debug!(
                    breaker = %self.name,
                    failures = ctx.failure_count,
                    "Late failure recorded, cooldown restarted"
                );
            }
        }
    }

    fn transition(&self, ctx: &mut BreakerContext, to: CircuitState) {
        let from = ctx.state;
        ctx.state = to;
        ctx.state_transitions += 1;

        match to {
            CircuitState::Closed => {
                ctx.reset_counters();
                info!(breaker = %self.name, %from, to = %to, "Circuit breaker closed");
            }
            CircuitState::HalfOpen => {
                ctx.probe_count = 0;
                info!(breaker = %self.name, %from, to = %to, "Circuit breaker testing recovery");
            }
            CircuitState::Open => {
                warn!(breaker = %self.name, %from, to = %to, "Circuit breaker opened");
            }
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &ctx.state)
            .field("failure_count", &ctx.failure_count)
            .field("probe_count", &ctx.probe_count)
            .finish()
    }
}

/// Mean of `samples`, zero when there are none
pub(crate) fn average_duration(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = samples.iter().map(Duration::as_nanos).sum();
    let mean = total / samples.len() as u128;
    Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX))
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub probe_count: u32,
    pub last_failure_age: Option<Duration>,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_transitions: u64,
    pub average_response_time: Duration,
    pub max_response_time: Duration,
    pub config: CircuitBreakerConfig,
}

/// Circuit breaker registry for managing one breaker per dependency
pub struct CircuitBreakerRegistry {
    breakers: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Existing breaker for `name`, or a new one built from `config`.
    /// The config is ignored when the breaker already exists.
    pub fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(breaker) = breakers.get(name) {
            if breaker.config() != &config {
                debug!(breaker = name, "Breaker already registered, keeping its original config");
            }
            Ok(Arc::clone(breaker))
        } else {
            let breaker = Arc::new(CircuitBreaker::new(name, config)?);
            breakers.insert(name.to_string(), Arc::clone(&breaker));
            Ok(breaker)
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<CircuitBreakerStats> = breakers.values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
