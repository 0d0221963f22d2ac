use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{Dependency, DependencyError};
use crate::stability::MockClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// One programmed response of a [`ScriptedService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    outcome: Outcome,
    delay: Duration,
}

impl Step {
    pub fn succeed() -> Self {
        Self {
            outcome: Outcome::Success,
            delay: Duration::ZERO,
        }
    }

    pub fn fail() -> Self {
        Self {
            outcome: Outcome::Failure,
            delay: Duration::ZERO,
        }
    }

    /// Settle only after `delay`
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Deterministic dependency replaying a programmed sequence of outcomes.
///
/// Once the script runs out every call uses the fallback step. With a
/// [`MockClock`] attached, delays advance that clock instead of sleeping.
pub struct ScriptedService {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    clock: Option<MockClock>,
    invocations: AtomicU64,
}

impl ScriptedService {
    pub fn new(name: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            name: name.into(),
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: Step::succeed(),
            clock: None,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: Step) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_clock(mut self, clock: MockClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Append more steps to the end of the script
    pub fn push(&self, step: Step) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[async_trait]
impl Dependency for ScriptedService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self) -> Result<String, DependencyError> {
        let call = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.next_step();

        if !step.delay.is_zero() {
            match &self.clock {
                Some(clock) => clock.advance(step.delay),
                None => tokio::time::sleep(step.delay).await,
            }
        }

        match step.outcome {
            Outcome::Success => Ok(format!("{} call {}", self.name, call)),
            Outcome::Failure => Err(DependencyError::Scripted {
                message: format!("{} call {} failed", self.name, call),
            }),
        }
    }

    fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }
}
