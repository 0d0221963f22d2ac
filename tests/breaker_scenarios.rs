use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use circuit_guard::{
    CallError,
    CircuitBreaker,
    CircuitBreakerConfig,
    CircuitState,
    Dependency,
    DependencyError,
    MockClock,
    ScriptedService,
    Step,
};

fn mock_breaker(threshold: u32, cooldown: Duration, probes: u32) -> Result<(Arc<CircuitBreaker<MockClock>>, MockClock)> {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::new(threshold, cooldown, probes)?;
    let breaker = Arc::new(CircuitBreaker::with_clock("downstream", config, clock.clone())?);
    Ok((breaker, clock))
}

/// State transitions driven by a scripted dependency
#[cfg(test)]
mod transition_tests {
    use super::*;

    #[tokio::test]
    async fn test_trip_reject_recover_scenario() -> Result<()> {
        let (breaker, clock) = mock_breaker(3, Duration::from_millis(1000), 1)?;
        let service = ScriptedService::new(
            "downstream",
            [Step::fail(), Step::fail(), Step::fail(), Step::succeed()],
        );

        for _ in 0..3 {
            let err = breaker.call(|| service.invoke()).await.unwrap_err();
            assert!(matches!(err, CallError::Dependency(DependencyError::Scripted { .. })));
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);

        // Call 4: rejected, dependency untouched
        let err = breaker.call(|| service.invoke()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(service.invocations(), 3);

        // Call 5: cooldown elapsed, Open -> HalfOpen -> Closed
        clock.advance(Duration::from_millis(1000));
        let response = breaker.call(|| service.invoke()).await?;
        assert_eq!(response, "downstream call 4");

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.response_time_history().len(), 5);
        assert_eq!(breaker.stats().state_transitions, 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_below_threshold_never_trips() -> Result<()> {
        for threshold in 2..6 {
            let (breaker, _) = mock_breaker(threshold, Duration::from_secs(5), 1)?;
            let service = ScriptedService::new("downstream", []).with_fallback(Step::fail());

            for _ in 0..threshold - 1 {
                let _ = breaker.call(|| service.invoke()).await;
                assert_eq!(breaker.current_state(), CircuitState::Closed);
            }

            let _ = breaker.call(|| service.invoke()).await;
            assert_eq!(breaker.current_state(), CircuitState::Open);
            assert_eq!(service.invocations(), threshold as u64);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_probe_failure_reopens_and_restarts_cooldown() -> Result<()> {
        let (breaker, clock) = mock_breaker(1, Duration::from_millis(500), 1)?;
        let service = ScriptedService::new("downstream", [Step::fail(), Step::fail(), Step::succeed()]);

        breaker.call(|| service.invoke()).await.unwrap_err();
        clock.advance(Duration::from_millis(500));

        let err = breaker.call(|| service.invoke()).await.unwrap_err();
        assert!(!err.is_rejection());
        assert_eq!(breaker.current_state(), CircuitState::Open);

        clock.advance(Duration::from_millis(499));
        assert!(breaker.call(|| service.invoke()).await.unwrap_err().is_circuit_open());

        clock.advance(Duration::from_millis(1));
        breaker.call(|| service.invoke()).await?;
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(service.invocations(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_history_counts_every_attempt() -> Result<()> {
        let (breaker, clock) = mock_breaker(2, Duration::from_millis(100), 1)?;
        let service = ScriptedService::new("downstream", [])
            .with_fallback(Step::fail().after(Duration::from_millis(30)))
            .with_clock(clock.clone());

        let mut attempts = 0;
        for round in 0..12 {
            let _ = breaker.call(|| service.invoke()).await;
            attempts += 1;
            if round % 4 == 3 {
                clock.advance(Duration::from_millis(100));
            }
        }

        let history = breaker.response_time_history();
        assert_eq!(history.len(), attempts);
        assert!(history.iter().all(|d| *d == Duration::ZERO || *d == Duration::from_millis(30)));

        let stats = breaker.stats();
        assert_eq!(
            stats.successful_calls + stats.failed_calls + stats.rejected_calls,
            attempts as u64
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_dependency_error_passes_through_untouched() -> Result<()> {
        let (breaker, _) = mock_breaker(3, Duration::from_secs(1), 1)?;

        let err = breaker
            .call(|| async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")) })
            .await
            .unwrap_err();

        let inner = err.into_dependency().expect("dependency error");
        assert_eq!(inner.kind(), std::io::ErrorKind::TimedOut);
        assert_eq!(inner.to_string(), "slow");

        Ok(())
    }
}

/// Shared breaker under concurrent callers
#[cfg(test)]
mod concurrency_tests {
    use super::*;

    async fn open_and_cool_down(breaker: &CircuitBreaker<MockClock>, clock: &MockClock, cooldown: Duration) {
        let _ = breaker.call(|| async { Err::<(), _>("down") }).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
        clock.advance(cooldown);
    }

    #[tokio::test]
    async fn test_probe_budget_exhausted_while_probes_pending() -> Result<()> {
        let cooldown = Duration::from_secs(1);
        let (breaker, clock) = mock_breaker(1, cooldown, 2)?;
        open_and_cool_down(&breaker, &clock, cooldown).await;

        let release = Arc::new(Semaphore::new(0));
        let invoked = Arc::new(AtomicU32::new(0));

        let mut probes = Vec::new();
        for _ in 0..2 {
            let (breaker, release, invoked) = (breaker.clone(), release.clone(), invoked.clone());
            probes.push(tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        let _permit = release.acquire().await;
                        Ok::<_, String>(())
                    })
                    .await
            }));
        }

        while breaker.probe_count() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        let extra = invoked.clone();
        let err = breaker
            .call(|| async move {
                extra.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_probe_limit_exceeded());
        assert_eq!(invoked.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.current_state(), CircuitState::Open);

        // The forced re-open restarted the cooldown, so no new probe episode begins
        let extra = invoked.clone();
        let err = breaker
            .call(|| async move {
                extra.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 2);

        release.add_permits(2);
        for probe in probes {
            probe.await??;
        }

        // Probe successes arriving after the forced re-open do not close the breaker
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert_eq!(breaker.response_time_history().len(), 5);

        Ok(())
    }

    #[tokio::test]
    async fn test_hung_probe_keeps_later_callers_out() -> Result<()> {
        let cooldown = Duration::from_secs(1);
        let (breaker, clock) = mock_breaker(1, cooldown, 1)?;
        open_and_cool_down(&breaker, &clock, cooldown).await;

        let release = Arc::new(Semaphore::new(0));
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut callers = Vec::new();
        for started in 1..=6u64 {
            let (b, release, task_in_flight, peak) =
                (breaker.clone(), release.clone(), in_flight.clone(), peak.clone());
            callers.push(tokio::spawn(async move {
                b.call(|| async move {
                    let now = task_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let _permit = release.acquire().await;
                    task_in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await
            }));

            // Each caller is either parked inside the operation or turned away before the next starts
            while breaker.stats().rejected_calls + u64::from(in_flight.load(Ordering::SeqCst)) < started {
                tokio::task::yield_now().await;
            }
        }
        release.add_permits(6);

        let mut probe_limited = 0;
        let mut open_rejections = 0;
        for caller in callers {
            match caller.await? {
                Ok(()) => {}
                Err(err) if err.is_probe_limit_exceeded() => probe_limited += 1,
                Err(err) if err.is_circuit_open() => open_rejections += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(probe_limited, 1);
        assert_eq!(open_rejections, 4);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_probes_respect_budget() -> Result<()> {
        let cooldown = Duration::from_millis(200);
        let (breaker, clock) = mock_breaker(1, cooldown, 2)?;
        open_and_cool_down(&breaker, &clock, cooldown).await;

        let release = Arc::new(Semaphore::new(0));
        let invoked = Arc::new(AtomicU32::new(0));
        let start = Arc::new(tokio::sync::Barrier::new(3));

        let mut callers = Vec::new();
        for _ in 0..3 {
            let (breaker, release, invoked, start) =
                (breaker.clone(), release.clone(), invoked.clone(), start.clone());
            callers.push(tokio::spawn(async move {
                start.wait().await;
                breaker
                    .call(|| async move {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        let _permit = release.acquire().await;
                        Ok::<_, String>(())
                    })
                    .await
            }));
        }

        // Two callers are parked inside the operation, the third was turned away
        while breaker.stats().rejected_calls + u64::from(invoked.load(Ordering::SeqCst)) < 3 {
            tokio::task::yield_now().await;
        }
        release.add_permits(3);

        let mut rejected = 0;
        for caller in callers {
            if let Err(err) = caller.await? {
                assert!(err.is_probe_limit_exceeded());
                rejected += 1;
            }
        }

        assert_eq!(invoked.load(Ordering::SeqCst), 2);
        assert_eq!(rejected, 1);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_trip_once() -> Result<()> {
        let (breaker, _) = mock_breaker(5, Duration::from_secs(60), 1)?;

        let mut callers = Vec::new();
        for _ in 0..32 {
            let breaker = breaker.clone();
            callers.push(tokio::spawn(async move {
                breaker.call(|| async { Err::<(), _>("down") }).await
            }));
        }
        for caller in callers {
            assert!(caller.await?.is_err());
        }

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.state_transitions, 1);
        assert_eq!(stats.total_calls, 32);
        assert_eq!(stats.failed_calls + stats.rejected_calls, 32);
        assert!(stats.failed_calls >= 5);

        Ok(())
    }
}
