//! Real-time waits: bootstrap, deadlines and cancellation.
//!
//! Before the clock is frozen the page runs in real time so that late
//! initialisation (fonts, image decodes, library setup) can finish. The
//! bootstrap waiter polls the frame-tick counter until both a minimum real
//! duration and a minimum tick count are reached, or the maximum elapses.
//! Reaching the maximum is a soft timeout: capture proceeds with a warning.

use crate::automation::AutomationState;
use crate::config::BootstrapConfig;
use crate::driver::CaptureDriver;
use crate::result::{CaptureError, CaptureResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default deadline for any single browser round-trip (30 seconds)
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Default media readiness timeout (5 seconds)
pub const DEFAULT_MEDIA_TIMEOUT_MS: u64 = 5_000;

/// Media readiness polling interval
pub const MEDIA_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// BOOTSTRAP
// =============================================================================

/// Result of the bootstrap wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Frame ticks observed
    pub ticks: u64,
    /// Real time spent waiting
    pub elapsed: Duration,
    /// Both minimums were met before the maximum
    pub satisfied: bool,
}

/// Wait for the page to warm up in real time
///
/// Returns once at least `min_wait_ms` has elapsed and `min_ticks` frames
/// have been observed, or once `max_wait_ms` has elapsed.
pub async fn bootstrap(
    driver: &dyn CaptureDriver,
    state: &mut AutomationState,
    config: &BootstrapConfig,
    cancel: &CancellationToken,
) -> CaptureResult<BootstrapOutcome> {
    let start = Instant::now();
    let min_wait = millis(config.min_wait_ms);
    let max_wait = millis(config.max_wait_ms).max(min_wait);
    let poll = Duration::from_millis(config.poll_interval_ms.max(1));

    loop {
        let ticks = state.read_ticks(driver).await?;
        let elapsed = start.elapsed();

        if elapsed >= min_wait && ticks >= u64::from(config.min_ticks) {
            debug!(ticks, elapsed_ms = elapsed.as_millis() as u64, "bootstrap satisfied");
            return Ok(BootstrapOutcome {
                ticks,
                elapsed,
                satisfied: true,
            });
        }
        if elapsed >= max_wait {
            warn!(
                ticks,
                min_ticks = config.min_ticks,
                elapsed_ms = elapsed.as_millis() as u64,
                "bootstrap reached its maximum wait before enough frames ticked; capturing anyway"
            );
            return Ok(BootstrapOutcome {
                ticks,
                elapsed,
                satisfied: false,
            });
        }

        let remaining = max_wait.saturating_sub(elapsed);
        sleep_or_cancel(poll.min(remaining), cancel, "bootstrap").await?;
    }
}

fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

// =============================================================================
// DEADLINES
// =============================================================================

/// Sleep in real time unless cancelled first
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
    operation: &str,
) -> CaptureResult<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CaptureError::Cancelled {
            operation: operation.to_string(),
        }),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Bound `future` by `timeout_ms` and the cancellation token
///
/// A `timeout_ms` of zero disables the deadline but not cancellation.
pub async fn with_deadline<F, T>(
    future: F,
    timeout_ms: u64,
    cancel: &CancellationToken,
    operation: &str,
) -> CaptureResult<T>
where
    F: Future<Output = CaptureResult<T>>,
{
    let bounded = async {
        if timeout_ms == 0 {
            return future.await;
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms), future).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout {
                operation: operation.to_string(),
                ms: timeout_ms,
            }),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CaptureError::Cancelled {
            operation: operation.to_string(),
        }),
        result = bounded => result,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockScript};
    use serde_json::json;

    fn config(min: f64, max: f64, ticks: u32) -> BootstrapConfig {
        BootstrapConfig {
            min_wait_ms: min,
            max_wait_ms: max,
            min_ticks: ticks,
            poll_interval_ms: 10,
        }
    }

    mod bootstrap_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_waits_for_minimum_duration() {
            let driver = MockDriver::new(MockScript::new().answer("readTicks", json!(100)));
            let mut state = AutomationState::new();
            let outcome = bootstrap(
                &driver,
                &mut state,
                &config(250.0, 3000.0, 5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            assert!(outcome.satisfied);
            assert!(outcome.elapsed >= Duration::from_millis(250));
            assert!(outcome.elapsed < Duration::from_millis(300));
        }

        #[tokio::test(start_paused = true)]
        async fn test_waits_for_ticks() {
            let ticks: Vec<_> = (0..40).map(|i| json!(i)).collect();
            let driver = MockDriver::new(MockScript::new().answer_sequence("readTicks", ticks));
            let mut state = AutomationState::new();
            let outcome = bootstrap(
                &driver,
                &mut state,
                &config(0.0, 3000.0, 20),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            assert!(outcome.satisfied);
            assert_eq!(outcome.ticks, 20);
            assert_eq!(state.ticks_observed(), 20);
        }

        #[tokio::test(start_paused = true)]
        async fn test_soft_timeout_without_ticks() {
            let driver = MockDriver::new(MockScript::new().answer("readTicks", json!(0)));
            let mut state = AutomationState::new();
            let outcome = bootstrap(
                &driver,
                &mut state,
                &config(10.0, 200.0, 5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            assert!(!outcome.satisfied);
            assert_eq!(outcome.ticks, 0);
            assert!(outcome.elapsed >= Duration::from_millis(200));
        }

        #[tokio::test(start_paused = true)]
        async fn test_zero_minimums_return_immediately() {
            let driver = MockDriver::new(MockScript::new().answer("readTicks", json!(0)));
            let mut state = AutomationState::new();
            let outcome = bootstrap(
                &driver,
                &mut state,
                &config(0.0, 0.0, 0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            assert!(outcome.satisfied);
            assert_eq!(driver.history().len(), 1);
        }

        #[tokio::test]
        async fn test_cancelled() {
            let driver = MockDriver::new(MockScript::new().answer("readTicks", json!(0)));
            let mut state = AutomationState::new();
            let cancel = CancellationToken::new();
            cancel.cancel();
            let err = bootstrap(&driver, &mut state, &config(0.0, 3000.0, 5), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, CaptureError::Cancelled { .. }));
        }

        #[tokio::test]
        async fn test_evaluation_failure_propagates() {
            let driver = MockDriver::new(MockScript::new().fail("readTicks", "page crashed"));
            let mut state = AutomationState::new();
            let err = bootstrap(
                &driver,
                &mut state,
                &config(0.0, 100.0, 1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
            assert!(err.to_string().contains("page crashed"));
        }
    }

    mod deadline_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_times_out() {
            let err = with_deadline(
                futures::future::pending::<CaptureResult<()>>(),
                500,
                &CancellationToken::new(),
                "virtual time budget",
            )
            .await
            .unwrap_err();
            assert_eq!(err.to_string(), "virtual time budget timed out after 500ms");
        }

        #[tokio::test]
        async fn test_passes_through() {
            let value = with_deadline(
                async { Ok::<_, CaptureError>(7) },
                0,
                &CancellationToken::new(),
                "noop",
            )
            .await
            .unwrap();
            assert_eq!(value, 7);
        }

        #[tokio::test]
        async fn test_cancel_wins_over_pending_work() {
            let cancel = CancellationToken::new();
            cancel.cancel();
            let err = with_deadline(
                futures::future::pending::<CaptureResult<()>>(),
                0,
                &cancel,
                "navigation",
            )
            .await
            .unwrap_err();
            assert_eq!(err.to_string(), "navigation cancelled");
        }

        #[tokio::test(start_paused = true)]
        async fn test_sleep_or_cancel() {
            let cancel = CancellationToken::new();
            sleep_or_cancel(Duration::from_millis(50), &cancel, "settle")
                .await
                .unwrap();
            cancel.cancel();
            assert!(sleep_or_cancel(Duration::from_secs(60), &cancel, "settle")
                .await
                .is_err());
        }
    }
}
