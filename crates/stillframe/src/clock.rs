//! Virtual clock control.
//!
//! After bootstrap the page clock is frozen. Each advance grants a virtual
//! time budget and waits for the browser to report the budget as spent, so
//! timers, declarative animations and layout observe exactly the granted
//! amount. The session tracks how much time has been consumed and refuses to
//! run past the target.

use crate::driver::CaptureDriver;
use crate::result::{CaptureError, CaptureResult};
use crate::wait::with_deadline;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Clock state for one capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    /// Page runs in real time (bootstrap)
    RealTime,
    /// Virtual time frozen, budget available
    Frozen,
    /// Target reached
    Exhausted,
}

/// Virtual time consumed toward a target
#[derive(Debug, Clone)]
pub struct VirtualClockSession {
    target_ms: u64,
    consumed_ms: u64,
    frozen: bool,
    step_timeout_ms: u64,
    cancel: CancellationToken,
}

impl VirtualClockSession {
    /// New session in real time; [`Self::freeze`] starts virtual time
    #[must_use]
    pub fn new(target_ms: u64, step_timeout_ms: u64, cancel: CancellationToken) -> Self {
        Self {
            target_ms,
            consumed_ms: 0,
            frozen: false,
            step_timeout_ms,
            cancel,
        }
    }

    /// Final virtual time
    #[must_use]
    pub const fn target_ms(&self) -> u64 {
        self.target_ms
    }

    /// Virtual time consumed so far
    #[must_use]
    pub const fn consumed_ms(&self) -> u64 {
        self.consumed_ms
    }

    /// Virtual time left before the target
    #[must_use]
    pub const fn remaining_ms(&self) -> u64 {
        self.target_ms.saturating_sub(self.consumed_ms)
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ClockState {
        if !self.frozen {
            ClockState::RealTime
        } else if self.consumed_ms >= self.target_ms {
            ClockState::Exhausted
        } else {
            ClockState::Frozen
        }
    }

    /// Freeze the page clock with a zero budget
    pub async fn freeze(&mut self, driver: &mut dyn CaptureDriver) -> CaptureResult<()> {
        if self.frozen {
            return Ok(());
        }
        with_deadline(
            driver.run_virtual_time_budget(0),
            self.step_timeout_ms,
            &self.cancel,
            "virtual time freeze",
        )
        .await?;
        self.frozen = true;
        Ok(())
    }

    /// Grant `delta_ms` of virtual time
    ///
    /// A zero delta is a no-op. Advancing past the target is an error and
    /// grants nothing.
    pub async fn advance(&mut self, driver: &mut dyn CaptureDriver, delta_ms: u64) -> CaptureResult<()> {
        if delta_ms == 0 {
            return Ok(());
        }
        if !self.frozen {
            return Err(CaptureError::invalid_state(
                "virtual clock advanced before it was frozen",
            ));
        }
        let next = self.consumed_ms.saturating_add(delta_ms);
        if next > self.target_ms {
            return Err(CaptureError::invalid_state(format!(
                "advancing {delta_ms}ms from {}ms would pass the {}ms target",
                self.consumed_ms, self.target_ms
            )));
        }

        with_deadline(
            driver.run_virtual_time_budget(delta_ms),
            self.step_timeout_ms,
            &self.cancel,
            "virtual time budget",
        )
        .await?;
        self.consumed_ms = next;
        trace!(consumed_ms = next, delta_ms, "virtual time advanced");
        Ok(())
    }

    /// Advance until `consumed == timestamp_ms`
    pub async fn advance_to(&mut self, driver: &mut dyn CaptureDriver, timestamp_ms: u64) -> CaptureResult<()> {
        if timestamp_ms < self.consumed_ms {
            return Err(CaptureError::invalid_state(format!(
                "virtual clock cannot move back from {}ms to {timestamp_ms}ms",
                self.consumed_ms
            )));
        }
        self.advance(driver, timestamp_ms - self.consumed_ms).await
    }
}
