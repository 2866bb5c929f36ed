//! Animation and media state synchronization.
//!
//! Runs once per timeline entry after the clock reached it. Every step works
//! element by element on the page side and reports failures instead of
//! throwing, so one broken animation or media element never aborts the
//! snapshot. Elements with no playable source are collected and raised as
//! [`CaptureError::UnsupportedMedia`] once every step has run.

use crate::automation::{AutomationState, FrameFlushReport, TimelineSyncReport};
use crate::config::{CaptureConfig, FrameFlushMode};
use crate::driver::CaptureDriver;
use crate::result::{CaptureError, CaptureResult, MediaDiagnostic};
use crate::wait::{sleep_or_cancel, with_deadline, MEDIA_POLL_INTERVAL_MS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// `HTMLMediaElement.HAVE_CURRENT_DATA`
const HAVE_CURRENT_DATA: u8 = 2;

/// Media element state after the seek
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReport {
    /// Elements found
    pub elements: usize,
    /// Elements with a frame ready at the target
    pub ready: usize,
    /// Readiness polling hit `media_timeout_ms`
    pub timed_out: bool,
    /// Elements with no playable source
    pub unsupported: Vec<MediaDiagnostic>,
    /// Per-element seek failures
    pub failed: Vec<String>,
}

/// Everything one synchronization did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Timestamp synchronized to
    pub target_ms: u64,
    /// Declarative animations
    pub animations: TimelineSyncReport,
    /// Tracked library instances
    pub instances: TimelineSyncReport,
    /// Frame callback flush, `None` when flushing is off
    pub frame_flush: Option<FrameFlushReport>,
    /// Media elements
    pub media: MediaReport,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaSeek {
    index: usize,
    tag: String,
    #[serde(default)]
    sources: Vec<String>,
    error_code: Option<u16>,
    unsupported: bool,
    failed: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaStatus {
    index: usize,
    ready_state: u8,
    seeking: bool,
}

impl MediaStatus {
    const fn is_ready(&self) -> bool {
        self.ready_state >= HAVE_CURRENT_DATA && !self.seeking
    }
}

/// Drives the five synchronization steps for one context
#[derive(Debug)]
pub struct Synchronizer<'a> {
    config: &'a CaptureConfig,
    cancel: &'a CancellationToken,
}

impl<'a> Synchronizer<'a> {
    /// Create a synchronizer
    #[must_use]
    pub const fn new(config: &'a CaptureConfig, cancel: &'a CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Force all time-dependent page state to `target_ms`
    #[tracing::instrument(level = "debug", skip(self, driver, state))]
    pub async fn synchronize(
        &self,
        driver: &dyn CaptureDriver,
        state: &AutomationState,
        target_ms: u64,
    ) -> CaptureResult<SyncReport> {
        let mut report = SyncReport {
            target_ms,
            ..SyncReport::default()
        };

        if self.config.override_performance_now {
            self.call::<bool>(driver, state, "setTime", &target_ms.to_string())
                .await?;
        }

        report.animations = self
            .call(driver, state, "syncDeclarative", &target_ms.to_string())
            .await?;
        log_failures("declarative animation", &report.animations.failed);

        report.instances = self
            .call(driver, state, "syncLibraries", &target_ms.to_string())
            .await?;
        log_failures("library instance", &report.instances.failed);

        if let Some(cap) = self.config.frame_flush.iteration_cap() {
            let flush: FrameFlushReport = self
                .call(driver, state, "flushFrames", &format!("{target_ms}, {cap}"))
                .await?;
            log_failures("frame callback", &flush.failed);
            if flush.truncated && matches!(self.config.frame_flush, FrameFlushMode::Drain { .. }) {
                warn!(
                    target_ms,
                    iterations = flush.iterations,
                    pending = flush.pending,
                    "frame callbacks kept rescheduling; drain stopped at its iteration cap"
                );
            }
            report.frame_flush = Some(flush);
        }

        report.media = self.sync_media(driver, state, target_ms).await?;

        debug!(
            animations = report.animations.synced,
            instances = report.instances.synced,
            media = report.media.elements,
            "state synchronized"
        );

        if report.media.unsupported.is_empty() {
            Ok(report)
        } else {
            Err(CaptureError::UnsupportedMedia {
                diagnostics: report.media.unsupported,
            })
        }
    }

    async fn sync_media(
        &self,
        driver: &dyn CaptureDriver,
        state: &AutomationState,
        target_ms: u64,
    ) -> CaptureResult<MediaReport> {
        let seeks: Vec<MediaSeek> = self
            .call(driver, state, "seekMedia", &target_ms.to_string())
            .await?;

        let mut report = MediaReport {
            elements: seeks.len(),
            ..MediaReport::default()
        };
        let mut waiting = Vec::new();
        for seek in seeks {
            if seek.unsupported {
                report.unsupported.push(MediaDiagnostic {
                    index: seek.index,
                    tag: seek.tag,
                    sources: seek.sources,
                    error_code: seek.error_code,
                });
            } else if let Some(message) = seek.failed {
                report.failed.push(format!("{} #{}: {message}", seek.tag, seek.index));
            } else {
                waiting.push(seek.index);
            }
        }
        log_failures("media element", &report.failed);
        for diagnostic in &report.unsupported {
            warn!(%diagnostic, "media element has no playable source");
        }

        if waiting.is_empty() {
            return Ok(report);
        }

        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.media_timeout_ms);
        loop {
            let statuses: Vec<MediaStatus> = self.call(driver, state, "mediaStatus", "").await?;
            report.ready = statuses
                .iter()
                .filter(|s| waiting.contains(&s.index) && s.is_ready())
                .count();
            if report.ready >= waiting.len() {
                return Ok(report);
            }
            if start.elapsed() >= timeout {
                warn!(
                    ready = report.ready,
                    expected = waiting.len(),
                    timeout_ms = self.config.media_timeout_ms,
                    "media elements not ready at target; capturing anyway"
                );
                report.timed_out = true;
                return Ok(report);
            }
            sleep_or_cancel(
                Duration::from_millis(MEDIA_POLL_INTERVAL_MS),
                self.cancel,
                "media readiness",
            )
            .await?;
        }
    }

    /// Invoke a runtime method under the step deadline; `null` decodes as default
    async fn call<T: DeserializeOwned + Default>(
        &self,
        driver: &dyn CaptureDriver,
        state: &AutomationState,
        method: &str,
        args: &str,
    ) -> CaptureResult<T> {
        let value: Option<T> = with_deadline(
            state.invoke(driver, method, args),
            self.config.step_timeout_ms,
            self.cancel,
            method,
        )
        .await?;
        Ok(value.unwrap_or_default())
    }
}

fn log_failures(kind: &str, failures: &[String]) {
    for failure in failures {
        warn!(kind, failure = %failure, "synchronization skipped an element");
    }
}
