//! Capture orchestration.
//!
//! Sequences one capture per input file against a shared browser process:
//!
//! ```text
//! Created ─► ContextOpened ─► Bootstrapped ─► Advancing(i) ─► Synchronized(i) ─► Captured(i)
//!                                                  ▲                                  │
//!                                                  └────────────── i + 1 ─────────────┤
//!                                                                                    ▼
//!                                                             ContextClosed ◄─ Done
//! ```
//!
//! `Failed` is reachable from every non-terminal state. A failure is recorded
//! against its file and the batch moves on; the context is closed either way.
//! Frames are buffered and written only once the whole file succeeded: each
//! PNG is staged beside its target and renamed into place, and a file whose
//! frames would land on paths another file of the run already wrote fails
//! before capture.

use crate::automation::AutomationState;
use crate::browser::file_url;
use crate::clock::VirtualClockSession;
use crate::config::CaptureConfig;
use crate::driver::{BrowserLauncher, CaptureBrowser, CaptureDriver};
use crate::patches::PatchRegistry;
use crate::resolve::prepare_output_dir;
use crate::result::{CaptureError, CaptureResult};
use crate::sync::Synchronizer;
use crate::timeline::{CaptureTimeline, FrameCapture};
use crate::wait::{bootstrap, sleep_or_cancel, with_deadline};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Capture lifecycle for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    /// Request constructed
    Created,
    /// Browser context open
    ContextOpened,
    /// Real-time warm-up finished
    Bootstrapped,
    /// Clock advancing to step `i`
    Advancing(usize),
    /// Page state forced to step `i`
    Synchronized(usize),
    /// Snapshot `i` taken
    Captured(usize),
    /// Every step captured
    Done,
    /// Context disposed after success
    ContextClosed,
    /// Capture failed
    Failed(String),
}

impl CaptureState {
    /// No transition leaves this state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ContextClosed | Self::Failed(_))
    }

    fn allows(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Failed(_) | Self::ContextClosed, _) => false,
            (_, Self::Failed(_)) => true,
            (Self::Created, Self::ContextOpened)
            | (Self::ContextOpened, Self::Bootstrapped)
            | (Self::Bootstrapped, Self::Advancing(0))
            | (Self::Done, Self::ContextClosed) => true,
            (Self::Advancing(i), Self::Synchronized(j))
            | (Self::Synchronized(i), Self::Captured(j)) => i == j,
            (Self::Captured(i), Self::Advancing(j)) => *j == i + 1,
            (Self::Captured(_), Self::Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::ContextOpened => write!(f, "context-opened"),
            Self::Bootstrapped => write!(f, "bootstrapped"),
            Self::Advancing(i) => write!(f, "advancing({i})"),
            Self::Synchronized(i) => write!(f, "synchronized({i})"),
            Self::Captured(i) => write!(f, "captured({i})"),
            Self::Done => write!(f, "done"),
            Self::ContextClosed => write!(f, "context-closed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Validated state holder
#[derive(Debug, Clone)]
pub struct CaptureMachine {
    state: CaptureState,
    history: Vec<CaptureState>,
}

impl Default for CaptureMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureMachine {
    /// Machine in `Created`
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CaptureState::Created,
            history: vec![CaptureState::Created],
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Every state visited, in order
    #[must_use]
    pub fn history(&self) -> &[CaptureState] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: CaptureState) -> CaptureResult<()> {
        if !self.state.allows(&next) {
            return Err(CaptureError::invalid_state(format!(
                "cannot go from {} to {next}",
                self.state
            )));
        }
        debug!(from = %self.state, to = %next, "capture state");
        self.history.push(next.clone());
        self.state = next;
        Ok(())
    }

    /// Record a failure unless already terminal
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            let next = CaptureState::Failed(reason.into());
            self.history.push(next.clone());
            self.state = next;
        }
    }
}

// =============================================================================
// REQUESTS AND REPORTS
// =============================================================================

/// One input document and the frames it will produce
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    source: PathBuf,
    timeline: CaptureTimeline,
    frames: Vec<FrameCapture>,
}

impl CaptureRequest {
    /// Build the request for `source` under `config`
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, config: &CaptureConfig, output_dir: &Path) -> Self {
        let source = source.into();
        let timeline = CaptureTimeline::new(config.target_ms, config.interval_ms);
        let frames = timeline.frames(&source, output_dir);
        Self {
            source,
            timeline,
            frames,
        }
    }

    /// Input document
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Timestamps to visit
    #[must_use]
    pub const fn timeline(&self) -> &CaptureTimeline {
        &self.timeline
    }

    /// Output frames, one per timeline entry
    #[must_use]
    pub fn frames(&self) -> &[FrameCapture] {
        &self.frames
    }
}

/// Result of capturing one file
#[derive(Debug)]
pub struct FileOutcome {
    /// Input document
    pub source: PathBuf,
    /// Channel that produced the frames (or failed last)
    pub channel: Option<String>,
    /// Frames written
    pub frames: Vec<FrameCapture>,
    /// Whether the fallback channel was used
    pub used_fallback: bool,
    /// Wall-clock time spent
    pub duration: Duration,
    /// Failure, if any
    pub error: Option<CaptureError>,
}

impl FileOutcome {
    /// Whether every frame was written
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate of a batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One entry per input, in input order
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    /// Every file captured
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::succeeded)
    }

    /// Failed files with their errors
    #[must_use]
    pub fn failures(&self) -> Vec<(&Path, &CaptureError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| (o.source.as_path(), e)))
            .collect()
    }

    /// Total frames written
    #[must_use]
    pub fn frames_written(&self) -> usize {
        self.outcomes.iter().map(|o| o.frames.len()).sum()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Runs captures for a batch of files
#[derive(Debug)]
pub struct Orchestrator<L> {
    launcher: L,
    config: CaptureConfig,
    output_dir: PathBuf,
    registry: PatchRegistry,
    cancel: CancellationToken,
}

impl<L: BrowserLauncher> Orchestrator<L> {
    /// Create an orchestrator writing into `output_dir`
    pub fn new(launcher: L, config: CaptureConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            config,
            output_dir: output_dir.into(),
            registry: PatchRegistry::builtin(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a custom adapter registry
    #[must_use]
    pub fn with_registry(mut self, registry: PatchRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share a cancellation token with the caller
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture every file in `sources`, in order
    ///
    /// Returns `Err` only for failures that abort the run (invalid
    /// configuration, output directory, browser launch). Per-file failures
    /// are recorded in the report.
    pub async fn run(&self, sources: &[PathBuf]) -> CaptureResult<BatchReport> {
        self.config.validate()?;
        prepare_output_dir(&self.output_dir)?;

        let mut primary = self.launcher.launch(&self.config.browser).await?;
        let mut fallback: Option<Box<dyn CaptureBrowser>> = None;
        let mut report = BatchReport::default();
        // frame path -> input that wrote it
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

        for source in sources {
            let request = CaptureRequest::new(source, &self.config, &self.output_dir);
            let started = Instant::now();

            let skipped = if self.cancel.is_cancelled() {
                Some(CaptureError::Cancelled {
                    operation: "capture".to_string(),
                })
            } else {
                request.frames().iter().find_map(|frame| {
                    claimed.get(&frame.path).map(|owner| CaptureError::OutputConflict {
                        path: frame.path.clone(),
                        owner: owner.clone(),
                    })
                })
            };
            if let Some(err) = skipped {
                warn!(source = %source.display(), error = %err, "capture skipped");
                report.outcomes.push(FileOutcome {
                    source: source.clone(),
                    channel: None,
                    frames: Vec::new(),
                    used_fallback: false,
                    duration: Duration::ZERO,
                    error: Some(err),
                });
                continue;
            }

            let mut channel = primary.channel();
            let mut used_fallback = false;
            let mut result = self.capture_file(primary.as_ref(), &request).await;

            if let Err(err) = &result {
                if err.wants_fallback() {
                    if let Some(browser) = self.fallback_browser(&mut fallback).await {
                        warn!(
                            source = %source.display(),
                            fallback = %browser.channel(),
                            error = %err,
                            "retrying on fallback channel"
                        );
                        channel = browser.channel();
                        used_fallback = true;
                        result = self.capture_file(browser, &request).await;
                    }
                }
            }

            let outcome = match result {
                Ok(frames) => {
                    info!(
                        source = %source.display(),
                        frames = frames.len(),
                        channel = %channel,
                        "captured"
                    );
                    for frame in &frames {
                        claimed.insert(frame.path.clone(), source.clone());
                    }
                    FileOutcome {
                        source: source.clone(),
                        channel: Some(channel),
                        frames,
                        used_fallback,
                        duration: started.elapsed(),
                        error: None,
                    }
                }
                Err(err) => {
                    error!(source = %source.display(), error = %err, "capture failed");
                    FileOutcome {
                        source: source.clone(),
                        channel: Some(channel),
                        frames: Vec::new(),
                        used_fallback,
                        duration: started.elapsed(),
                        error: Some(err),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        if let Err(e) = primary.close().await {
            warn!(error = %e, "browser did not close cleanly");
        }
        if let Some(mut browser) = fallback {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "fallback browser did not close cleanly");
            }
        }
        Ok(report)
    }

    async fn fallback_browser<'b>(
        &self,
        slot: &'b mut Option<Box<dyn CaptureBrowser>>,
    ) -> Option<&'b dyn CaptureBrowser> {
        let channel = self.config.fallback_channel.clone()?;
        if slot.is_none() {
            let config = self.config.browser.clone().with_channel(channel);
            match self.launcher.launch(&config).await {
                Ok(browser) => *slot = Some(browser),
                Err(e) => {
                    warn!(error = %e, "fallback browser unavailable");
                    return None;
                }
            }
        }
        slot.as_deref()
    }

    /// Capture one file in a fresh context, closing it on every path
    #[tracing::instrument(skip(self, browser, request), fields(source = %request.source().display(), channel = %browser.channel()))]
    pub async fn capture_file(
        &self,
        browser: &dyn CaptureBrowser,
        request: &CaptureRequest,
    ) -> CaptureResult<Vec<FrameCapture>> {
        let step = self.config.step_timeout_ms;
        let mut machine = CaptureMachine::new();
        let mut driver = with_deadline(
            browser.open_context(self.config.viewport),
            step,
            &self.cancel,
            "open context",
        )
        .await?;
        machine.transition(CaptureState::ContextOpened)?;

        let result = self.drive(driver.as_mut(), &mut machine, request).await;
        let closed = with_deadline(driver.close(), step, &self.cancel, "close context").await;

        match result {
            Ok(frames) => {
                closed?;
                machine.transition(CaptureState::ContextClosed)?;
                Ok(frames)
            }
            Err(err) => {
                machine.fail(err.to_string());
                if let Err(e) = closed {
                    warn!(error = %e, "context did not close cleanly");
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        driver: &mut dyn CaptureDriver,
        machine: &mut CaptureMachine,
        request: &CaptureRequest,
    ) -> CaptureResult<Vec<FrameCapture>> {
        let step = self.config.step_timeout_ms;
        let cancel = &self.cancel;

        let mut state = AutomationState::new();
        with_deadline(state.install_runtime(driver), step, cancel, "runtime injection").await?;
        with_deadline(
            self.registry.install(driver, &mut state),
            step,
            cancel,
            "patch injection",
        )
        .await?;

        let url = file_url(request.source())?;
        with_deadline(driver.navigate(&url), step, cancel, "navigation").await?;

        let warm = bootstrap(driver, &mut state, &self.config.bootstrap, cancel).await?;
        with_deadline(state.stop_heartbeat(driver), step, cancel, "bootstrap").await?;
        machine.transition(CaptureState::Bootstrapped)?;
        let runtime = state.report(driver).await?;
        debug!(
            ticks = warm.ticks,
            satisfied = warm.satisfied,
            adapters = ?runtime.adapters,
            instances = runtime.instances,
            "bootstrapped"
        );

        let mut clock = VirtualClockSession::new(request.timeline().target(), step, cancel.clone());
        clock.freeze(driver).await?;
        let synchronizer = Synchronizer::new(&self.config, cancel);
        let settle = Duration::from_millis(self.config.settle_ms);

        let mut shots = Vec::with_capacity(request.frames().len());
        for (i, frame) in request.frames().iter().enumerate() {
            machine.transition(CaptureState::Advancing(i))?;
            clock.advance_to(driver, frame.timestamp_ms).await?;
            if !settle.is_zero() {
                sleep_or_cancel(settle, cancel, "settle").await?;
            }

            synchronizer
                .synchronize(driver, &state, frame.timestamp_ms)
                .await?;
            machine.transition(CaptureState::Synchronized(i))?;

            let png = with_deadline(driver.screenshot(), step, cancel, "screenshot").await?;
            shots.push(png);
            machine.transition(CaptureState::Captured(i))?;
        }
        machine.transition(CaptureState::Done)?;

        write_frames(request.frames(), &shots).await?;
        Ok(request.frames().to_vec())
    }
}

/// Sibling path a frame is staged at before it is renamed into place
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Write every frame or none of them
async fn write_frames(frames: &[FrameCapture], shots: &[Vec<u8>]) -> CaptureResult<()> {
    let staged: Vec<PathBuf> = frames.iter().map(|f| staging_path(&f.path)).collect();

    for (i, (path, png)) in staged.iter().zip(shots).enumerate() {
        if let Err(e) = tokio::fs::write(path, png).await {
            discard(&staged[..=i]).await;
            return Err(e.into());
        }
    }

    for (i, (frame, path)) in frames.iter().zip(&staged).enumerate() {
        if let Err(e) = tokio::fs::rename(path, &frame.path).await {
            let placed: Vec<PathBuf> = frames[..i].iter().map(|f| f.path.clone()).collect();
            discard(&placed).await;
            discard(&staged[i..]).await;
            return Err(e.into());
        }
    }
    Ok(())
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not remove partial frame");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{BootstrapConfig, BrowserChannel};
    use crate::driver::{MockLauncher, MockScript};
    use serde_json::json;

    fn quick_config() -> CaptureConfig {
        CaptureConfig::default()
            .with_target_ms(450.0)
            .with_interval_ms(200.0)
            .with_bootstrap(BootstrapConfig {
                min_wait_ms: 0.0,
                max_wait_ms: 0.0,
                min_ticks: 0,
                poll_interval_ms: 1,
            })
    }

    fn healthy() -> MockScript {
        MockScript::new().answer("readTicks", json!(10))
    }

    fn unsupported_video() -> MockScript {
        healthy().answer(
            "seekMedia",
            json!([{
                "index": 0, "tag": "VIDEO", "sources": ["clip.mp4"], "errorCode": 4,
                "unsupported": true, "target": null, "failed": null
            }]),
        )
    }

    fn inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                std::fs::write(&p, "<html><body></body></html>").unwrap();
                p
            })
            .collect()
    }

    fn count(history: &[String], prefix: &str) -> usize {
        history.iter().filter(|c| c.starts_with(prefix)).count()
    }

    mod machine_tests {
        use super::*;

        #[test]
        fn test_happy_path() {
            let mut m = CaptureMachine::new();
            for next in [
                CaptureState::ContextOpened,
                CaptureState::Bootstrapped,
                CaptureState::Advancing(0),
                CaptureState::Synchronized(0),
                CaptureState::Captured(0),
                CaptureState::Advancing(1),
                CaptureState::Synchronized(1),
                CaptureState::Captured(1),
                CaptureState::Done,
                CaptureState::ContextClosed,
            ] {
                m.transition(next).unwrap();
            }
            assert!(m.state().is_terminal());
            assert_eq!(m.history().len(), 11);
        }

        #[test]
        fn test_sync_requires_advance_of_same_step() {
            let mut m = CaptureMachine::new();
            m.transition(CaptureState::ContextOpened).unwrap();
            m.transition(CaptureState::Bootstrapped).unwrap();
            assert!(m.transition(CaptureState::Synchronized(0)).is_err());
            m.transition(CaptureState::Advancing(0)).unwrap();
            assert!(m.transition(CaptureState::Synchronized(1)).is_err());
            assert!(m.transition(CaptureState::Captured(0)).is_err());
        }

        #[test]
        fn test_steps_cannot_skip() {
            let mut m = CaptureMachine::new();
            m.transition(CaptureState::ContextOpened).unwrap();
            m.transition(CaptureState::Bootstrapped).unwrap();
            m.transition(CaptureState::Advancing(0)).unwrap();
            m.transition(CaptureState::Synchronized(0)).unwrap();
            m.transition(CaptureState::Captured(0)).unwrap();
            assert!(m.transition(CaptureState::Advancing(2)).is_err());
            assert!(m.transition(CaptureState::ContextClosed).is_err());
        }

        #[test]
        fn test_failed_is_terminal() {
            let mut m = CaptureMachine::new();
            m.transition(CaptureState::ContextOpened).unwrap();
            m.fail("navigation failed");
            assert!(m.state().is_terminal());
            assert!(m.transition(CaptureState::Bootstrapped).is_err());
            m.fail("again");
            assert_eq!(
                m.state(),
                &CaptureState::Failed("navigation failed".to_string())
            );
        }
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_request_frames() {
            let request = CaptureRequest::new("in/wave.html", &quick_config(), Path::new("out"));
            assert_eq!(request.timeline().stamps(), [0, 200, 400, 450]);
            assert_eq!(request.frames()[3].file_name(), "wave-450ms.png");
            assert_eq!(request.source(), Path::new("in/wave.html"));
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_captures_every_step() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["wave.html"]);
            let launcher = MockLauncher::new().with_channel("chromium", healthy());
            let log = launcher.log();

            let report = Orchestrator::new(launcher, quick_config(), &out)
                .run(&sources)
                .await
                .unwrap();

            assert!(report.is_success());
            assert_eq!(report.frames_written(), 4);
            for name in ["wave-000ms.png", "wave-200ms.png", "wave-400ms.png", "wave-450ms.png"] {
                let bytes = std::fs::read(out.join(name)).unwrap();
                assert!(image::load_from_memory(&bytes).is_ok());
            }

            let history = log.lock().unwrap().clone();
            assert_eq!(count(&history, "virtual_time"), 4);
            assert_eq!(count(&history, "screenshot"), 4);
            assert_eq!(count(&history, "close@"), 1);
            assert_eq!(count(&history, "close_browser"), 1);

            let first_budget = history.iter().position(|c| c.starts_with("virtual_time:200")).unwrap();
            let navigate = history.iter().position(|c| c.starts_with("navigate:file://")).unwrap();
            let runtime = history.iter().position(|c| c.starts_with("init_script")).unwrap();
            let heartbeat = history
                .iter()
                .position(|c| c.starts_with("evaluate:stopHeartbeat"))
                .unwrap();
            let freeze = history.iter().position(|c| c.starts_with("virtual_time:0")).unwrap();
            assert!(runtime < navigate && navigate < first_budget);
            assert!(heartbeat < freeze);
        }

        #[tokio::test]
        async fn test_each_file_gets_its_own_context() {
            let dir = tempfile::tempdir().unwrap();
            let sources = inputs(dir.path(), &["a.html", "b.html"]);
            let launcher = MockLauncher::new().with_channel("chromium", healthy());
            let log = launcher.log();

            let report = Orchestrator::new(launcher, quick_config(), dir.path().join("out"))
                .run(&sources)
                .await
                .unwrap();
            assert!(report.is_success());

            let history = log.lock().unwrap().clone();
            assert_eq!(count(&history, "open_context"), 2);
            assert!(history.iter().any(|c| c == "close@1"));
            assert!(history.iter().any(|c| c == "close@2"));
            assert_eq!(count(&history, "launch"), 1);
        }

        #[tokio::test]
        async fn test_failure_is_recorded_and_batch_continues() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let mut sources = inputs(dir.path(), &["good.html"]);
            sources.insert(0, dir.path().join("vanished.html"));
            let launcher = MockLauncher::new().with_channel("chromium", healthy());
            let log = launcher.log();

            let report = Orchestrator::new(launcher, quick_config(), &out)
                .run(&sources)
                .await
                .unwrap();

            assert!(!report.is_success());
            let failures = report.failures();
            assert_eq!(failures.len(), 1);
            assert!(failures[0].0.ends_with("vanished.html"));
            assert!(report.outcomes[1].succeeded());
            assert!(out.join("good-450ms.png").exists());
            assert!(!out.join("vanished-000ms.png").exists());

            let history = log.lock().unwrap().clone();
            assert!(history.iter().any(|c| c == "close@1"));
        }

        #[tokio::test]
        async fn test_evaluation_failure_leaves_no_frames() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["broken.html"]);
            let script = healthy().fail("syncDeclarative", "document detached");
            let launcher = MockLauncher::new().with_channel("chromium", script);

            let report = Orchestrator::new(launcher, quick_config(), &out)
                .run(&sources)
                .await
                .unwrap();

            assert!(!report.is_success());
            assert!(std::fs::read_dir(&out).unwrap().next().is_none());
        }

        #[tokio::test]
        async fn test_launch_failure_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let sources = inputs(dir.path(), &["a.html"]);
            let err = Orchestrator::new(MockLauncher::new().failing(), quick_config(), dir.path())
                .run(&sources)
                .await
                .unwrap_err();
            assert!(err.is_fatal());
            assert!(err.to_string().contains("libnss3"));
        }

        #[tokio::test]
        async fn test_invalid_config_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = quick_config();
            config.bootstrap.max_wait_ms = f64::NAN;
            let launcher = MockLauncher::new();
            let log = launcher.log();
            let err = Orchestrator::new(launcher, config, dir.path())
                .run(&[])
                .await
                .unwrap_err();
            assert!(matches!(err, CaptureError::InvalidConfig { .. }));
            assert!(log.lock().unwrap().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_hung_budget_hits_step_deadline() {
            let dir = tempfile::tempdir().unwrap();
            let sources = inputs(dir.path(), &["stuck.html"]);
            let launcher =
                MockLauncher::new().with_channel("chromium", healthy().hang_virtual_time());
            let config = quick_config().with_step_timeout_ms(1_000);

            let report = Orchestrator::new(launcher, config, dir.path().join("out"))
                .run(&sources)
                .await
                .unwrap();

            let failures = report.failures();
            assert!(matches!(failures[0].1, CaptureError::Timeout { ms: 1_000, .. }));
        }

        #[tokio::test]
        async fn test_cancelled_batch_reports_remaining() {
            let dir = tempfile::tempdir().unwrap();
            let sources = inputs(dir.path(), &["a.html", "b.html"]);
            let cancel = CancellationToken::new();
            cancel.cancel();

            let report = Orchestrator::new(
                MockLauncher::new().with_channel("chromium", healthy()),
                quick_config(),
                dir.path().join("out"),
            )
            .with_cancellation(cancel)
            .run(&sources)
            .await
            .unwrap();

            assert_eq!(report.failures().len(), 2);
            assert!(report
                .failures()
                .iter()
                .all(|(_, e)| matches!(e, CaptureError::Cancelled { .. })));
        }
    }

    mod output_tests {
        use super::*;
        use crate::driver::{CallLog, MockBrowser};

        #[tokio::test]
        async fn test_colliding_output_paths_fail_the_later_file() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["demo.html", "demo.htm"]);
            let launcher = MockLauncher::new().with_channel("chromium", healthy());
            let log = launcher.log();
            let config = quick_config().with_target_ms(200.0);

            let report = Orchestrator::new(launcher, config, &out)
                .run(&sources)
                .await
                .unwrap();

            assert!(report.outcomes[0].succeeded());
            let failures = report.failures();
            assert_eq!(failures.len(), 1);
            assert!(failures[0].0.ends_with("demo.htm"));
            match failures[0].1 {
                CaptureError::OutputConflict { path, owner } => {
                    assert!(path.ends_with("demo-000ms.png"));
                    assert!(owner.ends_with("demo.html"));
                }
                other => panic!("expected an output conflict, got {other}"),
            }
            assert_eq!(report.frames_written(), 2);
            assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);

            // the conflicting file never reached a browser context
            let history = log.lock().unwrap().clone();
            assert_eq!(count(&history, "open_context"), 1);
        }

        #[tokio::test]
        async fn test_rerun_replaces_previous_frames() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["wave.html"]);
            std::fs::create_dir_all(&out).unwrap();
            std::fs::write(out.join("wave-000ms.png"), b"stale").unwrap();

            let report = Orchestrator::new(
                MockLauncher::new().with_channel("chromium", healthy()),
                quick_config(),
                &out,
            )
            .run(&sources)
            .await
            .unwrap();

            assert!(report.is_success());
            let bytes = std::fs::read(out.join("wave-000ms.png")).unwrap();
            assert!(image::load_from_memory(&bytes).is_ok());
        }

        #[tokio::test]
        async fn test_failed_write_leaves_no_frames() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["wave.html"]);
            // the last frame cannot be renamed onto a directory
            std::fs::create_dir_all(out.join("wave-450ms.png")).unwrap();

            let report = Orchestrator::new(
                MockLauncher::new().with_channel("chromium", healthy()),
                quick_config(),
                &out,
            )
            .run(&sources)
            .await
            .unwrap();

            let failures = report.failures();
            assert_eq!(failures.len(), 1);
            assert!(matches!(failures[0].1, CaptureError::Io(_)));
            let left: Vec<String> = std::fs::read_dir(&out)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(left, vec!["wave-450ms.png".to_string()]);
            assert!(out.join("wave-450ms.png").is_dir());
        }

        #[test]
        fn test_staging_path_is_a_sibling() {
            assert_eq!(
                staging_path(Path::new("out/wave-450ms.png")),
                PathBuf::from("out/wave-450ms.png.part")
            );
        }

        #[tokio::test]
        async fn test_context_open_failure_is_per_file() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["a.html", "b.html"]);
            let launcher = MockLauncher::new()
                .with_channel("chromium", healthy())
                .with_failing_context(1);
            let log = launcher.log();

            let report = Orchestrator::new(launcher, quick_config(), &out)
                .run(&sources)
                .await
                .unwrap();

            let failures = report.failures();
            assert_eq!(failures.len(), 1);
            assert!(failures[0].0.ends_with("a.html"));
            assert!(matches!(failures[0].1, CaptureError::Page { .. }));
            assert!(report.outcomes[1].succeeded());
            assert!(out.join("b-450ms.png").exists());
            assert!(!out.join("a-000ms.png").exists());

            let history = log.lock().unwrap().clone();
            assert_eq!(count(&history, "open_context_failed"), 1);
            assert_eq!(count(&history, "open_context:"), 1);
            assert_eq!(count(&history, "close@"), 1);
        }

        #[tokio::test]
        async fn test_capture_file_without_context_runs_nothing() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["a.html"]);
            let log = CallLog::default();
            let browser = MockBrowser::new("chromium", healthy(), log.clone()).failing_contexts();
            let orchestrator = Orchestrator::new(MockLauncher::new(), quick_config(), &out);
            let request = CaptureRequest::new(sources[0].clone(), orchestrator.config(), &out);

            let err = orchestrator
                .capture_file(&browser, &request)
                .await
                .unwrap_err();

            assert!(err.to_string().contains("mock context creation failed"));
            assert_eq!(browser.contexts_opened(), 0);
            let history = log.lock().unwrap().clone();
            assert_eq!(history, vec!["open_context_failed:chromium#1".to_string()]);
        }
    }

    mod fallback_tests {
        use super::*;

        #[tokio::test]
        async fn test_unsupported_media_retries_on_fallback() {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out");
            let sources = inputs(dir.path(), &["video.html", "plain.html"]);
            let launcher = MockLauncher::new()
                .with_channel("chromium", unsupported_video())
                .with_channel("chrome", healthy());
            let log = launcher.log();
            let config = quick_config().with_fallback_channel(BrowserChannel::Chrome);

            let report = Orchestrator::new(launcher, config, &out)
                .run(&sources)
                .await
                .unwrap();

            assert!(report.is_success());
            assert!(report.outcomes.iter().all(|o| o.used_fallback));
            assert!(report.outcomes.iter().all(FileOutcome::succeeded));
            assert_eq!(report.outcomes[0].channel.as_deref(), Some("chrome"));

            let history = log.lock().unwrap().clone();
            assert_eq!(count(&history, "launch:chrome"), 1);
            assert_eq!(count(&history, "close_browser"), 2);
        }

        #[tokio::test]
        async fn test_without_fallback_unsupported_media_fails() {
            let dir = tempfile::tempdir().unwrap();
            let sources = inputs(dir.path(), &["video.html"]);
            let launcher = MockLauncher::new().with_channel("chromium", unsupported_video());

            let report = Orchestrator::new(launcher, quick_config(), dir.path().join("out"))
                .run(&sources)
                .await
                .unwrap();

            let failures = report.failures();
            assert_eq!(failures.len(), 1);
            let message = failures[0].1.to_string();
            assert!(message.contains("clip.mp4"));
            assert!(message.contains("MediaError code 4"));
            assert!(!report.outcomes[0].used_fallback);
        }
    }
}
