//! Capture configuration.
//!
//! Every knob the capture engine reads lives here. All types are serde
//! (de)serializable so a configuration can be loaded from a JSON file and
//! then refined with builder methods.

use crate::result::{CaptureError, CaptureResult};
use crate::timeline;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default capture end time
pub const DEFAULT_TARGET_MS: f64 = 4000.0;

/// Default interval between captures
pub const DEFAULT_INTERVAL_MS: f64 = 200.0;

/// Default cap for draining self-rescheduling frame callbacks
pub const DEFAULT_DRAIN_ITERATIONS: u32 = 16;

/// Smallest accepted positive capture interval; timestamps are whole ms
pub const MIN_INTERVAL_MS: f64 = 1.0;

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
    /// Device scale factor
    pub device_scale_factor: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
        }
    }
}

impl Viewport {
    /// Create a viewport with a scale factor of 1
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_scale_factor: 1.0,
        }
    }

    /// Parse `WIDTHxHEIGHT`
    pub fn parse(s: &str) -> CaptureResult<Self> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| CaptureError::config(format!("viewport '{s}' is not WIDTHxHEIGHT")))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| CaptureError::config(format!("invalid viewport width '{w}'")))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| CaptureError::config(format!("invalid viewport height '{h}'")))?;
        let viewport = Self::new(width, height);
        viewport.validate()?;
        Ok(viewport)
    }

    fn validate(&self) -> CaptureResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::config(format!(
                "viewport must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.device_scale_factor.is_finite() || self.device_scale_factor <= 0.0 {
            return Err(CaptureError::config(format!(
                "device scale factor must be positive, got {}",
                self.device_scale_factor
            )));
        }
        Ok(())
    }
}

/// Real-time bootstrap window granted before virtual time takes over
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Minimum real time to wait
    pub min_wait_ms: f64,
    /// Upper bound on the whole bootstrap wait
    pub max_wait_ms: f64,
    /// Frame ticks to observe before proceeding early
    pub min_ticks: u32,
    /// Tick counter polling interval
    pub poll_interval_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_wait_ms: 250.0,
            max_wait_ms: 3000.0,
            min_ticks: 5,
            poll_interval_ms: 16,
        }
    }
}

impl BootstrapConfig {
    /// Validate wait bounds
    pub fn validate(&self) -> CaptureResult<()> {
        if !self.min_wait_ms.is_finite() || self.min_wait_ms < 0.0 {
            return Err(CaptureError::config(format!(
                "bootstrap minimum wait must be a finite, non-negative number of ms, got {}",
                self.min_wait_ms
            )));
        }
        if !self.max_wait_ms.is_finite() || self.max_wait_ms < 0.0 {
            return Err(CaptureError::config(format!(
                "bootstrap maximum wait must be a finite, non-negative number of ms, got {}",
                self.max_wait_ms
            )));
        }
        if self.max_wait_ms < self.min_wait_ms {
            return Err(CaptureError::config(format!(
                "bootstrap maximum wait ({}ms) is smaller than the minimum wait ({}ms)",
                self.max_wait_ms, self.min_wait_ms
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(CaptureError::config("bootstrap poll interval must be > 0"));
        }
        Ok(())
    }
}

/// How pending frame callbacks are force-run after each clock step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameFlushMode {
    /// Leave pending callbacks alone
    Off,
    /// Run only the callbacks pending at call time
    Batch,
    /// Re-run newly scheduled callbacks until none remain or the cap is hit
    Drain {
        /// Maximum number of batches
        max_iterations: u32,
    },
}

impl Default for FrameFlushMode {
    fn default() -> Self {
        Self::Drain {
            max_iterations: DEFAULT_DRAIN_ITERATIONS,
        }
    }
}

impl FrameFlushMode {
    /// Batch cap passed to the page, `None` when flushing is off
    #[must_use]
    pub const fn iteration_cap(&self) -> Option<u32> {
        match self {
            Self::Off => None,
            Self::Batch => Some(1),
            Self::Drain { max_iterations } => Some(*max_iterations),
        }
    }
}

/// Browser channel to launch
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserChannel {
    /// Auto-detected Chromium
    #[default]
    Chromium,
    /// Branded Google Chrome (ships proprietary media codecs)
    Chrome,
    /// Explicit executable
    Executable(PathBuf),
}

impl BrowserChannel {
    /// Candidate executable names, most preferred first
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        match self {
            Self::Chromium => ["chromium", "chromium-browser", "google-chrome"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            Self::Chrome => ["google-chrome", "google-chrome-stable", "chrome"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            Self::Executable(path) => vec![path.clone()],
        }
    }
}

impl std::fmt::Display for BrowserChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chromium => write!(f, "chromium"),
            Self::Chrome => write!(f, "chrome"),
            Self::Executable(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Channel to launch
    pub channel: BrowserChannel,
    /// Extra command-line switches
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            channel: BrowserChannel::Chromium,
            args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Set the channel
    #[must_use]
    pub fn with_channel(mut self, channel: BrowserChannel) -> Self {
        self.channel = channel;
        self
    }

    /// Add a command-line switch
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Configuration for one capture run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture end time in ms
    pub target_ms: f64,
    /// Step interval in ms
    pub interval_ms: f64,
    /// Bootstrap window
    pub bootstrap: BootstrapConfig,
    /// Real time to sleep after synchronizing, before the snapshot
    pub settle_ms: u64,
    /// Viewport
    pub viewport: Viewport,
    /// Frame callback flushing
    pub frame_flush: FrameFlushMode,
    /// Make `performance.now()` report the capture timestamp
    pub override_performance_now: bool,
    /// Bound on media seek readiness
    pub media_timeout_ms: u64,
    /// Deadline for each environment round trip (navigation, clock step)
    pub step_timeout_ms: u64,
    /// Primary browser
    pub browser: BrowserConfig,
    /// Browser retried when a file has unsupported media
    pub fallback_channel: Option<BrowserChannel>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_ms: DEFAULT_TARGET_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
            bootstrap: BootstrapConfig::default(),
            settle_ms: 0,
            viewport: Viewport::default(),
            frame_flush: FrameFlushMode::default(),
            override_performance_now: true,
            media_timeout_ms: crate::wait::DEFAULT_MEDIA_TIMEOUT_MS,
            step_timeout_ms: crate::wait::DEFAULT_STEP_TIMEOUT_MS,
            browser: BrowserConfig::default(),
            fallback_channel: None,
        }
    }
}

impl CaptureConfig {
    /// Create default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: &std::path::Path) -> CaptureResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Set target time
    #[must_use]
    pub const fn with_target_ms(mut self, target_ms: f64) -> Self {
        self.target_ms = target_ms;
        self
    }

    /// Set interval
    #[must_use]
    pub const fn with_interval_ms(mut self, interval_ms: f64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set bootstrap window
    #[must_use]
    pub const fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Set settle delay
    #[must_use]
    pub const fn with_settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Set viewport
    #[must_use]
    pub const fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Set frame flush mode
    #[must_use]
    pub const fn with_frame_flush(mut self, mode: FrameFlushMode) -> Self {
        self.frame_flush = mode;
        self
    }

    /// Enable or disable the `performance.now()` override
    #[must_use]
    pub const fn with_performance_now_override(mut self, enabled: bool) -> Self {
        self.override_performance_now = enabled;
        self
    }

    /// Set media readiness timeout
    #[must_use]
    pub const fn with_media_timeout_ms(mut self, ms: u64) -> Self {
        self.media_timeout_ms = ms;
        self
    }

    /// Set step deadline
    #[must_use]
    pub const fn with_step_timeout_ms(mut self, ms: u64) -> Self {
        self.step_timeout_ms = ms;
        self
    }

    /// Set browser configuration
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserConfig) -> Self {
        self.browser = browser;
        self
    }

    /// Set fallback channel
    #[must_use]
    pub fn with_fallback_channel(mut self, channel: BrowserChannel) -> Self {
        self.fallback_channel = Some(channel);
        self
    }

    /// Capture end time floored and clamped to a non-negative integer
    #[must_use]
    pub fn target_ms_clamped(&self) -> u64 {
        timeline::clamp_target(self.target_ms)
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> CaptureResult<()> {
        if self.target_ms.is_nan() || self.target_ms < 0.0 {
            return Err(CaptureError::config(format!(
                "target time must be a non-negative number of ms, got {}",
                self.target_ms
            )));
        }
        if self.interval_ms.is_finite() && self.interval_ms > 0.0 {
            if self.interval_ms < MIN_INTERVAL_MS {
                return Err(CaptureError::config(format!(
                    "interval must be at least {MIN_INTERVAL_MS}ms, got {}",
                    self.interval_ms
                )));
            }
            let frames = timeline::len_bound(self.target_ms, self.interval_ms);
            if frames > timeline::MAX_TIMELINE_FRAMES {
                return Err(CaptureError::config(format!(
                    "{}ms every {}ms needs {frames} frames, the limit is {}",
                    self.target_ms,
                    self.interval_ms,
                    timeline::MAX_TIMELINE_FRAMES
                )));
            }
        }
        self.bootstrap.validate()?;
        self.viewport.validate()?;
        if let FrameFlushMode::Drain { max_iterations: 0 } = self.frame_flush {
            return Err(CaptureError::config(
                "frame callback drain needs at least one iteration",
            ));
        }
        if self.step_timeout_ms == 0 {
            return Err(CaptureError::config("step timeout must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod bootstrap_tests {
        use super::*;

        #[test]
        fn test_default_is_valid() {
            assert!(BootstrapConfig::default().validate().is_ok());
        }

        #[test]
        fn test_rejects_non_finite_bounds() {
            for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
                let min = BootstrapConfig {
                    min_wait_ms: bad,
                    ..BootstrapConfig::default()
                };
                assert!(min.validate().is_err(), "min {bad} accepted");

                let max = BootstrapConfig {
                    max_wait_ms: bad,
                    ..BootstrapConfig::default()
                };
                assert!(max.validate().is_err(), "max {bad} accepted");
            }
        }

        #[test]
        fn test_rejects_max_below_min() {
            let config = BootstrapConfig {
                min_wait_ms: 500.0,
                max_wait_ms: 499.0,
                ..BootstrapConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("smaller than the minimum"));
        }

        #[test]
        fn test_accepts_equal_bounds() {
            let config = BootstrapConfig {
                min_wait_ms: 500.0,
                max_wait_ms: 500.0,
                ..BootstrapConfig::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    mod viewport_tests {
        use super::*;

        #[test]
        fn test_parse() {
            let v = Viewport::parse("800x600").unwrap();
            assert_eq!((v.width, v.height), (800, 600));
            let v = Viewport::parse(" 1920 X 1080 ").unwrap();
            assert_eq!((v.width, v.height), (1920, 1080));
        }

        #[test]
        fn test_parse_rejects_garbage() {
            assert!(Viewport::parse("800").is_err());
            assert!(Viewport::parse("0x600").is_err());
            assert!(Viewport::parse("axb").is_err());
        }
    }

    mod capture_config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = CaptureConfig::default();
            assert_eq!(config.target_ms, 4000.0);
            assert_eq!(config.interval_ms, 200.0);
            assert_eq!(
                config.frame_flush,
                FrameFlushMode::Drain { max_iterations: 16 }
            );
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_rejects_negative_target() {
            let config = CaptureConfig::new().with_target_ms(-1.0);
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_rejects_zero_drain() {
            let config =
                CaptureConfig::new().with_frame_flush(FrameFlushMode::Drain { max_iterations: 0 });
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_degenerate_interval_is_accepted() {
            // A degenerate interval collapses the timeline to the target instead.
            for interval in [f64::NAN, 0.0, -5.0, f64::INFINITY] {
                let config = CaptureConfig::new().with_interval_ms(interval);
                assert!(config.validate().is_ok(), "interval {interval} rejected");
            }
        }

        #[test]
        fn test_rejects_sub_millisecond_interval() {
            for interval in [1e-9, 5e-324, 0.999] {
                let err = CaptureConfig::new()
                    .with_interval_ms(interval)
                    .validate()
                    .unwrap_err();
                assert!(err.to_string().contains("at least 1ms"), "{err}");
            }
            assert!(CaptureConfig::new().with_interval_ms(1.0).validate().is_ok());
        }

        #[test]
        fn test_rejects_oversized_timeline() {
            let err = CaptureConfig::new()
                .with_target_ms(1e15)
                .with_interval_ms(1.0)
                .validate()
                .unwrap_err();
            assert!(err.to_string().contains("the limit is 100000"), "{err}");
        }

        #[test]
        fn test_timeline_limit_boundary() {
            let cap = timeline::MAX_TIMELINE_FRAMES as f64;
            let at_cap = CaptureConfig::new()
                .with_target_ms(cap - 1.0)
                .with_interval_ms(1.0);
            assert_eq!(
                timeline::build(at_cap.target_ms, 1.0).len() as u64,
                timeline::MAX_TIMELINE_FRAMES
            );
            assert!(at_cap.validate().is_ok());

            let over = at_cap.with_target_ms(cap);
            assert!(over.validate().is_err());
        }

        #[test]
        fn test_json_round_trip_with_partial_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("capture.json");
            std::fs::write(
                &path,
                r#"{"target_ms": 1000, "frame_flush": {"mode": "batch"}}"#,
            )
            .unwrap();
            let config = CaptureConfig::from_json_file(&path).unwrap();
            assert_eq!(config.target_ms, 1000.0);
            assert_eq!(config.interval_ms, DEFAULT_INTERVAL_MS);
            assert_eq!(config.frame_flush, FrameFlushMode::Batch);
        }

        #[test]
        fn test_flush_caps() {
            assert_eq!(FrameFlushMode::Off.iteration_cap(), None);
            assert_eq!(FrameFlushMode::Batch.iteration_cap(), Some(1));
            assert_eq!(
                FrameFlushMode::Drain { max_iterations: 4 }.iteration_cap(),
                Some(4)
            );
        }
    }

    #[test]
    fn test_channel_candidates() {
        assert_eq!(
            BrowserChannel::Chrome.candidates()[0],
            PathBuf::from("google-chrome")
        );
        let exe = BrowserChannel::Executable(PathBuf::from("/opt/chrome/chrome"));
        assert_eq!(exe.candidates(), vec![PathBuf::from("/opt/chrome/chrome")]);
        assert_eq!(exe.to_string(), "/opt/chrome/chrome");
    }
}
