//! CLI command definitions using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use stillframe::{
    BootstrapConfig, BrowserChannel, CaptureConfig, CaptureResult, FrameFlushMode, Viewport,
    DEFAULT_DRAIN_ITERATIONS,
};

/// Stillframe: deterministic virtual-time snapshots of HTML animations
///
/// Captures one PNG per interval of virtual time for every selected document,
/// from 0 up to and including the target time.
#[derive(Parser, Debug)]
#[command(name = "stillframe")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// File name or quoted glob (`*`, `?`) inside the input directory
    #[arg(value_name = "FILE")]
    pub files: Vec<String>,

    /// Directory holding the documents
    #[arg(short, long, default_value = ".")]
    pub input_dir: PathBuf,

    /// Directory receiving the PNG frames
    #[arg(short, long, default_value = "frames")]
    pub output_dir: PathBuf,

    /// JSON capture configuration; explicit flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Capture end time in ms
    #[arg(short, long, value_name = "MS")]
    pub target: Option<f64>,

    /// Interval between captures in ms
    #[arg(long, value_name = "MS")]
    pub interval: Option<f64>,

    /// Minimum real-time warm-up before freezing the clock
    #[arg(long, value_name = "MS")]
    pub bootstrap_min: Option<f64>,

    /// Maximum real-time warm-up before freezing the clock
    #[arg(long, value_name = "MS")]
    pub bootstrap_max: Option<f64>,

    /// Frame callbacks to observe during warm-up
    #[arg(long, value_name = "N")]
    pub min_ticks: Option<u32>,

    /// Real-time delay between synchronizing and the snapshot
    #[arg(long, value_name = "MS")]
    pub settle: Option<u64>,

    /// Viewport size, e.g. 1280x720
    #[arg(long, value_name = "WxH")]
    pub viewport: Option<String>,

    /// Frame callback flushing after each clock step
    #[arg(long, value_enum)]
    pub flush: Option<FlushArg>,

    /// Cap for `--flush drain`
    #[arg(long, value_name = "N")]
    pub flush_iterations: Option<u32>,

    /// Leave `performance.now()` on the browser clock
    #[arg(long)]
    pub no_performance_now: bool,

    /// Bound on media seek readiness
    #[arg(long, value_name = "MS")]
    pub media_timeout: Option<u64>,

    /// Deadline for each navigation and clock step
    #[arg(long, value_name = "MS")]
    pub step_timeout: Option<u64>,

    /// Browser channel to launch
    #[arg(long, value_enum)]
    pub channel: Option<ChannelArg>,

    /// Explicit browser executable (overrides --channel)
    #[arg(long, value_name = "PATH")]
    pub executable: Option<PathBuf>,

    /// Channel to retry a file on when its media cannot be decoded
    #[arg(long, value_enum)]
    pub fallback_channel: Option<ChannelArg>,

    /// Write a JSON manifest with embedded frames
    #[arg(short, long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Disable the browser sandbox (containers/CI)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Resolve inputs and print the timeline without launching a browser
    #[arg(long)]
    pub list: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorArg,
}

impl Cli {
    /// Build the capture configuration: file first, then explicit flags
    pub fn capture_config(&self) -> CaptureResult<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::from_json_file(path)?,
            None => CaptureConfig::default(),
        };

        if let Some(target) = self.target {
            config = config.with_target_ms(target);
        }
        if let Some(interval) = self.interval {
            config = config.with_interval_ms(interval);
        }
        let bootstrap = self.bootstrap(config.bootstrap);
        config = config.with_bootstrap(bootstrap);
        if let Some(settle) = self.settle {
            config = config.with_settle_ms(settle);
        }
        if let Some(raw) = &self.viewport {
            config = config.with_viewport(Viewport::parse(raw)?);
        }
        if let Some(mode) = self.flush_mode(config.frame_flush) {
            config = config.with_frame_flush(mode);
        }
        if self.no_performance_now {
            config = config.with_performance_now_override(false);
        }
        if let Some(ms) = self.media_timeout {
            config = config.with_media_timeout_ms(ms);
        }
        if let Some(ms) = self.step_timeout {
            config = config.with_step_timeout_ms(ms);
        }

        let mut browser = config.browser.clone();
        if let Some(path) = &self.executable {
            browser = browser.with_channel(BrowserChannel::Executable(path.clone()));
        } else if let Some(channel) = self.channel {
            browser = browser.with_channel(channel.into());
        }
        if self.no_sandbox {
            browser = browser.with_no_sandbox();
        }
        if self.headed {
            browser = browser.with_headless(false);
        }
        config = config.with_browser(browser);

        if let Some(channel) = self.fallback_channel {
            config = config.with_fallback_channel(channel.into());
        }

        config.validate()?;
        Ok(config)
    }

    fn bootstrap(&self, mut bootstrap: BootstrapConfig) -> BootstrapConfig {
        if let Some(ms) = self.bootstrap_min {
            bootstrap.min_wait_ms = ms;
        }
        if let Some(ms) = self.bootstrap_max {
            bootstrap.max_wait_ms = ms;
        }
        if let Some(ticks) = self.min_ticks {
            bootstrap.min_ticks = ticks;
        }
        bootstrap
    }

    fn flush_mode(&self, current: FrameFlushMode) -> Option<FrameFlushMode> {
        let cap = self.flush_iterations;
        match (self.flush, current) {
            (Some(FlushArg::Off), _) => Some(FrameFlushMode::Off),
            (Some(FlushArg::Batch), _) => Some(FrameFlushMode::Batch),
            (Some(FlushArg::Drain), FrameFlushMode::Drain { max_iterations }) => {
                Some(FrameFlushMode::Drain {
                    max_iterations: cap.unwrap_or(max_iterations),
                })
            }
            (Some(FlushArg::Drain), _) => Some(FrameFlushMode::Drain {
                max_iterations: cap.unwrap_or(DEFAULT_DRAIN_ITERATIONS),
            }),
            (None, FrameFlushMode::Drain { .. }) => cap.map(|max_iterations| {
                FrameFlushMode::Drain { max_iterations }
            }),
            (None, _) => None,
        }
    }
}

/// Frame flush mode argument
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushArg {
    /// Leave pending frame callbacks alone
    Off,
    /// Run the callbacks pending after each step once
    Batch,
    /// Re-run newly scheduled callbacks up to --flush-iterations
    Drain,
}

/// Browser channel argument
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelArg {
    /// Chromium found via CHROMIUM_PATH, PATH or well-known locations
    Chromium,
    /// Branded Google Chrome found via CHROME, PATH or well-known locations
    Chrome,
}

impl From<ChannelArg> for BrowserChannel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Chromium => Self::Chromium,
            ChannelArg::Chrome => Self::Chrome,
        }
    }
}

/// Color output argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_parse_single_file() {
            let cli = Cli::parse_from(["stillframe", "demo.html"]);
            assert_eq!(cli.files, vec!["demo.html"]);
            assert_eq!(cli.input_dir, PathBuf::from("."));
            assert_eq!(cli.output_dir, PathBuf::from("frames"));
            assert!(!cli.list);
        }

        #[test]
        fn test_parse_accepts_any_file_count() {
            let cli = Cli::parse_from(["stillframe"]);
            assert!(cli.files.is_empty());
            let cli = Cli::parse_from(["stillframe", "a.html", "b.html"]);
            assert_eq!(cli.files.len(), 2);
        }

        #[test]
        fn test_parse_channels() {
            let cli = Cli::parse_from([
                "stillframe",
                "x.html",
                "--channel",
                "chrome",
                "--fallback-channel",
                "chromium",
            ]);
            assert_eq!(cli.channel, Some(ChannelArg::Chrome));
            assert_eq!(cli.fallback_channel, Some(ChannelArg::Chromium));
        }

        #[test]
        fn test_parse_verbosity() {
            let cli = Cli::parse_from(["stillframe", "-vv", "x.html"]);
            assert_eq!(cli.verbose, 2);
            let cli = Cli::parse_from(["stillframe", "-q", "x.html"]);
            assert!(cli.quiet);
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_defaults_without_flags() {
            let cli = Cli::parse_from(["stillframe", "x.html"]);
            assert_eq!(cli.capture_config().unwrap(), CaptureConfig::default());
        }

        #[test]
        fn test_flags_override_defaults() {
            let cli = Cli::parse_from([
                "stillframe",
                "x.html",
                "--target",
                "2500",
                "--interval",
                "500",
                "--viewport",
                "640x480",
                "--settle",
                "20",
                "--no-sandbox",
                "--headed",
                "--no-performance-now",
            ]);
            let config = cli.capture_config().unwrap();
            assert!((config.target_ms - 2500.0).abs() < f64::EPSILON);
            assert!((config.interval_ms - 500.0).abs() < f64::EPSILON);
            assert_eq!(config.viewport, Viewport::new(640, 480));
            assert_eq!(config.settle_ms, 20);
            assert!(!config.browser.sandbox);
            assert!(!config.browser.headless);
            assert!(!config.override_performance_now);
        }

        #[test]
        fn test_executable_beats_channel() {
            let cli = Cli::parse_from([
                "stillframe",
                "x.html",
                "--channel",
                "chrome",
                "--executable",
                "/opt/chrome/chrome",
            ]);
            let config = cli.capture_config().unwrap();
            assert_eq!(
                config.browser.channel,
                BrowserChannel::Executable("/opt/chrome/chrome".into())
            );
        }

        #[test]
        fn test_flush_modes() {
            let cli = Cli::parse_from(["stillframe", "x.html", "--flush", "batch"]);
            assert_eq!(cli.capture_config().unwrap().frame_flush, FrameFlushMode::Batch);

            let cli = Cli::parse_from(["stillframe", "x.html", "--flush-iterations", "4"]);
            assert_eq!(
                cli.capture_config().unwrap().frame_flush,
                FrameFlushMode::Drain { max_iterations: 4 }
            );

            let cli = Cli::parse_from(["stillframe", "x.html", "--flush", "off"]);
            assert_eq!(cli.capture_config().unwrap().frame_flush, FrameFlushMode::Off);
        }

        #[test]
        fn test_invalid_bootstrap_rejected() {
            let cli = Cli::parse_from([
                "stillframe",
                "x.html",
                "--bootstrap-min",
                "500",
                "--bootstrap-max",
                "100",
            ]);
            assert!(cli.capture_config().is_err());
        }

        #[test]
        fn test_bad_viewport_rejected() {
            let cli = Cli::parse_from(["stillframe", "x.html", "--viewport", "wide"]);
            assert!(cli.capture_config().is_err());
        }

        #[test]
        fn test_config_file_then_flags() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("capture.json");
            std::fs::write(&path, r#"{"target_ms": 1000, "interval_ms": 250, "settle_ms": 5}"#)
                .unwrap();

            let cli = Cli::parse_from([
                "stillframe",
                "x.html",
                "--config",
                path.to_str().unwrap(),
                "--interval",
                "100",
            ]);
            let config = cli.capture_config().unwrap();
            assert!((config.target_ms - 1000.0).abs() < f64::EPSILON);
            assert!((config.interval_ms - 100.0).abs() < f64::EPSILON);
            assert_eq!(config.settle_ms, 5);
        }
    }
}
