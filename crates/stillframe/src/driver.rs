//! Capture driver seams.
//!
//! The engine talks to the browser through three async traits:
//!
//! ```text
//! BrowserLauncher ──launch──► CaptureBrowser ──open_context──► CaptureDriver
//!   (one per channel)          (one process)                    (one isolated
//!                                                                context + page)
//! ```
//!
//! `browser.rs` implements them over CDP with chromiumoxide. The mock
//! implementations below record every call and answer evaluations from a
//! script, so the clock, synchronizer and orchestrator can be exercised
//! without Chromium.

use crate::config::{BrowserConfig, Viewport};
use crate::result::{CaptureError, CaptureResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

/// One isolated execution context owning exactly one page
#[async_trait]
pub trait CaptureDriver: Send + Sync {
    /// Register a script that runs before any page script on every navigation
    async fn add_init_script(&mut self, source: &str) -> CaptureResult<()>;

    /// Navigate and wait for the load event
    async fn navigate(&mut self, url: &str) -> CaptureResult<()>;

    /// Evaluate an expression and return its JSON value
    async fn evaluate(&self, expression: &str) -> CaptureResult<Value>;

    /// Grant `budget_ms` of virtual time and wait for the budget-expired signal
    async fn run_virtual_time_budget(&mut self, budget_ms: u64) -> CaptureResult<()>;

    /// Capture the viewport as PNG
    async fn screenshot(&self) -> CaptureResult<Vec<u8>>;

    /// Dispose the context
    async fn close(&mut self) -> CaptureResult<()>;
}

/// A running browser process
#[async_trait]
pub trait CaptureBrowser: Send + Sync {
    /// Open a fresh, isolated context sized to `viewport`
    async fn open_context(&self, viewport: Viewport) -> CaptureResult<Box<dyn CaptureDriver>>;

    /// Human readable channel name for logs and reports
    fn channel(&self) -> String;

    /// Shut the process down
    async fn close(&mut self) -> CaptureResult<()>;
}

/// Starts browsers
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser
    async fn launch(&self, config: &BrowserConfig) -> CaptureResult<Box<dyn CaptureBrowser>>;
}

// ============================================================================
// Mock implementation
// ============================================================================

/// Shared call log
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Scripted evaluation answers
///
/// Each rule pairs a needle with a queue of values. An evaluation answers
/// with the first rule whose needle occurs in the expression; the queue pops
/// until one value is left, which then repeats.
#[derive(Debug, Clone)]
pub struct MockScript {
    rules: Vec<(String, VecDeque<Value>)>,
    failures: Vec<(String, String)>,
    hang_virtual_time: bool,
    screenshot_size: (u32, u32),
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            failures: Vec::new(),
            hang_virtual_time: false,
            screenshot_size: (4, 3),
        }
    }
}

impl MockScript {
    /// Empty script: every evaluation returns `null`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer expressions containing `needle` with `value`
    #[must_use]
    pub fn answer(self, needle: impl Into<String>, value: Value) -> Self {
        self.answer_sequence(needle, vec![value])
    }

    /// Answer expressions containing `needle` with `values` in order
    #[must_use]
    pub fn answer_sequence(mut self, needle: impl Into<String>, values: Vec<Value>) -> Self {
        self.rules.push((needle.into(), values.into()));
        self
    }

    /// Fail evaluations containing `needle`
    #[must_use]
    pub fn fail(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.push((needle.into(), message.into()));
        self
    }

    /// Never deliver the virtual-time budget-expired signal
    #[must_use]
    pub const fn hang_virtual_time(mut self) -> Self {
        self.hang_virtual_time = true;
        self
    }

    fn respond(&mut self, expression: &str) -> CaptureResult<Value> {
        if let Some((_, message)) = self
            .failures
            .iter()
            .find(|(needle, _)| expression.contains(needle.as_str()))
        {
            return Err(CaptureError::evaluation(message.clone()));
        }
        let Some((_, queue)) = self
            .rules
            .iter_mut()
            .find(|(needle, _)| expression.contains(needle.as_str()))
        else {
            return Ok(Value::Null);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or(Value::Null))
        } else {
            Ok(queue.front().cloned().unwrap_or(Value::Null))
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock context that records calls
#[derive(Debug)]
pub struct MockDriver {
    id: usize,
    script: Mutex<MockScript>,
    log: CallLog,
    closed: bool,
}

impl MockDriver {
    /// Create a standalone mock driver
    #[must_use]
    pub fn new(script: MockScript) -> Self {
        Self::with_log(0, script, CallLog::default())
    }

    fn with_log(id: usize, script: MockScript, log: CallLog) -> Self {
        Self {
            id,
            script: Mutex::new(script),
            log,
            closed: false,
        }
    }

    /// Calls recorded so far
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Check if a method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        lock(&self.log).iter().any(|c| c.starts_with(method))
    }

    fn record(&self, call: String) {
        lock(&self.log).push(format!("{call}@{}", self.id));
    }

    fn ensure_open(&self) -> CaptureResult<()> {
        if self.closed {
            Err(CaptureError::page("context already closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CaptureDriver for MockDriver {
    async fn add_init_script(&mut self, source: &str) -> CaptureResult<()> {
        self.ensure_open()?;
        self.record(format!("init_script:{}", source.len()));
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> CaptureResult<()> {
        self.ensure_open()?;
        self.record(format!("navigate:{url}"));
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> CaptureResult<Value> {
        self.ensure_open()?;
        let verb = expression
            .split(['(', ' '])
            .find(|part| !part.is_empty())
            .unwrap_or_default()
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_string();
        self.record(format!("evaluate:{verb}"));
        lock(&self.script).respond(expression)
    }

    async fn run_virtual_time_budget(&mut self, budget_ms: u64) -> CaptureResult<()> {
        self.ensure_open()?;
        self.record(format!("virtual_time:{budget_ms}"));
        let hang = lock(&self.script).hang_virtual_time;
        if hang {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn screenshot(&self) -> CaptureResult<Vec<u8>> {
        self.ensure_open()?;
        self.record("screenshot".to_string());
        let (width, height) = lock(&self.script).screenshot_size;
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png)
            .map_err(|e| CaptureError::screenshot(e.to_string()))?;
        Ok(bytes.into_inner())
    }

    async fn close(&mut self) -> CaptureResult<()> {
        self.record("close".to_string());
        self.closed = true;
        Ok(())
    }
}

/// Mock browser handing out [`MockDriver`] contexts that share one call log
#[derive(Debug)]
pub struct MockBrowser {
    channel: String,
    script: MockScript,
    log: CallLog,
    contexts: Mutex<usize>,
    attempts: Mutex<usize>,
    fail_all: bool,
    fail_attempts: Vec<usize>,
}

impl MockBrowser {
    /// Create a mock browser whose contexts answer from `script`
    #[must_use]
    pub fn new(channel: impl Into<String>, script: MockScript, log: CallLog) -> Self {
        Self {
            channel: channel.into(),
            script,
            log,
            contexts: Mutex::new(0),
            attempts: Mutex::new(0),
            fail_all: false,
            fail_attempts: Vec::new(),
        }
    }

    /// Make every `open_context` fail
    #[must_use]
    pub const fn failing_contexts(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Make the `attempt`-th `open_context` call (1-based) fail
    #[must_use]
    pub fn failing_context(mut self, attempt: usize) -> Self {
        self.fail_attempts.push(attempt);
        self
    }

    /// Number of contexts opened so far
    #[must_use]
    pub fn contexts_opened(&self) -> usize {
        *lock(&self.contexts)
    }
}

#[async_trait]
impl CaptureBrowser for MockBrowser {
    async fn open_context(&self, viewport: Viewport) -> CaptureResult<Box<dyn CaptureDriver>> {
        let attempt = {
            let mut count = lock(&self.attempts);
            *count += 1;
            *count
        };
        if self.fail_all || self.fail_attempts.contains(&attempt) {
            lock(&self.log).push(format!("open_context_failed:{}#{attempt}", self.channel));
            return Err(CaptureError::page("mock context creation failed"));
        }
        let id = {
            let mut count = lock(&self.contexts);
            *count += 1;
            *count
        };
        lock(&self.log).push(format!(
            "open_context:{}:{}x{}@{id}",
            self.channel, viewport.width, viewport.height
        ));
        let mut script = self.script.clone();
        script.screenshot_size = (viewport.width.min(64), viewport.height.min(64));
        Ok(Box::new(MockDriver::with_log(id, script, self.log.clone())))
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }

    async fn close(&mut self) -> CaptureResult<()> {
        lock(&self.log).push(format!("close_browser:{}", self.channel));
        Ok(())
    }
}

/// Launcher producing [`MockBrowser`]s, keyed by channel name
#[derive(Debug, Default)]
pub struct MockLauncher {
    scripts: Vec<(String, MockScript)>,
    log: CallLog,
    fail_launch: bool,
    fail_contexts: Vec<usize>,
}

impl MockLauncher {
    /// Create a launcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script used for browsers launched on `channel`
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>, script: MockScript) -> Self {
        self.scripts.push((channel.into(), script));
        self
    }

    /// Make every launch fail
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Browsers from this launcher fail their `attempt`-th context open
    #[must_use]
    pub fn with_failing_context(mut self, attempt: usize) -> Self {
        self.fail_contexts.push(attempt);
        self
    }

    /// Shared call log of everything launched
    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Snapshot of the call log
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        lock(&self.log).clone()
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, config: &BrowserConfig) -> CaptureResult<Box<dyn CaptureBrowser>> {
        let channel = config.channel.to_string();
        if self.fail_launch {
            return Err(CaptureError::launch(format!(
                "{channel}: error while loading shared libraries: libnss3.so"
            )));
        }
        lock(&self.log).push(format!("launch:{channel}"));
        let script = self
            .scripts
            .iter()
            .find(|(name, _)| *name == channel)
            .map(|(_, script)| script.clone())
            .unwrap_or_else(MockScript::new);
        let browser = self
            .fail_contexts
            .iter()
            .fold(MockBrowser::new(channel, script, self.log.clone()), |b, &n| {
                b.failing_context(n)
            });
        Ok(Box::new(browser))
    }
}
