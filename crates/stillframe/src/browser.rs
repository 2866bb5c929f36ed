//! Browser control over the Chrome `DevTools` Protocol.
//!
//! With the `browser` feature, [`ChromiumLauncher`] drives a real Chromium
//! through chromiumoxide: one process per channel, one browser context per
//! capture request, virtual time via `Emulation.setVirtualTimePolicy`.
//! Without the feature the launcher reports that browser support was not
//! compiled in.

use crate::config::BrowserChannel;
use crate::result::{CaptureError, CaptureResult};
use std::path::{Path, PathBuf};

/// Environment variables consulted for the Chrome channel
pub const CHROME_ENV: &str = "CHROME";

/// Environment variable consulted first for the Chromium channel
pub const CHROMIUM_ENV: &str = "CHROMIUM_PATH";

/// Flags every capture browser is started with
pub const DEFAULT_ARGS: [&str; 6] = [
    "--hide-scrollbars",
    "--mute-audio",
    "--autoplay-policy=no-user-gesture-required",
    "--allow-file-access-from-files",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
];

#[cfg(target_os = "macos")]
const WELL_KNOWN: [&str; 2] = [
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

#[cfg(not(target_os = "macos"))]
const WELL_KNOWN: [&str; 3] = [
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
];

/// Locate the executable for `channel`
///
/// An explicit executable wins. Otherwise `CHROMIUM_PATH` / `CHROME` are
/// consulted, then the channel's candidates on `PATH`, then well-known
/// install locations.
pub fn find_executable(channel: &BrowserChannel) -> CaptureResult<PathBuf> {
    if let BrowserChannel::Executable(path) = channel {
        return resolve_candidate(path).ok_or(CaptureError::BrowserNotFound);
    }

    let vars: &[&str] = match channel {
        BrowserChannel::Chrome => &[CHROME_ENV],
        _ => &[CHROMIUM_ENV, CHROME_ENV],
    };
    for var in vars {
        if let Some(value) = std::env::var_os(var).filter(|v| !v.is_empty()) {
            if let Some(found) = resolve_candidate(Path::new(&value)) {
                return Ok(found);
            }
        }
    }

    channel
        .candidates()
        .iter()
        .find_map(|name| resolve_candidate(name))
        .or_else(|| {
            WELL_KNOWN
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
        })
        .ok_or(CaptureError::BrowserNotFound)
}

/// A path with a separator must exist; a bare name is searched on `PATH`
fn resolve_candidate(candidate: &Path) -> Option<PathBuf> {
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(candidate))
        .find(|p| p.is_file())
}

/// `file://` URL for a local document
pub fn file_url(path: &Path) -> CaptureResult<String> {
    let absolute = path.canonicalize().map_err(|e| CaptureError::Navigation {
        url: path.display().to_string(),
        message: e.to_string(),
    })?;
    url::Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|()| CaptureError::Navigation {
            url: absolute.display().to_string(),
            message: "path cannot be expressed as a file URL".to_string(),
        })
}

// ============================================================================
// Real CDP Implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
#[allow(clippy::significant_drop_tightening, clippy::cast_precision_loss)]
mod cdp {
    use super::{find_executable, DEFAULT_ARGS};
    use crate::config::{BrowserConfig, Viewport};
    use crate::driver::{BrowserLauncher, CaptureBrowser, CaptureDriver};
    use crate::result::{CaptureError, CaptureResult};
    use async_trait::async_trait;
    use base64::Engine;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
    use chromiumoxide::cdp::browser_protocol::emulation::{
        EventVirtualTimeBudgetExpired, SetDeviceMetricsOverrideParams, SetVirtualTimePolicyParams,
        VirtualTimePolicy,
    };
    use chromiumoxide::cdp::browser_protocol::page::{
        AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
    };
    use chromiumoxide::cdp::browser_protocol::target::{
        CreateBrowserContextParams, CreateTargetParams,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    /// Launches Chromium processes
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ChromiumLauncher;

    impl ChromiumLauncher {
        /// Create a launcher
        #[must_use]
        pub const fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl BrowserLauncher for ChromiumLauncher {
        async fn launch(&self, config: &BrowserConfig) -> CaptureResult<Box<dyn CaptureBrowser>> {
            let executable = find_executable(&config.channel)?;
            let mut builder = CdpConfig::builder().chrome_executable(&executable);

            if !config.headless {
                builder = builder.with_head();
            }
            if !config.sandbox {
                builder = builder.no_sandbox();
            }
            for arg in DEFAULT_ARGS.iter().copied().chain(config.args.iter().map(String::as_str)) {
                builder = builder.arg(arg);
            }

            let cdp_config = builder.build().map_err(CaptureError::launch)?;
            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(|e| {
                CaptureError::launch(format!(
                    "{e} (executable: {}; if it exits immediately, install its shared \
                     library dependencies such as libnss3, or retry with --no-sandbox)",
                    executable.display()
                ))
            })?;

            let handle = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        debug!(error = %e, "browser event error");
                    }
                }
            });

            info!(channel = %config.channel, executable = %executable.display(), "browser launched");
            Ok(Box::new(ChromiumBrowser {
                channel: config.channel.to_string(),
                inner: Arc::new(Mutex::new(browser)),
                handle,
            }))
        }
    }

    /// A running Chromium process
    #[derive(Debug)]
    pub struct ChromiumBrowser {
        channel: String,
        inner: Arc<Mutex<CdpBrowser>>,
        handle: tokio::task::JoinHandle<()>,
    }

    #[async_trait]
    impl CaptureBrowser for ChromiumBrowser {
        async fn open_context(&self, viewport: Viewport) -> CaptureResult<Box<dyn CaptureDriver>> {
            let mut browser = self.inner.lock().await;
            let context_id = browser
                .create_browser_context(CreateBrowserContextParams::default())
                .await
                .map_err(|e| CaptureError::page(format!("cannot create browser context: {e}")))?;

            let target = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(CaptureError::page)?;
            let page = match browser.new_page(target).await {
                Ok(page) => page,
                Err(e) => {
                    let _ = browser.dispose_browser_context(context_id).await;
                    return Err(CaptureError::page(format!("cannot open page: {e}")));
                }
            };
            drop(browser);

            let metrics = SetDeviceMetricsOverrideParams::builder()
                .width(i64::from(viewport.width))
                .height(i64::from(viewport.height))
                .device_scale_factor(viewport.device_scale_factor)
                .mobile(false)
                .build()
                .map_err(CaptureError::page)?;
            page.execute(metrics)
                .await
                .map_err(|e| CaptureError::page(format!("cannot set viewport: {e}")))?;

            Ok(Box::new(ChromiumContext {
                browser: Arc::clone(&self.inner),
                context_id: Some(context_id),
                page,
            }))
        }

        fn channel(&self) -> String {
            self.channel.clone()
        }

        async fn close(&mut self) -> CaptureResult<()> {
            let mut browser = self.inner.lock().await;
            let closed = browser.close().await;
            let _ = browser.wait().await;
            self.handle.abort();
            closed.map_err(|e| CaptureError::launch(format!("browser did not close cleanly: {e}")))?;
            Ok(())
        }
    }

    /// One browser context with its single page
    #[derive(Debug)]
    pub struct ChromiumContext {
        browser: Arc<Mutex<CdpBrowser>>,
        context_id: Option<BrowserContextId>,
        page: CdpPage,
    }

    impl ChromiumContext {
        async fn set_policy(&self, policy: VirtualTimePolicy, budget_ms: Option<u64>) -> CaptureResult<()> {
            let mut params = SetVirtualTimePolicyParams::builder().policy(policy);
            if let Some(ms) = budget_ms {
                params = params.budget(ms as f64);
            }
            let params = params.build().map_err(CaptureError::virtual_time)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| CaptureError::virtual_time(e.to_string()))?;
            Ok(())
        }
    }

    #[async_trait]
    impl CaptureDriver for ChromiumContext {
        async fn add_init_script(&mut self, source: &str) -> CaptureResult<()> {
            self.page
                .execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
                .await
                .map_err(|e| CaptureError::page(format!("cannot register init script: {e}")))?;
            Ok(())
        }

        async fn navigate(&mut self, url: &str) -> CaptureResult<()> {
            self.page
                .goto(url)
                .await
                .map_err(|e| CaptureError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            Ok(())
        }

        async fn evaluate(&self, expression: &str) -> CaptureResult<Value> {
            let wrapped = format!("JSON.stringify((() => ({expression}))() ?? null)");
            let text: String = self
                .page
                .evaluate(wrapped)
                .await
                .map_err(|e| CaptureError::evaluation(e.to_string()))?
                .into_value()
                .map_err(|e| CaptureError::evaluation(e.to_string()))?;
            Ok(serde_json::from_str(&text)?)
        }

        async fn run_virtual_time_budget(&mut self, budget_ms: u64) -> CaptureResult<()> {
            if budget_ms == 0 {
                return self.set_policy(VirtualTimePolicy::Pause, None).await;
            }
            let mut expired = self
                .page
                .event_listener::<EventVirtualTimeBudgetExpired>()
                .await
                .map_err(|e| CaptureError::virtual_time(e.to_string()))?;
            self.set_policy(VirtualTimePolicy::PauseIfNetworkFetchesPending, Some(budget_ms))
                .await?;
            expired.next().await.ok_or_else(|| {
                CaptureError::virtual_time("page closed before the budget expired")
            })?;
            Ok(())
        }

        async fn screenshot(&self) -> CaptureResult<Vec<u8>> {
            let params = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .from_surface(true)
                .build();
            let response = self
                .page
                .execute(params)
                .await
                .map_err(|e| CaptureError::screenshot(e.to_string()))?;
            let data: &str = response.data.as_ref();
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| CaptureError::screenshot(e.to_string()))
        }

        async fn close(&mut self) -> CaptureResult<()> {
            let Some(context_id) = self.context_id.take() else {
                return Ok(());
            };
            if let Err(e) = self.page.clone().close().await {
                warn!(error = %e, "page did not close cleanly");
            }
            let browser = self.browser.lock().await;
            browser
                .dispose_browser_context(context_id)
                .await
                .map_err(|e| CaptureError::page(format!("cannot dispose browser context: {e}")))?;
            Ok(())
        }
    }
}

// ============================================================================
// Stub Implementation (when `browser` feature is NOT enabled)
// ============================================================================

#[cfg(not(feature = "browser"))]
mod unavailable {
    use crate::config::BrowserConfig;
    use crate::driver::{BrowserLauncher, CaptureBrowser};
    use crate::result::{CaptureError, CaptureResult};
    use async_trait::async_trait;

    /// Launcher for builds without browser support
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ChromiumLauncher;

    impl ChromiumLauncher {
        /// Create a launcher
        #[must_use]
        pub const fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl BrowserLauncher for ChromiumLauncher {
        async fn launch(&self, _config: &BrowserConfig) -> CaptureResult<Box<dyn CaptureBrowser>> {
            Err(CaptureError::launch(
                "stillframe was built without the `browser` feature",
            ))
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::{ChromiumBrowser, ChromiumContext, ChromiumLauncher};

#[cfg(not(feature = "browser"))]
pub use unavailable::ChromiumLauncher;
