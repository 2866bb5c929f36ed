//! Stillframe: deterministic virtual-time snapshots of HTML animations
//!
//! Stillframe drives a headless Chromium's virtual clock in fixed steps and,
//! at every step, forces all time-dependent page state to the step's
//! timestamp before taking a screenshot. The output is pixel-stable however
//! loaded the machine is.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator (per file)                      │
//! │                                                                      │
//! │  open context ─► inject runtime + patches ─► navigate ─► bootstrap  │
//! │                                                            │         │
//! │        ┌───────────────────────────────────────────────────┘         │
//! │        ▼                                                             │
//! │  ┌───────────┐   ┌──────────────┐   ┌────────────┐                  │
//! │  │ Virtual   │──►│ Synchronizer │──►│ Screenshot │──► next step     │
//! │  │ clock     │   │ css/lib/raf/ │   │            │                  │
//! │  │ advance   │   │ media        │   │            │                  │
//! │  └───────────┘   └──────────────┘   └────────────┘                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Virtual time runs timers and declarative animations but never fires
//! `requestAnimationFrame`. The automation runtime ([`AutomationState`])
//! instruments frame callbacks so they can be counted and force-run, and the
//! adapters in [`patches`] make library timelines seekable without skipping
//! their lifecycle callbacks.

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod automation;
mod browser;
mod clock;
mod config;
mod driver;
mod manifest;
mod orchestrator;
pub mod patches;
mod resolve;
mod result;
mod sync;
pub mod timeline;
mod wait;

pub use automation::{AutomationState, FrameFlushReport, RuntimeReport, TimelineSyncReport};
pub use browser::{file_url, find_executable, ChromiumLauncher, CHROME_ENV, CHROMIUM_ENV};
#[cfg(feature = "browser")]
pub use browser::{ChromiumBrowser, ChromiumContext};
pub use clock::{ClockState, VirtualClockSession};
pub use config::{
    BootstrapConfig, BrowserChannel, BrowserConfig, CaptureConfig, FrameFlushMode, Viewport,
    DEFAULT_DRAIN_ITERATIONS, DEFAULT_INTERVAL_MS, DEFAULT_TARGET_MS, MIN_INTERVAL_MS,
};
pub use driver::{
    BrowserLauncher, CallLog, CaptureBrowser, CaptureDriver, MockBrowser, MockDriver,
    MockLauncher, MockScript,
};
pub use manifest::{Manifest, ManifestFailure, ManifestFile, ManifestFrame};
pub use orchestrator::{
    BatchReport, CaptureMachine, CaptureRequest, CaptureState, FileOutcome, Orchestrator,
};
pub use patches::{AnimationLibraryAdapter, FrameworkPatch, PatchRegistry};
pub use resolve::{
    is_pattern, prepare_output_dir, resolve_inputs, single_selector, Selector, HTML_EXTENSIONS,
};
pub use result::{CaptureError, CaptureResult, MediaDiagnostic};
pub use sync::{MediaReport, SyncReport, Synchronizer};
pub use timeline::{CaptureTimeline, FrameCapture, MAX_TIMELINE_FRAMES};
pub use wait::{
    bootstrap, sleep_or_cancel, with_deadline, BootstrapOutcome, DEFAULT_MEDIA_TIMEOUT_MS,
    DEFAULT_STEP_TIMEOUT_MS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        BatchReport, BrowserChannel, BrowserLauncher, CaptureConfig, CaptureError, CaptureResult,
        ChromiumLauncher, FrameFlushMode, Orchestrator, Selector, Viewport,
    };
}
