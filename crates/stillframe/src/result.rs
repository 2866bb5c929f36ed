//! Result and error types for Stillframe.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Diagnostic for a media element with no playable source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDiagnostic {
    /// Position of the element in document order among `video`/`audio` elements
    pub index: usize,
    /// Tag name (`VIDEO` or `AUDIO`)
    pub tag: String,
    /// Candidate sources (`src` attribute and `<source>` children)
    pub sources: Vec<String>,
    /// `MediaError.code` if the element reported a decode error
    pub error_code: Option<u16>,
}

impl std::fmt::Display for MediaDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}> #{}", self.tag.to_lowercase(), self.index)?;
        match self.error_code {
            Some(code) => write!(f, " (MediaError code {code})")?,
            None => write!(f, " (no playable source)")?,
        }
        if self.sources.is_empty() {
            write!(f, " sources: none")
        } else {
            write!(f, " sources: {}", self.sources.join(", "))
        }
    }
}

/// Errors that can occur while capturing
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Browser executable not found
    #[error(
        "Browser not found. Install Chromium/Chrome, pass --executable, or set CHROME / CHROMIUM_PATH"
    )]
    BrowserNotFound,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Input or output resolution failed
    #[error("Resolution failed: {message}")]
    Resolution {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Browser context or page error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// In-page evaluation error
    #[error("Evaluation failed: {message}")]
    Evaluation {
        /// Error message
        message: String,
    },

    /// Virtual time control error
    #[error("Virtual time control failed: {message}")]
    VirtualTime {
        /// Error message
        message: String,
    },

    /// Media elements without a playable source
    #[error("Unsupported media: {}", format_diagnostics(.diagnostics))]
    UnsupportedMedia {
        /// One entry per failing element
        diagnostics: Vec<MediaDiagnostic>,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    Screenshot {
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("{operation} timed out after {ms}ms")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Operation cancelled
    #[error("{operation} cancelled")]
    Cancelled {
        /// What was cancelled
        operation: String,
    },

    /// Two inputs of one run map to the same output frame
    #[error(
        "Output {} was already written by {} in this run; rename one of the inputs",
        .path.display(),
        .owner.display()
    )]
    OutputConflict {
        /// Frame path both inputs produce
        path: PathBuf,
        /// Input that wrote it first
        owner: PathBuf,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_diagnostics(diagnostics: &[MediaDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CaptureError {
    /// Create a browser launch error
    #[must_use]
    pub fn launch(message: impl Into<String>) -> Self {
        Self::BrowserLaunch {
            message: message.into(),
        }
    }

    /// Create a resolution error
    #[must_use]
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create an evaluation error
    #[must_use]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create a virtual time error
    #[must_use]
    pub fn virtual_time(message: impl Into<String>) -> Self {
        Self::VirtualTime {
            message: message.into(),
        }
    }

    /// Create a screenshot error
    #[must_use]
    pub fn screenshot(message: impl Into<String>) -> Self {
        Self::Screenshot {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this error is fatal for the whole run rather than one file
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BrowserNotFound
                | Self::BrowserLaunch { .. }
                | Self::Resolution { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Whether retrying on a fallback browser channel could help
    #[must_use]
    pub const fn wants_fallback(&self) -> bool {
        matches!(self, Self::UnsupportedMedia { .. })
    }
}
