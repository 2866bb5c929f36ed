//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Some files produced no frames
    #[error("{failed} of {total} file(s) failed")]
    CaptureFailed {
        /// Failed files
        failed: usize,
        /// Files attempted
        total: usize,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Capture library error
    #[error("{0}")]
    Capture(#[from] stillframe::CaptureError),
}
