//! JSON manifest of a capture run.
//!
//! Lists, per source document, every frame written with its timestamp, file
//! name, path, pixel size and the PNG itself as base64, plus the files that
//! failed. Consumers can diff or embed frames without touching the output
//! directory.

use crate::config::{CaptureConfig, Viewport};
use crate::orchestrator::BatchReport;
use crate::result::{CaptureError, CaptureResult};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Manifest root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// RFC 3339 generation time
    pub generated_at: String,
    /// Producer name and version
    pub generator: String,
    /// Final capture time
    pub target_ms: u64,
    /// Configured step
    pub interval_ms: f64,
    /// Viewport used
    pub viewport: Viewport,
    /// Captured documents
    pub files: Vec<ManifestFile>,
    /// Documents that failed
    pub failures: Vec<ManifestFailure>,
}

/// Frames of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Input path
    pub source: String,
    /// Browser channel used
    pub channel: Option<String>,
    /// Captured on the fallback channel
    pub used_fallback: bool,
    /// Frames in timeline order
    pub frames: Vec<ManifestFrame>,
}

/// One frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFrame {
    /// Virtual timestamp
    pub timestamp_ms: u64,
    /// Output file name
    pub file_name: String,
    /// Output path
    pub path: String,
    /// Pixel width
    pub width: u32,
    /// Pixel height
    pub height: u32,
    /// PNG bytes, base64 (standard alphabet)
    pub png_base64: String,
}

/// A document that produced no frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFailure {
    /// Input path
    pub source: String,
    /// Error message
    pub error: String,
}

impl Manifest {
    /// Build from a finished batch, reading each written frame back
    pub fn from_report(report: &BatchReport, config: &CaptureConfig) -> CaptureResult<Self> {
        let mut files = Vec::new();
        let mut failures = Vec::new();

        for outcome in &report.outcomes {
            let source = outcome.source.display().to_string();
            if let Some(err) = &outcome.error {
                failures.push(ManifestFailure {
                    source,
                    error: err.to_string(),
                });
                continue;
            }

            let mut frames = Vec::with_capacity(outcome.frames.len());
            for frame in &outcome.frames {
                let bytes = std::fs::read(&frame.path)?;
                let (width, height) = png_dimensions(&bytes)?;
                frames.push(ManifestFrame {
                    timestamp_ms: frame.timestamp_ms,
                    file_name: frame.file_name(),
                    path: frame.path.display().to_string(),
                    width,
                    height,
                    png_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
                });
            }
            files.push(ManifestFile {
                source,
                channel: outcome.channel.clone(),
                used_fallback: outcome.used_fallback,
                frames,
            });
        }

        Ok(Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            generator: format!("stillframe {}", env!("CARGO_PKG_VERSION")),
            target_ms: config.target_ms_clamped(),
            interval_ms: config.interval_ms,
            viewport: config.viewport,
            files,
            failures,
        })
    }

    /// Write pretty JSON to `path`
    pub fn write(&self, path: &Path) -> CaptureResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Frames across all files
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.files.iter().map(|f| f.frames.len()).sum()
    }
}

fn png_dimensions(bytes: &[u8]) -> CaptureResult<(u32, u32)> {
    image::ImageReader::with_format(Cursor::new(bytes), image::ImageFormat::Png)
        .into_dimensions()
        .map_err(|e| CaptureError::screenshot(format!("unreadable PNG: {e}")))
}
