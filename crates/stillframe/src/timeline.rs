//! Capture timeline construction and output naming.
//!
//! A timeline is the ordered list of virtual timestamps at which snapshots are
//! taken. It always ends exactly at the target, even when the target is not a
//! multiple of the interval (the last step is then a partial step).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Floor and clamp a target time to a non-negative integer
#[must_use]
pub fn clamp_target(target_ms: f64) -> u64 {
    if target_ms.is_finite() && target_ms > 0.0 {
        target_ms.floor() as u64
    } else {
        0
    }
}

/// Largest timeline a configuration may request
pub const MAX_TIMELINE_FRAMES: u64 = 100_000;

/// Upper bound on `build(target_ms, interval_ms).len()`, computed without
/// building the timeline
#[must_use]
pub fn len_bound(target_ms: f64, interval_ms: f64) -> u64 {
    let target = clamp_target(target_ms);
    if !(interval_ms.is_finite() && interval_ms > 0.0) {
        return 1;
    }
    let steps = (target as f64 / interval_ms).ceil();
    let steps = if steps.is_finite() {
        (steps as u64).min(target)
    } else {
        target
    };
    steps.saturating_add(1)
}

/// Build the capture timestamps for `target_ms` stepping by `interval_ms`
///
/// A non-positive or non-finite interval yields the single entry
/// `[target]`. Each entry is `floor(k * interval)`; sub-millisecond
/// intervals jump straight to the next step whose floor differs, so the
/// work is bounded by the number of distinct entries.
#[must_use]
pub fn build(target_ms: f64, interval_ms: f64) -> Vec<u64> {
    let target = clamp_target(target_ms);
    if !(interval_ms.is_finite() && interval_ms > 0.0) {
        return vec![target];
    }

    let mut stamps = Vec::new();
    let mut t: u64 = 0;
    while t < target {
        stamps.push(t);
        // smallest k with floor(k * interval) > t
        let step = ((t + 1) as f64 / interval_ms).ceil();
        let next = (step * interval_ms).floor();
        t = if next.is_finite() && next > t as f64 {
            next as u64
        } else {
            t + 1
        };
    }
    stamps.push(target);
    stamps
}

/// Ordered, strictly increasing capture timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTimeline {
    stamps: Vec<u64>,
}

impl CaptureTimeline {
    /// Build a timeline
    #[must_use]
    pub fn new(target_ms: f64, interval_ms: f64) -> Self {
        Self {
            stamps: build(target_ms, interval_ms),
        }
    }

    /// Timestamps in visiting order
    #[must_use]
    pub fn stamps(&self) -> &[u64] {
        &self.stamps
    }

    /// Final timestamp
    #[must_use]
    pub fn target(&self) -> u64 {
        self.stamps.last().copied().unwrap_or(0)
    }

    /// Number of captures
    #[must_use]
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// A timeline always has at least one entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Digit width used to zero-pad timestamps in file names
    #[must_use]
    pub fn pad_width(&self) -> usize {
        self.target().to_string().len()
    }

    /// Output artifacts for `source` written into `output_dir`
    #[must_use]
    pub fn frames(&self, source: &Path, output_dir: &Path) -> Vec<FrameCapture> {
        let stem = sanitize_basename(source);
        let width = self.pad_width();
        self.stamps
            .iter()
            .map(|&t| FrameCapture {
                timestamp_ms: t,
                path: output_dir.join(frame_file_name(&stem, t, width)),
            })
            .collect()
    }
}

/// One output image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCapture {
    /// Virtual timestamp
    pub timestamp_ms: u64,
    /// Output path
    pub path: PathBuf,
}

impl FrameCapture {
    /// File name component of the output path
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `<stem>-<timestamp>ms.png`, timestamp zero-padded to `width`
#[must_use]
pub fn frame_file_name(stem: &str, timestamp_ms: u64, width: usize) -> String {
    format!("{stem}-{timestamp_ms:0width$}ms.png")
}

/// File stem reduced to `[A-Za-z0-9._-]`, other characters become `_`
#[must_use]
pub fn sanitize_basename(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "capture".to_string()
    } else {
        cleaned
    }
}
