//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use stillframe::{BatchReport, CaptureTimeline};

/// Progress reporter for a capture run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    spinner: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            spinner: None,
            use_color,
            quiet,
        }
    }

    /// Show a spinner while the batch runs
    pub fn start_spinner(&mut self, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(message.to_string());
        self.spinner = Some(pb);
    }

    /// Remove the spinner
    pub fn finish(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(style("✓").green().bold(), "OK", message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Failures print even in quiet mode
        self.line(style("✗").red().bold(), "FAIL", message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(style("⚠").yellow().bold(), "WARN", message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.line(style("ℹ").blue().bold(), "INFO", message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        let _ = self.term.write_line(&styled);
    }

    /// Print the files and timeline of a dry run
    pub fn listing(&self, sources: &[std::path::PathBuf], timeline: &CaptureTimeline) {
        let stamps: Vec<String> = timeline.stamps().iter().map(|t| format!("{t}ms")).collect();
        let _ = self.term.write_line(&format!(
            "{} frame(s) per file: {}",
            timeline.len(),
            stamps.join(", ")
        ));
        for source in sources {
            let _ = self.term.write_line(&format!("  {}", source.display()));
        }
    }

    /// Per-file lines, the aggregate failure list and the totals
    pub fn report(&self, report: &BatchReport, output_dir: &Path, duration: Duration) {
        for outcome in &report.outcomes {
            if outcome.error.is_none() {
                let via = if outcome.used_fallback {
                    format!(" (fallback: {})", outcome.channel.as_deref().unwrap_or("?"))
                } else {
                    String::new()
                };
                self.success(&format!(
                    "{} → {} frame(s){via}",
                    outcome.source.display(),
                    outcome.frames.len()
                ));
            }
        }

        let failures = report.failures();
        if !failures.is_empty() {
            let _ = self.term.write_line("");
            let _ = self.term.write_line(&self.paint(
                &format!("Failures ({}):", failures.len()),
                &Style::new().red().bold(),
            ));
            for (source, error) in &failures {
                self.failure(&format!("{}: {error}", source.display()));
            }
        }

        self.summary(report, output_dir, duration);
    }

    fn summary(&self, report: &BatchReport, output_dir: &Path, duration: Duration) {
        let failed = report.failures().len();
        if self.quiet && failed == 0 {
            return;
        }

        let total = report.outcomes.len();
        let status = if failed > 0 {
            self.paint("FAILED", &Style::new().red().bold())
        } else {
            self.paint("DONE", &Style::new().green().bold())
        };
        let _ = self.term.write_line("");
        let _ = self.term.write_line(&format!(
            "{status} {} frame(s) from {} of {total} file(s) in {:.2}s → {}",
            report.frames_written(),
            total - failed,
            duration.as_secs_f64(),
            output_dir.display()
        ));
    }

    fn line(&self, glyph: console::StyledObject<&str>, plain: &str, message: &str) {
        let prefix = if self.use_color {
            glyph.to_string()
        } else {
            plain.to_string()
        };
        if let Some(pb) = &self.spinner {
            pb.suspend(|| {
                let _ = self.term.write_line(&format!("{prefix} {message}"));
            });
        } else {
            let _ = self.term.write_line(&format!("{prefix} {message}"));
        }
    }

    fn paint(&self, text: &str, with: &Style) -> String {
        if self.use_color {
            with.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use stillframe::{CaptureError, FileOutcome};

    fn report() -> BatchReport {
        BatchReport {
            outcomes: vec![
                FileOutcome {
                    source: "a.html".into(),
                    channel: Some("chromium".to_string()),
                    frames: Vec::new(),
                    used_fallback: false,
                    duration: Duration::ZERO,
                    error: None,
                },
                FileOutcome {
                    source: "b.html".into(),
                    channel: Some("chromium".to_string()),
                    frames: Vec::new(),
                    used_fallback: false,
                    duration: Duration::ZERO,
                    error: Some(CaptureError::page("crashed")),
                },
            ],
        }
    }

    #[test]
    fn test_quiet_reporter_prints_without_panicking() {
        let reporter = ProgressReporter::new(false, true);
        reporter.info("hidden");
        reporter.report(&report(), Path::new("out"), Duration::from_millis(5));
    }

    #[test]
    fn test_spinner_is_skipped_when_quiet() {
        let mut reporter = ProgressReporter::new(false, true);
        reporter.start_spinner("capturing");
        assert!(reporter.spinner.is_none());
        reporter.finish();
    }

    #[test]
    fn test_paint_plain_without_color() {
        let reporter = ProgressReporter::new(false, false);
        assert_eq!(reporter.paint("DONE", &Style::new().green()), "DONE");
    }
}
