//! Input selection and output directory preparation.
//!
//! A selector is either an exact file name or a case-insensitive glob
//! (`*` and `?`) anchored to the full name. Patterns only consider HTML
//! documents. Selectors never contain path separators: they name files
//! inside the input directory, nothing else.

use crate::result::{CaptureError, CaptureResult};
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};

/// Extensions a pattern may match
pub const HTML_EXTENSIONS: [&str; 2] = ["html", "htm"];

/// Parsed file selector
#[derive(Debug, Clone)]
pub enum Selector {
    /// Exact file name
    Name(String),
    /// Case-insensitive glob
    Pattern(Pattern),
}

impl Selector {
    /// Parse a selector, rejecting path separators and empty names
    pub fn parse(raw: &str) -> CaptureResult<Self> {
        if raw.trim().is_empty() {
            return Err(CaptureError::resolution("file name must not be empty"));
        }
        if raw.contains(['/', '\\']) {
            return Err(CaptureError::resolution(format!(
                "'{raw}' contains a path separator; pass a file name inside the input directory"
            )));
        }
        if is_pattern(raw) {
            let pattern = Pattern::new(&to_glob(raw))
                .map_err(|e| CaptureError::resolution(format!("invalid pattern '{raw}': {e}")))?;
            Ok(Self::Pattern(pattern))
        } else {
            Ok(Self::Name(raw.to_string()))
        }
    }

    /// Whether this selector is a glob
    #[must_use]
    pub const fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }

    /// Match a bare file name
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            Self::Name(name) => name == file_name,
            Self::Pattern(pattern) => {
                has_html_extension(file_name) && pattern.matches_with(file_name, match_options())
            }
        }
    }
}

/// Exactly one selector argument is accepted
pub fn single_selector(args: &[String]) -> CaptureResult<Selector> {
    match args {
        [] => Err(CaptureError::resolution(
            "expected one file name or pattern, got none",
        )),
        [one] => Selector::parse(one),
        many => Err(CaptureError::resolution(format!(
            "expected one file name or pattern, got {} ({}); quote patterns so the shell does not expand them",
            many.len(),
            many.join(" ")
        ))),
    }
}

/// A name containing `*` or `?` is a pattern; anything else is literal
#[must_use]
pub fn is_pattern(raw: &str) -> bool {
    raw.contains(['*', '?'])
}

/// Glob source for a selector: brackets are literal and runs of `*` are one
/// wildcard (`glob` would read `**` as a recursive component)
fn to_glob(raw: &str) -> String {
    let mut glob = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '[' => glob.push_str("[[]"),
            ']' => glob.push_str("[]]"),
            '*' if glob.ends_with('*') => {}
            other => glob.push(other),
        }
    }
    glob
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn has_html_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            HTML_EXTENSIONS
                .iter()
                .any(|html| ext.eq_ignore_ascii_case(html))
        })
}

/// Resolve a selector to files inside `input_dir`, sorted by name
pub fn resolve_inputs(input_dir: &Path, selector: &Selector) -> CaptureResult<Vec<PathBuf>> {
    if !input_dir.is_dir() {
        return Err(CaptureError::resolution(format!(
            "input directory {} does not exist",
            input_dir.display()
        )));
    }

    let pattern = match selector {
        Selector::Name(name) => {
            let path = input_dir.join(name);
            return if path.is_file() {
                Ok(vec![path])
            } else {
                Err(CaptureError::resolution(format!(
                    "{} not found in {}",
                    name,
                    input_dir.display()
                )))
            };
        }
        Selector::Pattern(pattern) => pattern,
    };

    let mut matches = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if selector.matches(file_name) {
            matches.push(entry.path());
        }
    }
    matches.sort();

    if matches.is_empty() {
        return Err(CaptureError::resolution(format!(
            "no HTML file in {} matches '{}'",
            input_dir.display(),
            pattern.as_str()
        )));
    }
    Ok(matches)
}

/// Create the output directory if needed
pub fn prepare_output_dir(output_dir: &Path) -> CaptureResult<()> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        CaptureError::resolution(format!(
            "cannot create output directory {}: {e}",
            output_dir.display()
        ))
    })?;
    Ok(())
}
