//! Log subscriber setup

use crate::config::{ColorChoice, Verbosity};
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, else from the verbosity flags
#[must_use]
pub fn env_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()))
}

/// Install the global subscriber writing to stderr
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init(verbosity: Verbosity, color: ColorChoice) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_ansi(color.should_color())
        .with_target(verbosity.is_verbose())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init(Verbosity::Quiet, ColorChoice::Never);
        init(Verbosity::Debug, ColorChoice::Never);
    }
}
