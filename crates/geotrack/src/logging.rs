//! Logging setup for geotrack.
//!
//! Diagnostics go to stderr through a `tracing` subscriber so that command
//! output on stdout (including `--json`) stays machine-readable. `RUST_LOG`
//! replaces the verbosity-derived filter when set.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// Filter directives used when `RUST_LOG` is unset.
    ///
    /// HTTP client internals stay at `warn` unless tracing everything.
    #[must_use]
    pub fn directives(self) -> String {
        let (own, deps) = match self {
            Self::Quiet => ("error", "error"),
            Self::Normal => ("info", "warn"),
            Self::Verbose => ("debug", "warn"),
            Self::Trace => ("trace", "debug"),
        };
        format!("geotrack={own},reqwest={deps},hyper={deps}")
    }
}

/// Install the global subscriber.
///
/// Only the first call has any effect.
///
/// ```no_run
/// use geotrack::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= Verbosity::Verbose)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
