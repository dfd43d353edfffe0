//! Logging setup for the command-line tool.
//!
//! Installs a global tracing subscriber that writes to stderr. `RUST_LOG`
//! takes precedence over the verbosity picked on the command line.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()))
}

/// Initialize tracing. Subsequent calls are no-ops.
pub fn init(verbosity: Verbosity) -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let stderr_layer = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);

    let subscriber = Registry::default()
        .with(build_env_filter(verbosity))
        .with(stderr_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(());

    tracing::debug!("logging initialized at {:?}", verbosity);
    Ok(())
}
