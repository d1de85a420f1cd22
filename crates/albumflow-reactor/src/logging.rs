//! Tracing subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::{PipelineError, Result};

/// Builds the filter: `RUST_LOG` if set, otherwise the configured directive.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter))
}

/// Installs the global tracing subscriber. Fails if one is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(settings));
    let installed = match settings.format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.map_err(|e| PipelineError::Config(format!("tracing init failed: {}", e)))
}
