//! Tracing initialisation
//!
//! Everything logs to stderr: stdout belongs to the pipeline's stdout sink.

use anyhow::{anyhow, Result};
use conveyor_config::domains::logging::LogFormat;
use conveyor_config::LoggingConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// `--log-level` first, then `RUST_LOG`, then the configured level
fn env_filter(log_level: Option<&String>, fallback: &str) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to '{}'", level, fallback);
            EnvFilter::new(fallback)
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    }
}

/// Initialize tracing for the orchestrating host and remote nodes
pub fn init_host_tracing(config: &LoggingConfig, log_level: Option<&String>) -> Result<()> {
    let filter = env_filter(log_level, &config.level.to_string());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize tracing: {}", e))?;

    debug!("Host tracing initialized");
    Ok(())
}

/// Initialize tracing for role processes: plain text, no target
pub fn init_role_tracing(log_level: Option<&String>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level, "info"))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))?;

    debug!("Role process tracing initialized");
    Ok(())
}
