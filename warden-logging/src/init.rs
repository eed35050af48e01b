use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use warden_config::{LogFormat, LoggingConfig};

/// Build a filter from a level or directive string, falling back to `RUST_LOG`, then `info`
pub fn build_env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize simple tracing for basic stderr output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_env_filter(log_level);

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize logging from configuration
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config.level.to_string());

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let layer = match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Text => layer.boxed(),
    };

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}
