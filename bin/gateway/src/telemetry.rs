use anyhow::{anyhow, Result};
use gateway_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` wins over the configured level
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}
