use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::{
    config::LogConfig,
    config_error,
    core::{OrchestratorError, OrchestratorResult},
};

/// Build an `env_logger` builder from configuration.
///
/// `RUST_LOG` still wins over the configured level.
pub fn builder(config: &LogConfig) -> OrchestratorResult<Builder> {
    let level: LevelFilter = config
        .level
        .parse()
        .map_err(|_| config_error!("invalid log level: {}", config.level))?;

    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.parse_env(Env::default());

    if !config.timestamps {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{:<5} {}: {}",
                record.level(),
                record.target(),
                record.args()
            )
        });
    }

    Ok(builder)
}

/// Install the global logger.
pub fn init(config: &LogConfig) -> OrchestratorResult<()> {
    builder(config)?
        .try_init()
        .map_err(|e| OrchestratorError::Logger(e.to_string()))
}
