//! `tracing-subscriber` setup for binaries embedding stage pipelines.

use tracing_subscriber::EnvFilter;

use crate::errors::PipelineError;
use crate::pipeline::PipelineConfig;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Returns an error if
/// the filter cannot be parsed or a global subscriber is already installed.
pub fn init_tracing(config: &PipelineConfig) -> Result<(), PipelineError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .map_err(|e| PipelineError::Config(format!("invalid log filter: {e}")))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| PipelineError::Config(format!("tracing already initialised: {e}")))
}
