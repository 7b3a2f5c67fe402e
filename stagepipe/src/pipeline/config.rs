//! Configuration for assembling and running pipelines.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::PipelineError;

/// Runtime settings shared by the stages of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each stage inbox built through [`StageQueue::from_config`](crate::stages::StageQueue::from_config).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long [`Pipeline::join_with_timeout`](super::Pipeline::join_with_timeout)
    /// waits for stages to close before cancelling them.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

const fn default_queue_capacity() -> usize {
    1
}

const fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("invalid pipeline config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "shutdown_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the inbox capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    /// Sets the default log filter.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Enables or disables JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Returns the shutdown timeout as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new();
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_filter, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = PipelineConfig::from_json_str(r#"{"queue_capacity": 4}"#).unwrap();
        assert_eq!(
            config,
            PipelineConfig::new().with_queue_capacity(4)
        );
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = PipelineConfig::from_json_str(r#"{"queue_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(PipelineConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"shutdown_timeout_ms": 500, "log_filter": "stagepipe=debug", "json_logs": true}}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config,
            PipelineConfig::new()
                .with_shutdown_timeout_ms(500)
                .with_log_filter("stagepipe=debug")
                .with_json_logs(true)
        );
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_file("/nonexistent/stagepipe.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
