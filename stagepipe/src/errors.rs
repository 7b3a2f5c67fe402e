//! Error types for stage pipelines.
//!
//! Downstream closure is deliberately absent from this taxonomy: a stage
//! whose downstream has closed diverts the unit to its error stage and keeps
//! running, so it never surfaces as an error value.

use thiserror::Error;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Cooperative shutdown was requested while a stage was blocked or working.
    #[error("Stage cancelled: {0}")]
    Cancelled(String),

    /// The transformation step of a stage failed for a unit.
    #[error("Transform failed in stage '{stage}' for '{unit}': {message}")]
    Transform {
        /// The stage whose transformation failed.
        stage: String,
        /// The unit being transformed.
        unit: String,
        /// The failure message.
        message: String,
    },

    /// A collaborator failed to deliver or retrieve a unit.
    #[error("Delivery failed in stage '{stage}': {message}")]
    Delivery {
        /// The stage owning the inbox.
        stage: String,
        /// The failure message.
        message: String,
    },

    /// The inbox of a stage has been dropped.
    #[error("Queue closed for stage '{stage}'")]
    QueueClosed {
        /// The stage owning the inbox.
        stage: String,
    },

    /// A stage task panicked or could not be joined.
    #[error("Stage task join error: {0}")]
    Join(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pipeline was assembled incorrectly.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),
}

impl PipelineError {
    /// Creates a transform error.
    #[must_use]
    pub fn transform(
        stage: impl Into<String>,
        unit: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transform {
            stage: stage.into(),
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Creates a delivery error.
    #[must_use]
    pub fn delivery(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a queue closed error.
    #[must_use]
    pub fn queue_closed(stage: impl Into<String>) -> Self {
        Self::QueueClosed {
            stage: stage.into(),
        }
    }

    /// Returns true if this error is a cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Error raised when a pipeline is assembled or started incorrectly.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_error_display() {
        let err = PipelineError::transform("execute", "op-1", "sandbox crashed");
        assert_eq!(
            err.to_string(),
            "Transform failed in stage 'execute' for 'op-1': sandbox crashed"
        );
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_cancelled() {
        let err = PipelineError::Cancelled("shutdown".to_string());
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("shutdown"));
    }

    #[test]
    fn test_validation_error_names_stages() {
        let err = PipelineValidationError::new("Duplicate stage name")
            .with_stages(vec!["fetch".to_string()]);

        assert_eq!(err.to_string(), "Duplicate stage name");
        assert_eq!(err.stages, vec!["fetch".to_string()]);
    }

    #[test]
    fn test_validation_converts_into_pipeline_error() {
        let err: PipelineError = PipelineValidationError::new("bad").into();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
