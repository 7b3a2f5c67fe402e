//! Per-iteration diagnostic records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a unit during one stage iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    /// The successor was handed to the downstream stage.
    Delivered,
    /// Downstream had closed; the original unit went to the error stage.
    Diverted,
    /// The transformation produced no successor; nothing was delivered.
    Dropped,
    /// The transformation or the handoff failed.
    Failed,
}

impl IterationOutcome {
    /// Returns true when a successor existed and was accepted by either the
    /// downstream stage or, after diversion, the error stage.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Delivered | Self::Diverted)
    }
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Diverted => write!(f, "diverted"),
            Self::Dropped => write!(f, "dropped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The diagnostic record emitted once per processed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Stage that processed the unit.
    pub stage: String,
    /// Name of the processed unit.
    pub unit: String,
    /// Time spent in the transformation.
    pub processing_us: u64,
    /// Time spent reserving and delivering to the next stage.
    pub stall_us: u64,
    /// Time from taking the unit to the end of the post-hook.
    pub total_us: u64,
    /// What happened to the unit.
    pub outcome: IterationOutcome,
    /// Completion time (RFC 3339, UTC).
    pub completed_at: String,
}

impl IterationRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        unit: impl Into<String>,
        processing_us: u64,
        stall_us: u64,
        total_us: u64,
        outcome: IterationOutcome,
    ) -> Self {
        Self {
            stage: stage.into(),
            unit: unit.into(),
            processing_us,
            stall_us,
            total_us,
            outcome,
            completed_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string(),
        }
    }

    /// Returns true if the unit was delivered downstream or diverted.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Serializes the record for an event sink payload.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "stage": self.stage,
            "unit": self.unit,
            "processing_us": self.processing_us,
            "stall_us": self.stall_us,
            "total_us": self.total_us,
            "outcome": self.outcome,
            "success": self.success(),
            "completed_at": self.completed_at,
        })
    }

    /// Formats the completion line logged at the end of an iteration.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}::iterate({}): {:.3}ms ({:.3}ms stalled) {}",
            self.stage,
            self.unit,
            micros_to_ms(self.total_us),
            micros_to_ms(self.stall_us),
            if self.success() { "Success" } else { "Failed" },
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn micros_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}
