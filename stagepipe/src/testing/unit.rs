//! A work unit for tests.

use crate::stages::WorkUnit;

/// A named unit carrying the list of stages that transformed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUnit {
    name: String,
    history: Vec<String>,
}

impl TestUnit {
    /// Creates a unit that has not been transformed yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            history: Vec::new(),
        }
    }

    /// Returns a successor that records `stage` in its history.
    #[must_use]
    pub fn visited(&self, stage: &str) -> Self {
        let mut history = self.history.clone();
        history.push(stage.to_string());
        Self {
            name: self.name.clone(),
            history,
        }
    }

    /// Returns the stages that produced this unit, oldest first.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl WorkUnit for TestUnit {
    fn name(&self) -> &str {
        &self.name
    }
}
