//! Pseudo-stage terminating a chain.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{Reservation, Stage, WorkUnit};
use crate::errors::PipelineError;

/// A stage with no loop of its own that discards every unit it is given.
///
/// Use [`NullStage::discarding`] as a sink that always has capacity, or
/// [`NullStage::closed`] as a downstream that can never be reserved.
#[derive(Debug)]
pub struct NullStage {
    name: String,
    state: Reservation,
    discarded: AtomicU64,
}

impl NullStage {
    /// Creates an open sink: every reservation succeeds until it is closed.
    #[must_use]
    pub fn discarding(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Reservation::new(),
            discarded: AtomicU64::new(0),
        }
    }

    /// Creates a stage that is closed from the start.
    #[must_use]
    pub fn closed(name: impl Into<String>) -> Self {
        let stage = Self::discarding(name);
        stage.state.close();
        stage
    }

    /// Returns how many units have been discarded.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<W: WorkUnit> Stage<W> for NullStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reserve(&self) -> bool {
        !self.state.is_closed()
    }

    fn withdraw(&self) {}

    async fn put(&self, unit: W) -> Result<(), PipelineError> {
        debug!(stage = %self.name, unit = %unit.name(), "Discarding unit");
        self.discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.state.close();
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    async fn closed(&self) {
        self.state.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestUnit;

    #[tokio::test]
    async fn test_discarding_accepts_everything() {
        let sink = NullStage::discarding("sink");
        assert!(Stage::<TestUnit>::reserve(&sink).await);
        assert!(Stage::<TestUnit>::reserve(&sink).await);

        Stage::put(&sink, TestUnit::new("op-1")).await.unwrap();
        assert_eq!(sink.discarded(), 1);
        assert!(!Stage::<TestUnit>::is_closed(&sink));
    }

    #[tokio::test]
    async fn test_closed_never_claimable() {
        let sink = NullStage::closed("end");
        assert!(Stage::<TestUnit>::is_closed(&sink));
        assert!(!Stage::<TestUnit>::reserve(&sink).await);
        Stage::<TestUnit>::closed(&sink).await;
    }

    #[tokio::test]
    async fn test_close_discarding() {
        let sink = NullStage::discarding("sink");
        Stage::<TestUnit>::close(&sink);
        assert!(!Stage::<TestUnit>::reserve(&sink).await);
    }
}
