//! A closure-driven stage behavior backed by a [`StageQueue`].

use async_trait::async_trait;
use std::fmt::Debug;

use super::{StageBehavior, StageQueue, WorkUnit};
use crate::errors::PipelineError;

type TickFn<W> = dyn Fn(&W) -> Result<Option<W>, PipelineError> + Send + Sync;
type AfterFn<W> = dyn Fn(&W) + Send + Sync;

/// A behavior whose inbox is a [`StageQueue`] and whose transformation is a
/// plain function.
pub struct QueueBehavior<W> {
    inbox: StageQueue<W>,
    tick: Box<TickFn<W>>,
    after: Option<Box<AfterFn<W>>>,
}

impl<W: WorkUnit> QueueBehavior<W> {
    /// Creates a behavior that forwards every unit unchanged.
    #[must_use]
    pub fn passthrough(inbox: StageQueue<W>) -> Self {
        Self::new(inbox, |unit: &W| Ok(Some(unit.clone())))
    }

    /// Creates a behavior that terminates every unit it receives.
    #[must_use]
    pub fn terminal(inbox: StageQueue<W>) -> Self {
        Self::new(inbox, |_: &W| Ok(None))
    }

    /// Creates a behavior with a custom transformation.
    pub fn new<F>(inbox: StageQueue<W>, tick: F) -> Self
    where
        F: Fn(&W) -> Result<Option<W>, PipelineError> + Send + Sync + 'static,
    {
        Self {
            inbox,
            tick: Box::new(tick),
            after: None,
        }
    }

    /// Sets a hook run after every iteration.
    #[must_use]
    pub fn with_after<F>(mut self, after: F) -> Self
    where
        F: Fn(&W) + Send + Sync + 'static,
    {
        self.after = Some(Box::new(after));
        self
    }

    /// Returns the inbox.
    #[must_use]
    pub const fn inbox(&self) -> &StageQueue<W> {
        &self.inbox
    }
}

impl<W> Debug for QueueBehavior<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBehavior")
            .field("has_after", &self.after.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<W: WorkUnit> StageBehavior<W> for QueueBehavior<W> {
    async fn take(&self) -> Result<W, PipelineError> {
        self.inbox.take().await
    }

    async fn put(&self, unit: W) -> Result<(), PipelineError> {
        self.inbox.put(unit).await
    }

    async fn tick(&self, unit: &W) -> Result<Option<W>, PipelineError> {
        (self.tick)(unit)
    }

    fn after(&self, unit: &W) {
        if let Some(ref after) = self.after {
            after(unit);
        }
    }

    fn close_inbox(&self) {
        self.inbox.close();
    }
}
