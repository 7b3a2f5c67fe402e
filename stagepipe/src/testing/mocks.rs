//! Scripted stage behaviors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

use super::TestUnit;
use crate::errors::PipelineError;
use crate::stages::{Reservation, Stage, StageBehavior, StageQueue, WorkUnit};

/// A behavior that records every unit it sees.
///
/// Forwarding behaviors append their name to the unit's history; terminal
/// ones end the unit's journey. A strict behavior rejects a delivery if its
/// inbox already holds a unit, which turns any violation of one-ahead
/// handoff into a test failure.
#[derive(Debug)]
pub struct RecordingBehavior {
    name: String,
    inbox: StageQueue<TestUnit>,
    forward: bool,
    strict: bool,
    ticked: Mutex<Vec<TestUnit>>,
    finished: Mutex<Vec<String>>,
}

impl RecordingBehavior {
    /// Creates a behavior forwarding each unit with this stage in its history.
    #[must_use]
    pub fn forwarding(name: impl Into<String>) -> Self {
        Self::build(name.into(), true)
    }

    /// Creates a behavior that terminates each unit.
    #[must_use]
    pub fn terminal(name: impl Into<String>) -> Self {
        Self::build(name.into(), false)
    }

    fn build(name: String, forward: bool) -> Self {
        Self {
            inbox: StageQueue::with_capacity(name.clone(), 1),
            name,
            forward,
            strict: false,
            ticked: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Fails any delivery that finds the inbox occupied.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Returns the units passed to `tick`, in order.
    #[must_use]
    pub fn ticked(&self) -> Vec<TestUnit> {
        self.ticked.lock().clone()
    }

    /// Returns the names of the units passed to `after`, in order.
    #[must_use]
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().clone()
    }

    /// Returns the inbox.
    #[must_use]
    pub const fn inbox(&self) -> &StageQueue<TestUnit> {
        &self.inbox
    }
}

#[async_trait]
impl StageBehavior<TestUnit> for RecordingBehavior {
    async fn take(&self) -> Result<TestUnit, PipelineError> {
        self.inbox.take().await
    }

    async fn put(&self, unit: TestUnit) -> Result<(), PipelineError> {
        if self.strict {
            self.inbox.try_put(unit)
        } else {
            self.inbox.put(unit).await
        }
    }

    async fn tick(&self, unit: &TestUnit) -> Result<Option<TestUnit>, PipelineError> {
        self.ticked.lock().push(unit.clone());
        Ok(self.forward.then(|| unit.visited(&self.name)))
    }

    fn after(&self, unit: &TestUnit) {
        self.finished.lock().push(unit.name().to_string());
    }

    fn close_inbox(&self) {
        self.inbox.close();
    }
}

/// A behavior whose transformation fails for selected units.
#[derive(Debug)]
pub struct FailingBehavior {
    name: String,
    inbox: StageQueue<TestUnit>,
    failing: HashSet<String>,
    finished: Mutex<Vec<String>>,
}

impl FailingBehavior {
    /// Creates a behavior failing on the named units and forwarding the rest.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        Self {
            inbox: StageQueue::with_capacity(name.clone(), 1),
            name,
            failing: failing.into_iter().map(Into::into).collect(),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Returns the names of the units passed to `after`, in order.
    #[must_use]
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().clone()
    }
}

#[async_trait]
impl StageBehavior<TestUnit> for FailingBehavior {
    async fn take(&self) -> Result<TestUnit, PipelineError> {
        self.inbox.take().await
    }

    async fn put(&self, unit: TestUnit) -> Result<(), PipelineError> {
        self.inbox.put(unit).await
    }

    async fn tick(&self, unit: &TestUnit) -> Result<Option<TestUnit>, PipelineError> {
        if self.failing.contains(unit.name()) {
            return Err(PipelineError::transform(&self.name, unit.name(), "scripted failure"));
        }
        Ok(Some(unit.visited(&self.name)))
    }

    fn after(&self, unit: &TestUnit) {
        self.finished.lock().push(unit.name().to_string());
    }

    fn close_inbox(&self) {
        self.inbox.close();
    }
}

/// A forwarding behavior that takes time to transform each unit.
#[derive(Debug)]
pub struct SlowBehavior {
    name: String,
    inbox: StageQueue<TestUnit>,
    delay: Duration,
}

impl SlowBehavior {
    /// Creates a slow behavior.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        let name = name.into();
        Self {
            inbox: StageQueue::with_capacity(name.clone(), 1),
            name,
            delay,
        }
    }

    /// Creates a slow behavior with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }
}

#[async_trait]
impl StageBehavior<TestUnit> for SlowBehavior {
    async fn take(&self) -> Result<TestUnit, PipelineError> {
        self.inbox.take().await
    }

    async fn put(&self, unit: TestUnit) -> Result<(), PipelineError> {
        self.inbox.put(unit).await
    }

    async fn tick(&self, unit: &TestUnit) -> Result<Option<TestUnit>, PipelineError> {
        tokio::time::sleep(self.delay).await;
        Ok(Some(unit.visited(&self.name)))
    }

    fn close_inbox(&self) {
        self.inbox.close();
    }
}

/// A loopless stage that keeps every unit delivered to it.
///
/// Like [`NullStage`](crate::stages::NullStage) it never makes an upstream
/// wait, so it works both as the end of a chain and as an error stage.
#[derive(Debug)]
pub struct CollectingStage {
    name: String,
    state: Reservation,
    received: Mutex<Vec<TestUnit>>,
}

impl CollectingStage {
    /// Creates an open collecting stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Reservation::new(),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Returns the units delivered so far, in order.
    #[must_use]
    pub fn received(&self) -> Vec<TestUnit> {
        self.received.lock().clone()
    }

    /// Returns the number of units delivered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    /// Returns true if nothing has been delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Stage<TestUnit> for CollectingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reserve(&self) -> bool {
        !self.state.is_closed()
    }

    fn withdraw(&self) {}

    async fn put(&self, unit: TestUnit) -> Result<(), PipelineError> {
        self.received.lock().push(unit);
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
