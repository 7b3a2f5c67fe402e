//! The stage driving loop and its reservation protocol.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{Reservation, Stage, StageBehavior, WorkUnit};
use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, PipelineValidationError};
use crate::events::{
    EventSink, NoOpEventSink, ITERATION_COMPLETED, ITERATION_STARTED, STAGE_STARTED, STAGE_STOPPED,
};
use crate::observability::{IterationOutcome, IterationRecord, Stopwatch};

/// One node of a pipeline, running its own loop on a dedicated task.
///
/// Each iteration takes one unit from the inbox, transforms it, reserves the
/// downstream stage and delivers the successor there. If the downstream has
/// closed, the original unit is delivered to the error stage instead. The
/// stage's own reservation is released at the end of every iteration, which
/// is what lets the upstream neighbour hand over its next unit.
///
/// The loop keeps running while the downstream is open or an upstream still
/// holds a reservation here. On exit the stage closes itself, which in turn
/// ends its upstream neighbour once that one has drained.
pub struct PipelineStage<W: WorkUnit> {
    name: String,
    behavior: Arc<dyn StageBehavior<W>>,
    output: Arc<dyn Stage<W>>,
    error: Arc<dyn Stage<W>>,
    reservation: Reservation,
    cancel_token: CancellationToken,
    events: Arc<dyn EventSink>,
    started: AtomicBool,
}

impl<W: WorkUnit> PipelineStage<W> {
    /// Creates a stage. `output` and `error` must already exist, so chains
    /// are built from the sink backwards.
    pub fn new(
        name: impl Into<String>,
        behavior: Arc<dyn StageBehavior<W>>,
        output: Arc<dyn Stage<W>>,
        error: Arc<dyn Stage<W>>,
    ) -> Self {
        Self {
            name: name.into(),
            behavior,
            output,
            error,
            reservation: Reservation::new(),
            cancel_token: CancellationToken::new(),
            events: Arc::new(NoOpEventSink),
            started: AtomicBool::new(false),
        }
    }

    /// Sets the sink receiving lifecycle and iteration events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the downstream stage.
    #[must_use]
    pub fn output(&self) -> &Arc<dyn Stage<W>> {
        &self.output
    }

    /// Returns the error stage.
    #[must_use]
    pub fn error(&self) -> &Arc<dyn Stage<W>> {
        &self.error
    }

    /// Returns true while an upstream holds a reservation on this stage.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.reservation.is_reserved()
    }

    /// Returns true once the driving loop has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Releases the reservation this stage granted for the unit it has just
    /// finished with, waking one waiting upstream.
    ///
    /// Only the stage itself calls this, once per iteration. A call with no
    /// reservation outstanding is a no-op.
    pub fn release(&self) {
        self.reservation.release();
    }

    /// Requests cooperative cancellation of the driving loop.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel_token.cancel(reason);
    }

    /// Spawns the driving loop onto the current tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<Result<(), PipelineError>>, PipelineError> {
        self.mark_started()?;
        let stage = Arc::clone(self);
        Ok(tokio::spawn(async move { stage.drive_until_closed().await }))
    }

    /// Hands a unit to this stage from outside the pipeline.
    ///
    /// Follows the same reserve-then-put protocol as an upstream stage, so
    /// it waits until the previous unit has been fully processed. Returns
    /// `false` if the stage has closed.
    pub async fn submit(&self, unit: W) -> Result<bool, PipelineError> {
        if !self.reservation.reserve().await {
            return Ok(false);
        }
        let claim = Claim::new(self);
        self.behavior.put(unit).await?;
        claim.commit();
        Ok(true)
    }

    /// Runs the driving loop to completion on the current task.
    ///
    /// The stage is closed when this returns, whatever the cause, and also
    /// if the task running it is aborted.
    pub async fn run(&self) -> Result<(), PipelineError> {
        self.mark_started()?;
        self.drive_until_closed().await
    }

    fn mark_started(&self) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineValidationError::new(format!("stage '{}' already started", self.name))
                .with_stages(vec![self.name.clone()])
                .into());
        }
        Ok(())
    }

    async fn drive_until_closed(&self) -> Result<(), PipelineError> {
        let _close = CloseOnExit { stage: self };

        let span = info_span!("stage", name = %self.name);
        async {
            info!("Stage started");
            self.events
                .try_emit(STAGE_STARTED, Some(serde_json::json!({ "stage": self.name })));

            let result = self.drive().await;
            match &result {
                Ok(()) => info!("Stage drained"),
                Err(e) if e.is_cancelled() => info!(reason = %e, "Stage cancelled"),
                Err(e) => error!(error = %e, "Stage failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&self) -> Result<(), PipelineError> {
        loop {
            if self.should_stop() {
                return Ok(());
            }
            if self.iterate().await?.is_none() {
                return Ok(());
            }
        }
    }

    /// True once nothing can reach this stage any more. Closes the stage as
    /// part of the same check so no upstream can reserve in between.
    fn should_stop(&self) -> bool {
        (self.output.is_closed() || self.reservation.is_closed())
            && self.reservation.close_if_unreserved()
    }

    /// Processes one unit. Returns `Ok(None)` if the stage closed while idle.
    async fn iterate(&self) -> Result<Option<IterationRecord>, PipelineError> {
        let mut release = ReleaseOnDrop {
            stage: self,
            keep_open: false,
        };
        let mut stopwatch = Stopwatch::unstarted();

        let Some(unit) = self.acquire().await? else {
            return Ok(None);
        };
        let unit_name = unit.name().to_string();
        debug!("{}::iterate({}): Starting", self.name, unit_name);
        self.events.try_emit(
            ITERATION_STARTED,
            Some(serde_json::json!({ "stage": self.name, "unit": unit_name })),
        );
        stopwatch.start();

        let mut processing_us = 0;
        let mut stall_us = 0;
        let handoff = self
            .transform_and_deliver(&unit, &stopwatch, &mut processing_us, &mut stall_us)
            .await;
        // A failed handoff ends the loop, so the stage must be closed before
        // the slot is released to a waiting upstream.
        release.keep_open = handoff.is_ok();
        drop(release);

        self.behavior.after(&unit);
        let outcome = match &handoff {
            Ok(outcome) => *outcome,
            Err(e) => {
                warn!(unit = %unit_name, error = %e, "Iteration failed");
                IterationOutcome::Failed
            }
        };
        let record = IterationRecord::new(
            &self.name,
            unit_name,
            processing_us,
            stall_us,
            stopwatch.elapsed_us(),
            outcome,
        );
        debug!(
            unit = %record.unit,
            processing_us = record.processing_us,
            stall_us = record.stall_us,
            outcome = %record.outcome,
            "{}",
            record.summary()
        );
        self.events.try_emit(ITERATION_COMPLETED, Some(record.to_value()));

        handoff.map(|_| Some(record))
    }

    /// Waits for the next unit, or for this stage to go idle with nothing
    /// left to receive.
    async fn acquire(&self) -> Result<Option<W>, PipelineError> {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => Err(self.cancelled_error()),
            unit = self.behavior.take() => unit.map(Some),
            () = self.closed_while_idle() => Ok(None),
        }
    }

    /// Resolves once the downstream (or this stage) has closed and this
    /// stage has atomically closed itself with no reservation outstanding.
    async fn closed_while_idle(&self) {
        loop {
            tokio::select! {
                () = self.output.closed() => {}
                () = self.reservation.closed() => {}
            }
            if self.reservation.close_if_unreserved() {
                debug!("Closed while waiting for work");
                return;
            }
            // An upstream still owes us a unit; wait until it has been drained.
            self.reservation.unreserved().await;
        }
    }

    async fn transform_and_deliver(
        &self,
        unit: &W,
        stopwatch: &Stopwatch,
        processing_us: &mut u64,
        stall_us: &mut u64,
    ) -> Result<IterationOutcome, PipelineError> {
        let next = self.until_cancelled(self.behavior.tick(unit)).await;
        *processing_us = stopwatch.elapsed_us();
        let Some(next) = next?? else {
            return Ok(IterationOutcome::Dropped);
        };

        let outcome = self.deliver(unit, next).await;
        *stall_us = stopwatch.elapsed_us().saturating_sub(*processing_us);
        outcome
    }

    /// Hands the successor downstream, or the original to the error stage if
    /// the downstream has closed.
    async fn deliver(&self, unit: &W, next: W) -> Result<IterationOutcome, PipelineError> {
        if self.until_cancelled(self.output.reserve()).await? {
            let claim = Claim::new(&*self.output);
            self.until_cancelled(self.output.put(next)).await??;
            claim.commit();
            Ok(IterationOutcome::Delivered)
        } else {
            debug!(
                unit = %unit.name(),
                error_stage = %self.error.name(),
                "Downstream closed, diverting to error stage"
            );
            self.until_cancelled(self.error.put(unit.clone())).await??;
            Ok(IterationOutcome::Diverted)
        }
    }

    async fn until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, PipelineError> {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => Err(self.cancelled_error()),
            value = fut => Ok(value),
        }
    }

    fn cancelled_error(&self) -> PipelineError {
        PipelineError::Cancelled(
            self.cancel_token
                .reason()
                .unwrap_or_else(|| format!("stage '{}' cancelled", self.name)),
        )
    }
}

#[async_trait]
impl<W: WorkUnit> Stage<W> for PipelineStage<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reserve(&self) -> bool {
        self.reservation.reserve().await
    }

    fn withdraw(&self) {
        if self.reservation.release() {
            warn!(stage = %self.name, "Reservation withdrawn before delivery");
        }
    }

    async fn put(&self, unit: W) -> Result<(), PipelineError> {
        self.behavior.put(unit).await
    }

    fn close(&self) {
        if self.reservation.close() {
            debug!(stage = %self.name, "Stage closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.reservation.is_closed()
    }

    async fn closed(&self) {
        self.reservation.closed().await;
    }
}

impl<W: WorkUnit> std::fmt::Debug for PipelineStage<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("output", &self.output.name())
            .field("error", &self.error.name())
            .field("reservation", &self.reservation)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Releases this stage's own reservation when an iteration ends.
///
/// Unless the iteration completed and the loop goes on, the stage is closed
/// first so a waiting upstream is refused rather than granted a slot no one
/// will ever drain.
struct ReleaseOnDrop<'a, W: WorkUnit> {
    stage: &'a PipelineStage<W>,
    keep_open: bool,
}

impl<W: WorkUnit> Drop for ReleaseOnDrop<'_, W> {
    fn drop(&mut self) {
        if !self.keep_open {
            Stage::close(self.stage);
        }
        self.stage.release();
    }
}

/// A reservation granted on a neighbour, withdrawn unless a delivery commits it.
struct Claim<'a, W: WorkUnit> {
    stage: &'a dyn Stage<W>,
    committed: bool,
}

impl<'a, W: WorkUnit> Claim<'a, W> {
    fn new(stage: &'a dyn Stage<W>) -> Self {
        Self {
            stage,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<W: WorkUnit> Drop for Claim<'_, W> {
    fn drop(&mut self) {
        if !self.committed {
            self.stage.withdraw();
        }
    }
}

/// Closes the stage when its loop exits, including on task abort.
struct CloseOnExit<'a, W: WorkUnit> {
    stage: &'a PipelineStage<W>,
}

impl<W: WorkUnit> Drop for CloseOnExit<'_, W> {
    fn drop(&mut self) {
        Stage::close(self.stage);
        self.stage.behavior.close_inbox();
        self.stage
            .events
            .try_emit(STAGE_STOPPED, Some(serde_json::json!({ "stage": self.stage.name })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::stages::{NullStage, QueueBehavior, StageQueue};
    use crate::testing::TestUnit;
    use std::time::Duration;

    fn passthrough(name: &str) -> Arc<QueueBehavior<TestUnit>> {
        Arc::new(QueueBehavior::passthrough(StageQueue::with_capacity(name, 1)))
    }

    #[tokio::test]
    async fn test_stage_exits_immediately_when_downstream_closed_and_idle() {
        let stage = Arc::new(PipelineStage::<TestUnit>::new(
            "fetch",
            passthrough("fetch"),
            Arc::new(NullStage::closed("end")),
            Arc::new(NullStage::discarding("errors")),
        ));

        let result = tokio::time::timeout(Duration::from_secs(1), stage.start().unwrap())
            .await
            .expect("stage should exit")
            .unwrap();
        assert!(result.is_ok());
        assert!(Stage::is_closed(&*stage));

        // A late delivery into the exited stage is refused, not swallowed.
        let late = Stage::put(&*stage, TestUnit::new("late")).await;
        assert!(matches!(late, Err(PipelineError::QueueClosed { .. })));
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected_without_closing() {
        let stage = Arc::new(PipelineStage::<TestUnit>::new(
            "fetch",
            passthrough("fetch"),
            Arc::new(NullStage::discarding("end")),
            Arc::new(NullStage::discarding("errors")),
        ));
        let handle = stage.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = stage.run().await;
        assert!(matches!(second, Err(PipelineError::Validation(_))));
        assert!(!Stage::is_closed(&*stage));

        stage.cancel("test over");
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled(reason)) if reason == "test over"));
        assert!(Stage::is_closed(&*stage));
    }

    #[tokio::test]
    async fn test_delivered_unit_reaches_downstream_and_emits_record() {
        let sink = Arc::new(NullStage::discarding("sink"));
        let events = Arc::new(CollectingEventSink::new());
        let stage = Arc::new(
            PipelineStage::<TestUnit>::new(
                "execute",
                passthrough("execute"),
                sink.clone(),
                Arc::new(NullStage::discarding("errors")),
            )
            .with_event_sink(events.clone()),
        );
        let handle = stage.start().unwrap();

        assert!(stage.submit(TestUnit::new("op-1")).await.unwrap());
        // The second submit only succeeds after the first iteration released.
        assert!(stage.submit(TestUnit::new("op-2")).await.unwrap());

        Stage::close(&*stage);
        handle.await.unwrap().unwrap();

        assert_eq!(sink.discarded(), 2);
        let records: Vec<IterationRecord> = events
            .payloads_of(ITERATION_COMPLETED)
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(IterationRecord::success));
        assert_eq!(records[0].unit, "op-1");
        assert_eq!(events.events_of_type(STAGE_STOPPED).len(), 1);
    }

    #[tokio::test]
    async fn test_submit_to_closed_stage_returns_false() {
        let stage = PipelineStage::<TestUnit>::new(
            "fetch",
            passthrough("fetch"),
            Arc::new(NullStage::discarding("end")),
            Arc::new(NullStage::discarding("errors")),
        );
        Stage::close(&stage);
        assert!(!stage.submit(TestUnit::new("op-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_lets_next_submit_through() {
        let stage = PipelineStage::<TestUnit>::new(
            "fetch",
            Arc::new(QueueBehavior::passthrough(StageQueue::with_capacity("fetch", 2))),
            Arc::new(NullStage::discarding("end")),
            Arc::new(NullStage::discarding("errors")),
        );
        assert!(stage.submit(TestUnit::new("op-1")).await.unwrap());
        assert!(stage.is_reserved());

        stage.release();
        assert!(!stage.is_reserved());
        // A spurious extra release leaves the state alone.
        stage.release();
        assert!(stage.submit(TestUnit::new("op-2")).await.unwrap());
        assert!(stage.is_reserved());
    }

    #[tokio::test]
    async fn test_aborted_task_still_closes_stage() {
        let stage = Arc::new(PipelineStage::<TestUnit>::new(
            "execute",
            passthrough("execute"),
            Arc::new(NullStage::discarding("end")),
            Arc::new(NullStage::discarding("errors")),
        ));
        let handle = stage.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(Stage::is_closed(&*stage));
    }
}
