//! Event sinks for stage diagnostics.
//!
//! Stages report their lifecycle and one record per iteration through an
//! [`EventSink`]. Event types emitted by the crate:
//!
//! - `stage.started` / `stage.stopped`
//! - `stage.iteration.started`
//! - `stage.iteration.completed` (payload: an
//!   [`IterationRecord`](crate::observability::IterationRecord))

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event emitted when a stage task begins its driving loop.
pub const STAGE_STARTED: &str = "stage.started";
/// Event emitted when a stage task has closed itself.
pub const STAGE_STOPPED: &str = "stage.stopped";
/// Event emitted after a unit has been taken from the inbox.
pub const ITERATION_STARTED: &str = "stage.iteration.started";
/// Event emitted once per processed unit.
pub const ITERATION_COMPLETED: &str = "stage.iteration.completed";
