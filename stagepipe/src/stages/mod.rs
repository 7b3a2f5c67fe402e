//! Stage traits and implementations.
//!
//! A pipeline is a chain of [`PipelineStage`]s. Each stage pulls one unit at
//! a time from its inbox, transforms it through a [`StageBehavior`] and hands
//! the result to its downstream neighbour. Neighbours talk to each other only
//! through the [`Stage`] interface: a stage must [`Stage::reserve`] its
//! downstream before calling [`Stage::put`] on it.

mod behavior;
mod null;
mod pipeline_stage;
mod queue;
mod reservation;

pub use behavior::QueueBehavior;
pub use null::NullStage;
pub use pipeline_stage::PipelineStage;
pub use queue::StageQueue;
pub use reservation::Reservation;

use crate::errors::PipelineError;
use async_trait::async_trait;

/// A unit of work flowing through a pipeline.
///
/// Stages never mutate a unit in place: a transformation produces a new
/// value, and the original may still be diverted to an error stage.
pub trait WorkUnit: Clone + Send + Sync + 'static {
    /// Returns the identifying name used in diagnostics.
    fn name(&self) -> &str;
}

/// The neighbour-facing side of a stage.
///
/// Implemented by [`PipelineStage`] and by the [`NullStage`] pseudo-stage
/// used at the ends of a chain.
#[async_trait]
pub trait Stage<W: WorkUnit>: Send + Sync {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Requests the right to deliver exactly one unit to this stage.
    ///
    /// Waits while another reservation is outstanding. Returns `false` once
    /// the stage is closed. Dropping the future abandons the request without
    /// leaving a reservation behind.
    async fn reserve(&self) -> bool;

    /// Returns a reservation that was granted but never used for a delivery.
    ///
    /// Only the reserving stage may call this, and only when its delivery was
    /// cancelled or failed before the unit was handed over.
    fn withdraw(&self);

    /// Delivers a unit into this stage's inbox.
    async fn put(&self, unit: W) -> Result<(), PipelineError>;

    /// Permanently stops accepting reservations. Idempotent.
    fn close(&self);

    /// Returns true once the stage has closed.
    fn is_closed(&self) -> bool;

    /// Resolves once the stage has closed.
    async fn closed(&self);
}

/// The capabilities a concrete stage supplies to its [`PipelineStage`].
///
/// `take` and `put` operate on the stage's own inbox; `put` is what an
/// upstream neighbour ends up calling after a successful reservation.
#[async_trait]
pub trait StageBehavior<W: WorkUnit>: Send + Sync {
    /// Waits for the next unit in this stage's inbox.
    async fn take(&self) -> Result<W, PipelineError>;

    /// Places a unit in this stage's inbox.
    async fn put(&self, unit: W) -> Result<(), PipelineError>;

    /// Transforms a unit. `Ok(None)` means the unit ends its journey here.
    ///
    /// The default passes a copy of the unit through unchanged.
    async fn tick(&self, unit: &W) -> Result<Option<W>, PipelineError> {
        Ok(Some(unit.clone()))
    }

    /// Runs once per iteration with the original unit, whatever the outcome.
    fn after(&self, _unit: &W) {}

    /// Called once the stage loop has exited. Inboxes should refuse further
    /// units so a late delivery fails instead of vanishing.
    fn close_inbox(&self) {}
}
