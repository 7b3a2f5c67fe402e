//! # Stagepipe
//!
//! Reservation-based pipeline stages with one-ahead backpressure.
//!
//! A pipeline is a linear chain of stages, each running its own loop on a
//! tokio task. A stage may hand a unit to its downstream neighbour only after
//! reserving it, and a stage releases its own reservation only once it has
//! finished with the current unit. This keeps every stage at most one unit
//! ahead of the next, so a slow stage throttles the whole chain.
//!
//! - **Error diversion**: when the downstream has closed, the original unit
//!   goes to the stage's error stage instead of being lost
//! - **Cascading shutdown**: closing the tail of a chain drains and stops
//!   every stage upstream of it
//! - **Cancellation**: any stage can be cancelled while waiting, without
//!   leaking a reservation on its neighbour
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagepipe::prelude::*;
//!
//! let errors = Arc::new(NullStage::discarding("errors"));
//! let sink = Arc::new(NullStage::discarding("sink"));
//! let execute = Arc::new(PipelineStage::new(
//!     "execute",
//!     Arc::new(QueueBehavior::passthrough(StageQueue::with_capacity("execute", 1))),
//!     sink,
//!     errors.clone(),
//! ));
//!
//! let mut pipeline = Pipeline::new("worker", PipelineConfig::new());
//! pipeline.add(execute.clone())?;
//! pipeline.start()?;
//!
//! execute.submit(operation).await?;
//! pipeline.close();
//! pipeline.join_with_timeout().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::errors::{PipelineError, PipelineValidationError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, IterationOutcome, IterationRecord};
    pub use crate::pipeline::{Pipeline, PipelineConfig};
    pub use crate::stages::{
        NullStage, PipelineStage, QueueBehavior, Reservation, Stage, StageBehavior, StageQueue,
        WorkUnit,
    };
    pub use std::sync::Arc;
}
