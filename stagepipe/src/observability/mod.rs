//! Observability utilities: iteration timing, per-iteration records and
//! `tracing` subscriber setup.

mod record;
mod subscriber;
mod timing;

pub use record::{IterationOutcome, IterationRecord};
pub use subscriber::init_tracing;
pub use timing::Stopwatch;
