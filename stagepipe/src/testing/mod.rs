//! Testing utilities for stage pipelines.
//!
//! This module provides:
//! - [`TestUnit`], a work unit that records the stages it visited
//! - Scripted behaviors for building chains in tests
//! - [`CollectingStage`], a sink that keeps what it receives

mod mocks;
mod unit;

pub use mocks::{CollectingStage, FailingBehavior, RecordingBehavior, SlowBehavior};
pub use unit::TestUnit;
