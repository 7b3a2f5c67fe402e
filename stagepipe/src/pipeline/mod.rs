//! Pipeline assembly and execution.
//!
//! This module provides:
//! - [`PipelineConfig`], the serde-loadable runtime settings
//! - [`Pipeline`], which starts, closes, cancels and joins a set of stages

mod config;
mod runner;


pub use config::PipelineConfig;
pub use runner::Pipeline;
