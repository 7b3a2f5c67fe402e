//! Assembly and lifecycle of a chain of stages.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::PipelineConfig;
use crate::errors::{PipelineError, PipelineValidationError};
use crate::stages::{PipelineStage, Stage, WorkUnit};

type StageTask = (String, JoinHandle<Result<(), PipelineError>>);

/// A set of wired stages started and stopped together.
///
/// Stages are wired before they are added (each one already references its
/// downstream and error stages). [`Pipeline::start`] spawns them in the order
/// they were added.
pub struct Pipeline<W: WorkUnit> {
    name: String,
    run_id: Uuid,
    config: PipelineConfig,
    stages: Vec<Arc<PipelineStage<W>>>,
    tasks: Mutex<Vec<StageTask>>,
}

impl<W: WorkUnit> Pipeline<W> {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            name: name.into(),
            run_id: Uuid::now_v7(),
            config,
            stages: Vec::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Adds a stage. Stage names must be unique within a pipeline.
    pub fn add(&mut self, stage: Arc<PipelineStage<W>>) -> Result<&mut Self, PipelineValidationError> {
        let name = Stage::name(&*stage);
        if self.stage(name).is_some() {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage name '{name}' in pipeline '{}'",
                self.name
            ))
            .with_stages(vec![name.to_string()]));
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identifier of this pipeline run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Arc<PipelineStage<W>>> {
        self.stages.iter().find(|s| Stage::name(&***s) == name)
    }

    /// Spawns every stage onto the current tokio runtime.
    pub fn start(&self) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            ))
            .into());
        }
        if let Some(started) = self.stages.iter().find(|s| s.is_started()) {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' already started",
                self.name
            ))
            .with_stages(vec![Stage::name(&**started).to_string()])
            .into());
        }

        info!(
            pipeline = %self.name,
            run_id = %self.run_id,
            stages = self.stages.len(),
            "Starting pipeline"
        );
        let mut tasks = self.tasks.lock();
        for stage in &self.stages {
            tasks.push((Stage::name(&**stage).to_string(), stage.start()?));
        }
        Ok(())
    }

    /// Closes every stage. Each one exits once its pending reservation drains.
    pub fn close(&self) {
        for stage in &self.stages {
            Stage::close(&**stage);
        }
    }

    /// Cancels every stage's driving loop.
    pub fn cancel(&self, reason: &str) {
        warn!(pipeline = %self.name, run_id = %self.run_id, reason, "Cancelling pipeline");
        for stage in &self.stages {
            stage.cancel(reason);
        }
    }

    /// Returns true once every stage has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stages.iter().all(|s| Stage::is_closed(&**s))
    }

    /// Waits for every started stage to exit.
    ///
    /// Cancellation is a normal exit. Returns the first other failure.
    pub async fn join(&self) -> Result<(), PipelineError> {
        let tasks: Vec<StageTask> = std::mem::take(&mut *self.tasks.lock());
        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();

        let mut first_error = None;
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(e)) if e.is_cancelled() => None,
                Ok(Err(e)) => Some(e),
                Err(join_error) => Some(PipelineError::Join(format!("stage '{name}': {join_error}"))),
            };
            if let Some(e) = failure {
                warn!(pipeline = %self.name, stage = %name, error = %e, "Stage exited with error");
                first_error.get_or_insert(e);
            }
        }

        info!(pipeline = %self.name, run_id = %self.run_id, "Pipeline stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Waits up to the configured shutdown timeout for every stage to close,
    /// cancels the stragglers, then joins.
    pub async fn join_with_timeout(&self) -> Result<(), PipelineError> {
        let all_closed = join_all(self.stages.iter().map(|s| Stage::closed(&**s)));
        if tokio::time::timeout(self.config.shutdown_timeout(), all_closed)
            .await
            .is_err()
        {
            self.cancel("shutdown timeout elapsed");
        }
        self.join().await
    }
}

impl<W: WorkUnit> std::fmt::Debug for Pipeline<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("stages", &self.stages.len())
            .field("running", &self.tasks.lock().len())
            .finish()
    }
}
