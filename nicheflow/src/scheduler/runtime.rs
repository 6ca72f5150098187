//! Per-stage runtime state.

use crate::core::RunStatus;
use crate::errors::{NicheflowError, PrerequisiteMissing};
use crate::pipeline::{StageSpec, StageWork, StreamStageSpec};
use crate::project::ProjectData;
use crate::stream::{AnalyzeRequest, ProgressStream};
use crate::tasks::TaskRunner;
use std::sync::Arc;

/// What executes a stage.
#[derive(Debug, Clone)]
pub enum StageRuntime {
    /// A task list.
    Tasks(Arc<TaskRunner>),
    /// A progress stream.
    Stream(Arc<ProgressStream>),
}

impl StageRuntime {
    /// Current status, with stream states mapped onto run statuses.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Tasks(runner) => runner.status(),
            Self::Stream(stream) => stream.state().into(),
        }
    }

    /// Returns true while a run is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    /// Stops a task run or closes a stream.
    pub fn stop(&self, reason: &str) -> bool {
        match self {
            Self::Tasks(runner) => runner.stop(reason),
            Self::Stream(stream) => stream.close(reason),
        }
    }
}

/// A stage definition with its runtime.
#[derive(Debug, Clone)]
pub(crate) struct StageSlot {
    pub(crate) spec: Arc<StageSpec>,
    pub(crate) runtime: StageRuntime,
}

impl StageSlot {
    /// Checks that a run could start now, without starting it.
    ///
    /// Busy stages and stream stages without a readable request are refused.
    pub(crate) fn admit(&self, project: &ProjectData) -> Result<(), NicheflowError> {
        if self.runtime.is_running() {
            return Err(NicheflowError::StageBusy(self.spec.id.clone()));
        }
        if let StageWork::Stream(work) = &self.spec.work {
            self.request(work, project)?;
        }
        Ok(())
    }

    /// Runs the stage once and reports the terminal status.
    pub(crate) async fn execute(&self, project: &Arc<ProjectData>) -> Result<RunStatus, NicheflowError> {
        match (&self.runtime, &self.spec.work) {
            (StageRuntime::Tasks(runner), _) => Ok(runner.run(project).await?.status),
            (StageRuntime::Stream(stream), StageWork::Stream(work)) => {
                let request = self.request(work, project)?;
                stream.start(request, project).await?;
                Ok(RunStatus::Completed)
            }
            (StageRuntime::Stream(_), StageWork::Tasks(_)) => Err(NicheflowError::InvalidState(format!(
                "stage '{}' has a stream runtime but a task list",
                self.spec.id
            ))),
        }
    }

    fn request(&self, work: &StreamStageSpec, project: &ProjectData) -> Result<AnalyzeRequest, NicheflowError> {
        let value = project
            .get(&work.request_key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| PrerequisiteMissing::new(&self.spec.id, vec![work.request_key.clone()]))?;
        AnalyzeRequest::from_value(&value)
    }
}
