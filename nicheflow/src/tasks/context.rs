//! Execution context handed to task bodies.

use super::runner::TaskState;
use super::TaskOutput;
use crate::cancellation::CancellationToken;
use crate::core::{PipelineEvent, TaskStatus};
use crate::errors::TaskFailure;
use crate::events::EventSink;
use crate::project::ScopedProjectView;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Context for one task execution.
///
/// Cheap to clone; every clone reports into the same task record.
#[derive(Clone)]
pub struct TaskContext {
    stage: Arc<str>,
    task: Arc<str>,
    index: usize,
    run_id: Uuid,
    project: ScopedProjectView,
    outputs: Arc<HashMap<String, TaskOutput>>,
    token: Arc<CancellationToken>,
    states: Arc<RwLock<Vec<TaskState>>>,
    sink: Arc<dyn EventSink>,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stage: Arc<str>,
        task: Arc<str>,
        index: usize,
        run_id: Uuid,
        project: ScopedProjectView,
        outputs: Arc<HashMap<String, TaskOutput>>,
        token: Arc<CancellationToken>,
        states: Arc<RwLock<Vec<TaskState>>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            stage,
            task,
            index,
            run_id,
            project,
            outputs,
            token,
            states,
            sink,
        }
    }

    /// Returns the owning stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage
    }

    /// Returns the task id.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Project data readable by this task.
    #[must_use]
    pub fn project(&self) -> &ScopedProjectView {
        &self.project
    }

    /// Output of an earlier task in the same run.
    #[must_use]
    pub fn output_of(&self, task_id: &str) -> Option<&TaskOutput> {
        self.outputs.get(task_id)
    }

    /// Reports progress for this task.
    ///
    /// Values are clamped to 99 (only completion reaches 100) and values
    /// lower than the current progress are ignored.
    pub fn report_progress(&self, progress: u8) {
        let progress = progress.min(99);
        {
            let mut states = self.states.write();
            let Some(state) = states.get_mut(self.index) else {
                return;
            };
            if state.status != TaskStatus::Running || progress <= state.progress {
                return;
            }
            state.progress = progress;
        }
        self.sink
            .emit(PipelineEvent::task_progress(&self.stage, &self.task, progress));
    }

    /// Current progress of this task.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.states.read().get(self.index).map_or(0, |s| s.progress)
    }

    /// Returns true once `stop()` has been requested for this run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cooperative cancellation point.
    ///
    /// # Errors
    ///
    /// Returns the stop failure if the run has been stopped.
    pub fn checkpoint(&self) -> Result<(), TaskFailure> {
        if self.token.is_cancelled() {
            Err(TaskFailure::stopped(self.task.as_ref()))
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless the run is stopped first.
    ///
    /// # Errors
    ///
    /// Returns the stop failure if the run is stopped before or during the sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), TaskFailure> {
        self.checkpoint()?;
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.token.cancelled() => Err(TaskFailure::stopped(self.task.as_ref())),
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("stage", &self.stage)
            .field("task", &self.task)
            .field("run_id", &self.run_id)
            .finish()
    }
}
