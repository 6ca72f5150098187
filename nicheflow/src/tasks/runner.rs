//! Sequential task runner.
//!
//! Drives an ordered task list: task *i + 1* never starts before task *i*
//! reaches a terminal status. A failure halts the run; there is no automatic
//! retry. `stop()` is cooperative and ends the run as `stopped`.

use super::context::TaskContext;
use super::{TaskOutput, TaskSpec};
use crate::cancellation::CancellationToken;
use crate::core::{PipelineEvent, RunStatus, TaskStatus};
use crate::errors::{NicheflowError, TaskFailure, UndeclaredKeyError};
use crate::events::{noop_sink, EventSink};
use crate::project::{ProjectData, ScopedProjectView};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Observable record of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    /// Task id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Progress in percent, 0..=100.
    pub progress: u8,
    /// Failure message, if the task failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskState {
    fn pending(spec: &TaskSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: Uuid,
    /// Stage id.
    pub stage: String,
    /// Final run status.
    pub status: RunStatus,
    /// Task records at the end of the run.
    pub tasks: Vec<TaskState>,
    /// Failure message for failed or stopped runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub ended_at: DateTime<Utc>,
}

impl RunReport {
    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }

    /// Returns the status of a task by id.
    #[must_use]
    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id == task_id).map(|t| t.status)
    }
}

/// Runs a stage's tasks in order.
pub struct TaskRunner {
    stage: Arc<str>,
    tasks: Vec<TaskSpec>,
    readable: Arc<HashSet<String>>,
    states: Arc<RwLock<Vec<TaskState>>>,
    status: RwLock<RunStatus>,
    token: RwLock<Arc<CancellationToken>>,
    last_report: RwLock<Option<RunReport>>,
    sink: Arc<dyn EventSink>,
}

impl TaskRunner {
    /// Creates a runner for a stage.
    ///
    /// Tasks may read `prerequisites` and any key produced by a task of the
    /// same stage.
    #[must_use]
    pub fn new(stage: impl Into<String>, prerequisites: &[String], tasks: Vec<TaskSpec>) -> Self {
        let readable: HashSet<String> = prerequisites
            .iter()
            .cloned()
            .chain(tasks.iter().flat_map(|t| t.produces.iter().cloned()))
            .collect();
        let states = tasks.iter().map(TaskState::pending).collect();

        Self {
            stage: Arc::from(stage.into()),
            tasks,
            readable: Arc::new(readable),
            states: Arc::new(RwLock::new(states)),
            status: RwLock::new(RunStatus::Idle),
            token: RwLock::new(Arc::new(CancellationToken::new())),
            last_report: RwLock::new(None),
            sink: noop_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Returns a snapshot of every task record.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskState> {
        self.states.read().clone()
    }

    /// Returns the run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    /// Returns the report of the last finished run.
    #[must_use]
    pub fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().clone()
    }

    /// Mean task progress, 0.0..=100.0.
    #[must_use]
    pub fn overall_progress(&self) -> f64 {
        let states = self.states.read();
        if states.is_empty() {
            return 0.0;
        }
        let total: u32 = states.iter().map(|s| u32::from(s.progress)).sum();
        f64::from(total) / states.len() as f64
    }

    /// Returns true if every task completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.states.read().iter().all(|s| s.status == TaskStatus::Completed)
    }

    /// Requests a cooperative stop of the current run.
    ///
    /// Returns true if a running run was signalled.
    pub fn stop(&self, reason: impl Into<String>) -> bool {
        if self.status() != RunStatus::Running {
            return false;
        }
        self.token.read().cancel(reason)
    }

    /// Runs every task in order.
    ///
    /// Each run starts from fresh task records, so calling `run` again after
    /// a failure is the explicit re-run.
    ///
    /// # Errors
    ///
    /// Returns `StageBusy` if a run is already in flight. Task failures are
    /// reported through the returned `RunReport`, not as errors.
    pub async fn run(&self, project: &Arc<ProjectData>) -> Result<RunReport, NicheflowError> {
        {
            let mut status = self.status.write();
            if *status == RunStatus::Running {
                return Err(NicheflowError::StageBusy(self.stage.to_string()));
            }
            *status = RunStatus::Running;
            // A stop that sees Running also sees this run's token.
            *self.token.write() = Arc::new(CancellationToken::new());
        }

        let token = self.token.read().clone();
        *self.states.write() = self.tasks.iter().map(TaskState::pending).collect();

        let run_id = Uuid::new_v4();
        let span = info_span!("task_run", stage = %self.stage, run_id = %run_id);
        let report = self.execute(project, run_id, token).instrument(span).await;

        *self.status.write() = report.status;
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    async fn execute(
        &self,
        project: &Arc<ProjectData>,
        run_id: Uuid,
        token: Arc<CancellationToken>,
    ) -> RunReport {
        let started_at = Utc::now();
        let run_label = run_id.to_string();
        info!(tasks = self.tasks.len(), "Run started");
        self.sink
            .emit(PipelineEvent::run_started(&self.stage, &run_label, self.tasks.len()));

        let mut outputs: HashMap<String, TaskOutput> = HashMap::new();
        let mut status = RunStatus::Completed;
        let mut error = None;

        for (index, spec) in self.tasks.iter().enumerate() {
            if token.is_cancelled() {
                status = RunStatus::Stopped;
                error = token.reason();
                break;
            }

            self.update(index, |state| state.status = TaskStatus::Running);
            info!(task = %spec.id, "Task started");
            self.sink.emit(PipelineEvent::task_started(&self.stage, &spec.id));

            let ctx = TaskContext::new(
                self.stage.clone(),
                Arc::from(spec.id.as_str()),
                index,
                run_id,
                ScopedProjectView::new(project.clone(), self.stage.as_ref(), &spec.id, self.readable.clone()),
                Arc::new(outputs.clone()),
                token.clone(),
                self.states.clone(),
                self.sink.clone(),
            );

            let result = spec
                .body
                .execute(&ctx)
                .await
                .and_then(|output| self.check_contract(spec, output));

            match result {
                Ok(output) => {
                    let written: Vec<String> = output.keys().cloned().collect();
                    project.merge(output.to_map());
                    self.update(index, |state| {
                        state.status = TaskStatus::Completed;
                        state.progress = 100;
                    });
                    info!(task = %spec.id, writes = ?written, "Task completed");
                    self.sink
                        .emit(PipelineEvent::task_completed(&self.stage, &spec.id, &written));
                    outputs.insert(spec.id.clone(), output);
                }
                Err(mut failure) => {
                    if failure.task.is_empty() {
                        failure.task = spec.id.clone();
                    }
                    let stopped = failure.is_stop() || token.is_cancelled();
                    self.update(index, |state| {
                        state.status = TaskStatus::Failed;
                        state.error = Some(failure.message.clone());
                    });
                    warn!(task = %spec.id, error = %failure.message, stopped, "Task did not complete");
                    self.sink
                        .emit(PipelineEvent::task_failed(&self.stage, &spec.id, &failure.message));

                    status = if stopped { RunStatus::Stopped } else { RunStatus::Failed };
                    error = Some(failure.to_string());
                    break;
                }
            }
        }

        let report = RunReport {
            run_id,
            stage: self.stage.to_string(),
            status,
            tasks: self.tasks(),
            error,
            started_at,
            ended_at: Utc::now(),
        };

        info!(status = %report.status, duration_ms = report.duration_ms(), "Run finished");
        self.sink.emit(PipelineEvent::run_finished(
            &self.stage,
            &run_label,
            report.status,
            report.duration_ms(),
        ));
        report
    }

    fn check_contract(&self, spec: &TaskSpec, output: TaskOutput) -> Result<TaskOutput, TaskFailure> {
        let undeclared = output.keys().find(|key| !spec.produces.contains(*key)).cloned();
        match undeclared {
            Some(key) => Err(UndeclaredKeyError::write(self.stage.as_ref(), &spec.id, key).into()),
            None => Ok(output),
        }
    }

    fn update(&self, index: usize, apply: impl FnOnce(&mut TaskState)) {
        if let Some(state) = self.states.write().get_mut(index) {
            apply(state);
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("stage", &self.stage)
            .field("tasks", &self.tasks.len())
            .field("status", &self.status())
            .finish()
    }
}
