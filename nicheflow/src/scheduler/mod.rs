//! Auto-mode scheduling of stage runs.
//!
//! The scheduler owns one runtime per stage (a [`TaskRunner`] or a
//! [`ProgressStream`]) and the [`PipelineController`]. With auto mode on it
//! starts every reachable stage whose prerequisites are present, at most once
//! per stage, and advances the cursor after the current Phase 1 stage
//! completes. Turning auto mode off never interrupts an in-flight run.

mod runtime;

pub use runtime::StageRuntime;

use crate::config::{NicheflowConfig, SchedulerConfig, StreamConfig};
use crate::core::{Phase, PipelineEvent, RunStatus};
use crate::errors::{NicheflowError, PipelineValidationError};
use crate::events::{noop_sink, EventSink};
use crate::pipeline::{Pipeline, PipelineController, PipelinePosition, StageWork};
use crate::project::{ProjectData, ProjectMap};
use crate::stream::{AnalysisTransport, ProgressStream};
use crate::tasks::TaskRunner;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use runtime::StageSlot;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for [`AutoModeScheduler`].
pub struct SchedulerBuilder {
    pipeline: Pipeline,
    project: Option<Arc<ProjectData>>,
    scheduler: SchedulerConfig,
    stream: StreamConfig,
    #[cfg(feature = "http")]
    analysis: crate::config::AnalysisServiceConfig,
    transport: Option<Arc<dyn AnalysisTransport>>,
    sink: Arc<dyn EventSink>,
}

impl SchedulerBuilder {
    fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            project: None,
            scheduler: SchedulerConfig::default(),
            stream: StreamConfig::default(),
            #[cfg(feature = "http")]
            analysis: crate::config::AnalysisServiceConfig::default(),
            transport: None,
            sink: noop_sink(),
        }
    }

    /// Uses an existing project store instead of an empty one.
    #[must_use]
    pub fn project(mut self, project: Arc<ProjectData>) -> Self {
        self.project = Some(project);
        self
    }

    /// Applies every section of a loaded configuration.
    #[must_use]
    pub fn config(mut self, config: &NicheflowConfig) -> Self {
        self.scheduler = config.scheduler.clone();
        self.stream = config.stream.clone();
        #[cfg(feature = "http")]
        {
            self.analysis = config.analysis.clone();
        }
        self
    }

    /// Sets the scheduler configuration.
    #[must_use]
    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Sets the configuration handed to every progress stream.
    #[must_use]
    pub fn stream_config(mut self, config: StreamConfig) -> Self {
        self.stream = config;
        self
    }

    /// Sets the analysis transport used by stream stages.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn AnalysisTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses an HTTP transport built from the analysis service configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    #[cfg(feature = "http")]
    pub fn http_transport(mut self) -> Result<Self, NicheflowError> {
        let transport = crate::stream::HttpTransport::new(self.analysis.clone())?;
        self.transport = Some(Arc::new(transport));
        Ok(self)
    }

    /// Sets the event sink shared by the controller, runners and streams.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Builds the scheduler.
    ///
    /// Must be called inside a Tokio runtime; stage runs are spawned on it.
    ///
    /// # Errors
    ///
    /// - `Validation` (`PIPELINE-NO-TRANSPORT`) if a stream stage has no
    ///   transport.
    /// - `InvalidState` outside a Tokio runtime.
    pub fn build(self) -> Result<AutoModeScheduler, NicheflowError> {
        let handle = Handle::try_current().map_err(|_| {
            NicheflowError::InvalidState("the scheduler must be built inside a Tokio runtime".to_string())
        })?;

        let mut slots = HashMap::new();
        for spec in self.pipeline.stages() {
            let runtime = match (&spec.work, &self.transport) {
                (StageWork::Tasks(tasks), _) => StageRuntime::Tasks(Arc::new(
                    TaskRunner::new(&spec.id, &spec.prerequisites, tasks.clone())
                        .with_event_sink(self.sink.clone()),
                )),
                (StageWork::Stream(work), Some(transport)) => StageRuntime::Stream(Arc::new(
                    ProgressStream::new(&spec.id, &work.output_key, transport.clone())
                        .with_config(self.stream.clone())
                        .with_event_sink(self.sink.clone()),
                )),
                (StageWork::Stream(_), None) => {
                    return Err(PipelineValidationError::new(
                        "PIPELINE-NO-TRANSPORT",
                        format!("Stream stage '{}' has no analysis transport", spec.id),
                    )
                    .with_stages(vec![spec.id.clone()])
                    .into());
                }
            };
            slots.insert(
                spec.id.clone(),
                StageSlot {
                    spec: spec.clone(),
                    runtime,
                },
            );
        }

        let controller = PipelineController::new(&self.pipeline).with_event_sink(self.sink.clone());
        info!(
            pipeline = %self.pipeline.name(),
            stages = slots.len(),
            auto_mode = self.scheduler.auto_mode,
            "Scheduler ready"
        );

        Ok(AutoModeScheduler {
            inner: Arc::new(Inner {
                pipeline: self.pipeline,
                controller,
                project: self.project.unwrap_or_default(),
                slots,
                started: DashSet::new(),
                waiting: DashMap::new(),
                auto_mode: AtomicBool::new(self.scheduler.auto_mode),
                settle_delay: self.scheduler.settle_delay(),
                advances: AtomicUsize::new(0),
                pending: Mutex::new(Vec::new()),
                handle,
                sink: self.sink,
            }),
        })
    }
}

struct Inner {
    pipeline: Pipeline,
    controller: PipelineController,
    project: Arc<ProjectData>,
    slots: HashMap<String, StageSlot>,
    /// Set once per stage, never cleared.
    started: DashSet<String>,
    /// Last reported missing prerequisites per waiting stage.
    waiting: DashMap<String, Vec<String>>,
    auto_mode: AtomicBool,
    settle_delay: Duration,
    advances: AtomicUsize,
    pending: Mutex<Vec<JoinHandle<()>>>,
    handle: Handle,
    sink: Arc<dyn EventSink>,
}

/// Starts stages when their inputs appear and advances the cursor.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct AutoModeScheduler {
    inner: Arc<Inner>,
}

impl AutoModeScheduler {
    /// Starts building a scheduler for `pipeline`.
    #[must_use]
    pub fn builder(pipeline: Pipeline) -> SchedulerBuilder {
        SchedulerBuilder::new(pipeline)
    }

    /// Returns the pipeline definition.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Returns the controller.
    #[must_use]
    pub fn controller(&self) -> &PipelineController {
        &self.inner.controller
    }

    /// Returns the shared project data.
    #[must_use]
    pub fn project(&self) -> &Arc<ProjectData> {
        &self.inner.project
    }

    /// Returns the current auto-mode flag.
    #[must_use]
    pub fn auto_mode(&self) -> bool {
        self.inner.auto_mode.load(Ordering::SeqCst)
    }

    /// Turns auto mode on or off.
    ///
    /// Turning it on evaluates immediately and returns the stages it
    /// started. Turning it off only suppresses future starts and advances.
    pub fn set_auto_mode(&self, enabled: bool) -> Vec<String> {
        let previous = self.inner.auto_mode.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Auto mode toggled");
            self.inner
                .sink
                .emit(PipelineEvent::new("pipeline.auto_mode").add_data("enabled", json!(enabled)));
        }
        if enabled {
            self.evaluate()
        } else {
            Vec::new()
        }
    }

    /// Starts every eligible stage and returns their ids.
    ///
    /// A stage is eligible when auto mode is on, it is reachable, it has
    /// never been started, and its prerequisites are all present.
    pub fn evaluate(&self) -> Vec<String> {
        if !self.auto_mode() {
            return Vec::new();
        }

        let mut started = Vec::new();
        for stage in self.inner.controller.reachable_stages() {
            if self.inner.started.contains(&stage) {
                continue;
            }
            let Some(slot) = self.inner.slots.get(&stage) else {
                continue;
            };

            let missing = self.inner.project.missing(&slot.spec.prerequisites);
            if !missing.is_empty() {
                if self.inner.waiting.insert(stage.clone(), missing.clone()).as_ref() != Some(&missing) {
                    debug!(stage = %stage, missing = ?missing, "Auto-start waiting on prerequisites");
                    self.inner.sink.emit(
                        PipelineEvent::new("stage.prerequisites_missing")
                            .add_data("stage", json!(stage))
                            .add_data("missing", json!(missing)),
                    );
                }
                continue;
            }

            if !self.inner.started.insert(stage.clone()) {
                continue;
            }
            self.inner.waiting.remove(&stage);
            info!(stage = %stage, "Auto-starting stage");
            self.inner
                .sink
                .emit(PipelineEvent::new("stage.auto_started").add_data("stage", json!(stage)));
            self.spawn_run(stage.clone());
            started.push(stage);
        }
        started
    }

    /// Merges a partial update into the project and re-evaluates.
    ///
    /// Returns the keys whose values changed.
    pub fn merge(&self, partial: ProjectMap) -> Vec<String> {
        let changed = self.inner.project.merge(partial);
        self.evaluate();
        changed
    }

    /// Starts a stage in the background, bypassing auto mode.
    ///
    /// # Errors
    ///
    /// - `UnknownStage` if no such stage exists.
    /// - `StageBusy` if it is already running.
    /// - `PrerequisiteMissing` for a stream stage whose request key is absent.
    /// - `InvalidState` for a stream stage whose request cannot be parsed.
    ///
    /// A refused start leaves the stage eligible for auto mode.
    pub fn start_stage(&self, stage: &str) -> Result<(), NicheflowError> {
        self.admit(stage)?;
        info!(stage, "Stage started manually");
        self.spawn_run(stage.to_string());
        Ok(())
    }

    /// Runs a stage to completion, bypassing auto mode.
    ///
    /// This is also the explicit re-run after a failure.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`start_stage`](Self::start_stage), plus
    /// any terminal stream error.
    pub async fn run_stage(&self, stage: &str) -> Result<RunStatus, NicheflowError> {
        self.admit(stage)?;
        self.execute(stage).await
    }

    /// Stops a running task stage or closes a streaming stage.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage` if no such stage exists.
    pub fn stop_stage(&self, stage: &str) -> Result<bool, NicheflowError> {
        Ok(self.slot(stage)?.runtime.stop("stopped by operator"))
    }

    /// Manually advances the cursor and re-evaluates.
    pub fn advance(&self) -> PipelinePosition {
        let position = self.inner.controller.advance();
        self.evaluate();
        position
    }

    /// Jumps to a stage and re-evaluates.
    ///
    /// # Errors
    ///
    /// Returns the controller's navigation errors.
    pub fn jump_to(&self, stage: &str) -> Result<PipelinePosition, NicheflowError> {
        let position = self.inner.controller.jump_to(stage)?;
        self.evaluate();
        Ok(position)
    }

    /// Switches to Phase 2 and re-evaluates.
    pub fn enter_phase_two(&self) -> bool {
        let switched = self.inner.controller.enter_phase_two();
        self.evaluate();
        switched
    }

    /// Re-evaluates auto-starts whenever project data changes.
    ///
    /// The watcher ends once the scheduler is dropped and the next change
    /// arrives, or when the project store goes away.
    pub fn spawn_data_watcher(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut versions = self.inner.project.subscribe();
        self.inner.handle.spawn(async move {
            while versions.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                AutoModeScheduler { inner }.evaluate();
            }
        })
    }

    /// Waits for every spawned run and delayed advance, including the ones
    /// they spawn in turn.
    pub async fn wait_idle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.pending.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "Scheduled work aborted");
                }
            }
        }
    }

    /// Returns the controller position.
    #[must_use]
    pub fn position(&self) -> PipelinePosition {
        self.inner.controller.position()
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.controller.phase()
    }

    /// Returns a stage's run status.
    #[must_use]
    pub fn stage_status(&self, stage: &str) -> Option<RunStatus> {
        self.inner.slots.get(stage).map(|slot| slot.runtime.status())
    }

    /// Returns true if the stage was ever started, by auto mode or manually.
    #[must_use]
    pub fn was_started(&self, stage: &str) -> bool {
        self.inner.started.contains(stage)
    }

    /// Returns a stage's runtime.
    #[must_use]
    pub fn runtime(&self, stage: &str) -> Option<StageRuntime> {
        self.inner.slots.get(stage).map(|slot| slot.runtime.clone())
    }

    /// Returns the task runner of a task stage.
    #[must_use]
    pub fn runner(&self, stage: &str) -> Option<Arc<TaskRunner>> {
        match self.runtime(stage)? {
            StageRuntime::Tasks(runner) => Some(runner),
            StageRuntime::Stream(_) => None,
        }
    }

    /// Returns the progress stream of a stream stage.
    #[must_use]
    pub fn stream(&self, stage: &str) -> Option<Arc<ProgressStream>> {
        match self.runtime(stage)? {
            StageRuntime::Stream(stream) => Some(stream),
            StageRuntime::Tasks(_) => None,
        }
    }

    /// Number of automatic advances performed.
    #[must_use]
    pub fn advance_count(&self) -> usize {
        self.inner.advances.load(Ordering::SeqCst)
    }

    fn slot(&self, stage: &str) -> Result<StageSlot, NicheflowError> {
        self.inner
            .slots
            .get(stage)
            .cloned()
            .ok_or_else(|| NicheflowError::UnknownStage(stage.to_string()))
    }

    /// Marks a stage started once it passes admission.
    fn admit(&self, stage: &str) -> Result<(), NicheflowError> {
        self.slot(stage)?.admit(&self.inner.project)?;
        self.inner.started.insert(stage.to_string());
        self.inner.waiting.remove(stage);
        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = self.inner.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    fn spawn_run(&self, stage: String) {
        let scheduler = self.clone();
        let handle = self.inner.handle.spawn(async move {
            if let Err(err) = scheduler.execute(&stage).await {
                warn!(stage = %stage, error = %err, "Stage run ended with an error");
            }
        });
        self.track(handle);
    }

    async fn execute(&self, stage: &str) -> Result<RunStatus, NicheflowError> {
        let slot = self.slot(stage)?;
        let result = slot.execute(&self.inner.project).await;
        let status = match &result {
            Ok(status) => *status,
            Err(NicheflowError::StageBusy(_) | NicheflowError::PrerequisiteMissing(_)) => return result,
            Err(NicheflowError::Cancelled(_)) => RunStatus::Stopped,
            Err(_) => RunStatus::Failed,
        };
        self.on_finished(stage, status);
        result
    }

    fn on_finished(&self, stage: &str, status: RunStatus) {
        if status == RunStatus::Completed {
            self.inner.controller.mark_completed(stage);
            if self.auto_mode() && self.inner.controller.is_current(stage) {
                self.schedule_advance(stage.to_string());
            }
        } else {
            debug!(stage, status = %status, "Stage did not complete; no advance");
        }
        self.evaluate();
    }

    fn schedule_advance(&self, stage: String) {
        let scheduler = self.clone();
        let delay = self.inner.settle_delay;
        let handle = self.inner.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let inner = &scheduler.inner;
            if !scheduler.auto_mode() || !inner.controller.is_current(&stage) {
                debug!(stage = %stage, "Auto-advance skipped");
                return;
            }
            let position = inner.controller.advance();
            inner.advances.fetch_add(1, Ordering::SeqCst);
            info!(stage = %stage, position = ?position, "Auto-advanced");

            // A stage finished ahead of the cursor never reports again.
            if let Some(next) = inner.controller.current_stage() {
                if next != stage && inner.controller.is_completed(&next) {
                    scheduler.schedule_advance(next);
                }
            }
            scheduler.evaluate();
        });
        self.track(handle);
    }
}

impl std::fmt::Debug for AutoModeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoModeScheduler")
            .field("pipeline", &self.inner.pipeline.name())
            .field("position", &self.position())
            .field("auto_mode", &self.auto_mode())
            .field("started", &self.inner.started.len())
            .finish()
    }
}
