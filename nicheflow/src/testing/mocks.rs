//! Mock task bodies for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::errors::TaskFailure;
use crate::pipeline::{TaskBodyProvider, PHASE_ONE, PHASE_TWO};
use crate::tasks::{TaskBody, TaskContext, TaskOutput};

/// A body that always succeeds, optionally writing fixed values.
#[derive(Debug, Default)]
pub struct SuccessTask {
    output: TaskOutput,
}

impl SuccessTask {
    /// A body that writes nothing.
    #[must_use]
    pub fn arc() -> Arc<dyn TaskBody> {
        Arc::new(Self::default())
    }

    /// A body that writes `key = value`.
    #[must_use]
    pub fn writing(key: impl Into<String>, value: Value) -> Arc<dyn TaskBody> {
        Arc::new(Self {
            output: TaskOutput::value(key, value),
        })
    }

    /// A body returning `output`.
    #[must_use]
    pub fn with_output(output: TaskOutput) -> Arc<dyn TaskBody> {
        Arc::new(Self { output })
    }
}

#[async_trait]
impl TaskBody for SuccessTask {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        Ok(self.output.clone())
    }
}

/// A body that always fails.
#[derive(Debug)]
pub struct FailingTask {
    message: String,
}

impl FailingTask {
    /// A body failing with `message`.
    #[must_use]
    pub fn arc(message: impl Into<String>) -> Arc<dyn TaskBody> {
        Arc::new(Self {
            message: message.into(),
        })
    }
}

#[async_trait]
impl TaskBody for FailingTask {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        Err(TaskFailure::msg(self.message.clone()))
    }
}

/// A body that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyTask {
    remaining: AtomicUsize,
}

impl FlakyTask {
    /// Fails the first `times` executions.
    #[must_use]
    pub fn failing_times(times: usize) -> Arc<dyn TaskBody> {
        Arc::new(Self {
            remaining: AtomicUsize::new(times),
        })
    }
}

#[async_trait]
impl TaskBody for FlakyTask {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(TaskFailure::msg("transient failure"))
        } else {
            Ok(TaskOutput::empty())
        }
    }
}

/// A body that sleeps in steps, reporting progress after each one.
///
/// Sleeps go through the context, so a stop interrupts the body.
#[derive(Debug)]
pub struct SteppedTask {
    steps: u8,
    delay: Duration,
}

impl SteppedTask {
    /// `steps` increments separated by `delay`.
    #[must_use]
    pub fn arc(steps: u8, delay: Duration) -> Arc<dyn TaskBody> {
        Arc::new(Self {
            steps: steps.max(1),
            delay,
        })
    }
}

#[async_trait]
impl TaskBody for SteppedTask {
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        for step in 1..=self.steps {
            ctx.sleep(self.delay).await?;
            let percent = u16::from(step) * 100 / u16::from(self.steps);
            ctx.report_progress(u8::try_from(percent).unwrap_or(100));
        }
        Ok(TaskOutput::empty())
    }
}

/// A body that blocks until released by the test.
///
/// The gate ignores stop requests, so it models a body that only checks for
/// cancellation after its current unit of work.
#[derive(Debug, Clone)]
pub struct GatedTask {
    inner: Arc<Gate>,
}

#[derive(Debug)]
struct Gate {
    started: watch::Sender<bool>,
    released: watch::Sender<bool>,
    output: TaskOutput,
    calls: AtomicUsize,
}

impl Default for GatedTask {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedTask {
    /// A gate whose body writes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_output(TaskOutput::empty())
    }

    /// A gate whose body writes `key = value` once released.
    #[must_use]
    pub fn writing(key: impl Into<String>, value: Value) -> Self {
        Self::with_output(TaskOutput::value(key, value))
    }

    fn with_output(output: TaskOutput) -> Self {
        Self {
            inner: Arc::new(Gate {
                started: watch::Sender::new(false),
                released: watch::Sender::new(false),
                output,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// The body to put in a task spec.
    #[must_use]
    pub fn body(&self) -> Arc<dyn TaskBody> {
        Arc::new(self.clone())
    }

    /// Waits until the body has started.
    pub async fn wait_started(&self) {
        let mut started = self.inner.started.subscribe();
        let _ = started.wait_for(|started| *started).await;
    }

    /// Lets the body finish.
    pub fn release(&self) {
        self.inner.released.send_replace(true);
    }

    /// Number of executions.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskBody for GatedTask {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let mut released = self.inner.released.subscribe();
        self.inner.started.send_replace(true);
        let _ = released.wait_for(|released| *released).await;
        Ok(self.inner.output.clone())
    }
}

/// A body that counts executions and writes fixed values.
#[derive(Debug, Default)]
pub struct CountingTask {
    calls: AtomicUsize,
    output: TaskOutput,
}

impl CountingTask {
    /// A counter writing `key = value`.
    #[must_use]
    pub fn writing(key: impl Into<String>, value: Value) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            output: TaskOutput::value(key, value),
        })
    }

    /// Number of executions.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskBody for CountingTask {
    async fn execute(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Provides an instantly succeeding body for every blueprint task, writing a
/// placeholder value for each key the task declares.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantBodies;

impl TaskBodyProvider for InstantBodies {
    fn body(&self, stage: &str, task: &str) -> Option<Arc<dyn TaskBody>> {
        let template = PHASE_ONE
            .iter()
            .chain(PHASE_TWO)
            .find(|s| s.id == stage)?
            .tasks
            .iter()
            .find(|t| t.id == task)?;

        let output = template.produces.iter().fold(TaskOutput::empty(), |output, key| {
            output.with(*key, json!({ "source": format!("{stage}/{task}") }))
        });
        Some(SuccessTask::with_output(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectData;
    use crate::tasks::{TaskRunner, TaskSpec};
    use crate::core::RunStatus;

    #[tokio::test]
    async fn test_flaky_task_recovers() {
        let project = Arc::new(ProjectData::new());
        let runner = TaskRunner::new("s", &[], vec![TaskSpec::new("t", "T", FlakyTask::failing_times(2))]);

        assert_eq!(runner.run(&project).await.unwrap().status, RunStatus::Failed);
        assert_eq!(runner.run(&project).await.unwrap().status, RunStatus::Failed);
        assert_eq!(runner.run(&project).await.unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_gated_task_waits_for_release() {
        let project = Arc::new(ProjectData::new());
        let gate = GatedTask::writing("selectedNiche", json!({"name": "roofer"}));
        let runner = Arc::new(TaskRunner::new(
            "micro-niche",
            &[],
            vec![TaskSpec::new("find-niches", "Find", gate.body()).produces(["selectedNiche"])],
        ));

        let handle = {
            let runner = runner.clone();
            let project = project.clone();
            tokio::spawn(async move { runner.run(&project).await })
        };
        gate.wait_started().await;
        assert_eq!(runner.status(), RunStatus::Running);
        assert!(!project.has("selectedNiche"));

        gate.release();
        assert_eq!(handle.await.unwrap().unwrap().status, RunStatus::Completed);
        assert!(project.has("selectedNiche"));
        assert_eq!(gate.calls(), 1);
    }

    #[test]
    fn test_instant_bodies_cover_blueprint() {
        for stage in PHASE_ONE.iter().chain(PHASE_TWO) {
            for task in stage.tasks {
                assert!(InstantBodies.body(stage.id, task.id).is_some(), "{}/{}", stage.id, task.id);
            }
        }
        assert!(InstantBodies.body("micro-niche", "nope").is_none());
    }
}
