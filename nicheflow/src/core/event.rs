//! Pipeline event record for lifecycle notifications.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// An event emitted by a runner, the scheduler, or a progress stream.
///
/// Events are consumed by event sinks for logging, UI updates or tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "task.started", "pipeline.advanced").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (RFC 3339, UTC).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

impl PipelineEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now().to_rfc3339(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns a string field from the payload.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Creates a "run.started" event.
    #[must_use]
    pub fn run_started(stage: &str, run_id: &str, tasks: usize) -> Self {
        Self::new("run.started")
            .add_data("stage", json!(stage))
            .add_data("run_id", json!(run_id))
            .add_data("tasks", json!(tasks))
    }

    /// Creates a "run.completed", "run.failed" or "run.stopped" event.
    #[must_use]
    pub fn run_finished(stage: &str, run_id: &str, status: crate::core::RunStatus, duration_ms: f64) -> Self {
        Self::new(format!("run.{status}"))
            .add_data("stage", json!(stage))
            .add_data("run_id", json!(run_id))
            .add_data("duration_ms", json!(duration_ms))
    }

    /// Creates a "task.started" event.
    #[must_use]
    pub fn task_started(stage: &str, task: &str) -> Self {
        Self::new("task.started")
            .add_data("stage", json!(stage))
            .add_data("task", json!(task))
    }

    /// Creates a "task.progress" event.
    #[must_use]
    pub fn task_progress(stage: &str, task: &str, progress: u8) -> Self {
        Self::new("task.progress")
            .add_data("stage", json!(stage))
            .add_data("task", json!(task))
            .add_data("progress", json!(progress))
    }

    /// Creates a "task.completed" event.
    #[must_use]
    pub fn task_completed(stage: &str, task: &str, writes: &[String]) -> Self {
        Self::new("task.completed")
            .add_data("stage", json!(stage))
            .add_data("task", json!(task))
            .add_data("writes", json!(writes))
    }

    /// Creates a "task.failed" event.
    #[must_use]
    pub fn task_failed(stage: &str, task: &str, error: &str) -> Self {
        Self::new("task.failed")
            .add_data("stage", json!(stage))
            .add_data("task", json!(task))
            .add_data("error", json!(error))
    }
}
