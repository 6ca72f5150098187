//! Error types for the nicheflow orchestration core.
//!
//! Task- and stream-level errors are terminal for their unit of work but never
//! for the pipeline: the scheduler records them and the operator can re-run a
//! stage or keep navigating manually.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for nicheflow operations.
#[derive(Debug, Error)]
pub enum NicheflowError {
    /// A task body failed and halted its run.
    #[error("{0}")]
    Task(#[from] TaskFailure),

    /// The push channel failed and no fallback was attempted.
    #[error("{0}")]
    StreamTransport(#[from] StreamTransportError),

    /// The stream operation failed terminally.
    #[error("{0}")]
    Stream(#[from] StreamFailure),

    /// A stage was started without its required project keys.
    #[error("{0}")]
    PrerequisiteMissing(#[from] PrerequisiteMissing),

    /// A task touched a project key outside its stage contract.
    #[error("{0}")]
    UndeclaredKey(#[from] UndeclaredKeyError),

    /// The pipeline definition was rejected.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// No stage with the given id exists.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// A navigation request is not allowed from the current position.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The stage is already running.
    #[error("Stage '{0}' is already running")]
    StageBusy(String),

    /// The operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The unit of work was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for NicheflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-EMPTY").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl PipelineValidationError {
    /// Creates a new validation error with a contract code.
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut info = ContractErrorInfo::new(code, message.clone());
        if let Some(hint) = ContractSuggestions::get(code) {
            info = info.with_fix_hint(hint);
        }
        Self {
            message,
            stages: Vec::new(),
            error_info: info,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Returns the contract code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.error_info.code
    }
}

/// A task body rejected. Halts the run; recovery is an explicit re-run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Task '{task}' failed: {message}")]
pub struct TaskFailure {
    /// The failing task id. Filled in by the runner when a body leaves it empty.
    pub task: String,
    /// The failure message.
    pub message: String,
}

impl TaskFailure {
    /// Creates a new task failure.
    #[must_use]
    pub fn new(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Creates a failure without a task id; the runner attaches it.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(String::new(), message)
    }

    /// The failure recorded for a task interrupted by `stop()`.
    #[must_use]
    pub fn stopped(task: impl Into<String>) -> Self {
        Self::new(task, STOPPED_MESSAGE)
    }

    /// Returns true if this failure came from cooperative cancellation.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.message == STOPPED_MESSAGE
    }
}

const STOPPED_MESSAGE: &str = "stopped";

impl From<anyhow::Error> for TaskFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::msg(format!("{err:#}"))
    }
}

impl From<UndeclaredKeyError> for TaskFailure {
    fn from(err: UndeclaredKeyError) -> Self {
        Self::new(err.task.clone(), err.to_string())
    }
}

/// The push channel itself failed (network, framing, unsupported transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stream transport error: {message}")]
pub struct StreamTransportError {
    /// Description of the transport failure.
    pub message: String,
}

impl StreamTransportError {
    /// Creates a new transport error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal failure of a stream operation. ProjectData is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFailure {
    /// The server reported `status: "error"`.
    #[error("Analysis service reported an error: {0}")]
    Server(String),

    /// The single fallback request failed.
    #[error("Fallback analysis request failed: {0}")]
    Fallback(String),
}

/// A stage cannot start because required project keys are absent or null.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' is missing prerequisites: {}", missing.join(", "))]
pub struct PrerequisiteMissing {
    /// The stage id.
    pub stage: String,
    /// The absent keys.
    pub missing: Vec<String>,
}

impl PrerequisiteMissing {
    /// Creates a new prerequisite error.
    #[must_use]
    pub fn new(stage: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            missing,
        }
    }
}

/// A task accessed a project key its stage did not declare.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Undeclared key: task '{task}' in stage '{stage}' attempted to {access} '{key}'")]
pub struct UndeclaredKeyError {
    /// The stage id.
    pub stage: String,
    /// The task id.
    pub task: String,
    /// The offending key.
    pub key: String,
    /// "read" or "write".
    pub access: &'static str,
}

impl UndeclaredKeyError {
    /// Creates an error for an undeclared read.
    #[must_use]
    pub fn read(stage: impl Into<String>, task: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            task: task.into(),
            key: key.into(),
            access: "read",
        }
    }

    /// Creates an error for an undeclared write.
    #[must_use]
    pub fn write(stage: impl Into<String>, task: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            task: task.into(),
            key: key.into(),
            access: "write",
        }
    }
}

/// Provides default suggestions for pipeline contract codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "PIPELINE-EMPTY" => Some("Add at least one Phase 1 stage before building."),
            "PIPELINE-DUPLICATE" => Some("Stage ids must be unique across both phases."),
            "PIPELINE-NO-TASKS" => Some(
                "Give the stage at least one task, or make it a stream stage.",
            ),
            "PIPELINE-MISSING-BODY" => Some(
                "Register a task body for every task id declared by the blueprint.",
            ),
            "PIPELINE-NO-TRANSPORT" => Some(
                "Stream stages need an analysis transport; call `transport(..)` on the scheduler builder.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_carries_hint() {
        let err = PipelineValidationError::new("PIPELINE-EMPTY", "no stages")
            .with_stages(vec!["a".to_string()]);

        assert_eq!(err.code(), "PIPELINE-EMPTY");
        assert!(err.error_info.fix_hint.is_some());
        assert_eq!(err.to_string(), "no stages");
    }

    #[test]
    fn test_unknown_code_has_no_hint() {
        let err = PipelineValidationError::new("SOMETHING-ELSE", "x");
        assert!(err.error_info.fix_hint.is_none());
    }

    #[test]
    fn test_task_failure_from_anyhow() {
        let failure: TaskFailure = anyhow::anyhow!("boom").context("calling generator").into();
        assert!(failure.task.is_empty());
        assert!(failure.message.contains("calling generator"));
        assert!(failure.message.contains("boom"));
    }

    #[test]
    fn test_stopped_failure() {
        let failure = TaskFailure::stopped("optimization");
        assert!(failure.is_stop());
        assert!(!TaskFailure::new("x", "network down").is_stop());
    }

    #[test]
    fn test_prerequisite_missing_message() {
        let err = PrerequisiteMissing::new(
            "seo-tool",
            vec!["selectedNiche".to_string(), "selectedDomain".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "Stage 'seo-tool' is missing prerequisites: selectedNiche, selectedDomain"
        );
    }

    #[test]
    fn test_undeclared_key_message() {
        let err = UndeclaredKeyError::write("ads-agent", "optimization", "siteStructure");
        assert!(err.to_string().contains("attempted to write 'siteStructure'"));
    }

    #[test]
    fn test_wrapping_into_nicheflow_error() {
        let err: NicheflowError = StreamFailure::Fallback("503".to_string()).into();
        assert!(matches!(err, NicheflowError::Stream(_)));
        assert!(err.to_string().contains("503"));
    }
}
