//! Status enums for tasks, runs, progress streams and phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a single task inside a runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started in the current run.
    #[default]
    Pending,
    /// The task body is executing.
    Running,
    /// The task body returned successfully; progress is 100.
    Completed,
    /// The task body failed or was interrupted by a stop.
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The aggregate status of a stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Never run.
    #[default]
    Idle,
    /// A run is in flight.
    Running,
    /// Every task completed.
    Completed,
    /// A task failed and halted the run.
    Failed,
    /// The run was stopped externally.
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl RunStatus {
    /// Returns true once a run has ended, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Returns true if the run completed every task.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Lifecycle of a progress stream: `idle -> streaming -> {completed | errored}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Channel open or fallback in flight.
    Streaming,
    /// Results stored.
    Completed,
    /// Terminal failure.
    Errored,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::Completed => write!(f, "completed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

impl From<StreamState> for RunStatus {
    fn from(state: StreamState) -> Self {
        match state {
            StreamState::Idle => Self::Idle,
            StreamState::Streaming => Self::Running,
            StreamState::Completed => Self::Completed,
            StreamState::Errored => Self::Failed,
        }
    }
}

/// Pipeline phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Sequential build steps.
    #[default]
    One,
    /// Independent marketing agents.
    Two,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => write!(f, "phase1"),
            Self::Two => write!(f, "phase2"),
        }
    }
}
