//! Core domain model types for nicheflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Task, run, stream and phase status enums
//! - The pipeline event record emitted to event sinks

mod event;
mod status;

pub use event::PipelineEvent;
pub use status::{Phase, RunStatus, StreamState, TaskStatus};
