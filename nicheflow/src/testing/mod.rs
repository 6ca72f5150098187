//! Testing utilities for nicheflow pipelines.
//!
//! This module provides:
//! - Mock task bodies (succeeding, failing, flaky, stepped, gated, counting)
//! - A body provider covering the whole marketing blueprint
//! - A scripted analysis transport for progress stream tests

mod mocks;
mod transport;

pub use mocks::{
    CountingTask, FailingTask, FlakyTask, GatedTask, InstantBodies, SteppedTask, SuccessTask,
};
pub use transport::ScriptedTransport;
