//! # Nicheflow
//!
//! Orchestration core for a staged local-business marketing workflow.
//!
//! A pipeline is an ordered list of Phase 1 build steps followed by a set of
//! independent Phase 2 marketing agents. Nicheflow provides:
//!
//! - **Task runners**: sequential execution of a stage's tasks with
//!   per-task status, progress and cooperative stop
//! - **Shared project data**: a merge-only key/value store every stage reads
//!   from and writes to under a declared contract
//! - **Navigation**: a cursor over Phase 1 with a one-way switch to Phase 2
//! - **Auto mode**: starts stages once their inputs exist and advances the
//!   cursor after the current stage completes
//! - **Progress streams**: server-sent progress for long analyses with a
//!   single blocking fallback
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nicheflow::prelude::*;
//!
//! let pipeline = marketing_pipeline(&bodies, NicheDiscovery::Tasks)?;
//! let scheduler = AutoModeScheduler::builder(pipeline)
//!     .config(&NicheflowConfig::from_env()?)
//!     .build()?;
//!
//! scheduler.set_auto_mode(true);
//! scheduler.wait_idle().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod project;
pub mod scheduler;
pub mod stream;
pub mod tasks;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AnalysisServiceConfig, NicheflowConfig, SchedulerConfig, StreamConfig};
    pub use crate::core::{Phase, PipelineEvent, RunStatus, StreamState, TaskStatus};
    pub use crate::errors::{
        NicheflowError, PipelineValidationError, PrerequisiteMissing, StreamFailure, StreamTransportError,
        TaskFailure, UndeclaredKeyError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        marketing_pipeline, NicheDiscovery, Pipeline, PipelineBuilder, PipelineController, PipelinePosition,
        StageSpec, TaskBodyProvider, TaskBodyRegistry,
    };
    pub use crate::project::{ProjectData, ProjectMap, ScopedProjectView};
    pub use crate::scheduler::{AutoModeScheduler, SchedulerBuilder, StageRuntime};
    #[cfg(feature = "http")]
    pub use crate::stream::HttpTransport;
    pub use crate::stream::{AnalysisTransport, AnalyzeRequest, AnalyzeResponse, ProgressEvent, ProgressStream};
    pub use crate::tasks::{FnTask, RunReport, TaskBody, TaskContext, TaskOutput, TaskRunner, TaskSpec};
}
