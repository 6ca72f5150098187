//! Pipeline definition and navigation.
//!
//! This module provides:
//! - Stage specifications (task stages and stream stages)
//! - A validating pipeline builder
//! - The pipeline controller holding the stage cursor
//! - The marketing workflow blueprint

mod blueprint;
mod builder;
mod controller;
mod spec;

pub use blueprint::{
    marketing_pipeline, NicheDiscovery, StageBlueprint, TaskBodyProvider, TaskBodyRegistry,
    TaskTemplate, NICHE_ANALYSIS_STAGE, PHASE_ONE, PHASE_TWO,
};
pub use builder::{Pipeline, PipelineBuilder};
pub use controller::{PipelineController, PipelinePosition};
pub use spec::{StageSpec, StageWork, StreamStageSpec};
