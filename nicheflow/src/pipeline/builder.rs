//! Pipeline builder with validation.

use super::{StageSpec, StageWork};
use crate::core::Phase;
use crate::errors::PipelineValidationError;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stages in insertion order.
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a Phase 1 step.
    #[must_use]
    pub fn step(mut self, mut spec: StageSpec) -> Self {
        spec.phase = Phase::One;
        self.stages.push(spec);
        self
    }

    /// Adds a Phase 2 agent.
    #[must_use]
    pub fn agent(mut self, mut spec: StageSpec) -> Self {
        spec.phase = Phase::Two;
        self.stages.push(spec);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if Phase 1 is empty, a stage id is reused, a task id
    /// is reused within a stage, or a task stage has no tasks.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if !self.stages.iter().any(|s| s.phase == Phase::One) {
            return Err(PipelineValidationError::new(
                "PIPELINE-EMPTY",
                format!("Pipeline '{}' has no Phase 1 stages", self.name),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                return Err(PipelineValidationError::new(
                    "PIPELINE-DUPLICATE",
                    format!("Stage id '{}' is declared more than once", stage.id),
                )
                .with_stages(vec![stage.id.clone()]));
            }

            if let StageWork::Tasks(tasks) = &stage.work {
                if tasks.is_empty() {
                    return Err(PipelineValidationError::new(
                        "PIPELINE-NO-TASKS",
                        format!("Stage '{}' has no tasks", stage.id),
                    )
                    .with_stages(vec![stage.id.clone()]));
                }

                let mut task_ids = HashSet::new();
                if let Some(dup) = tasks.iter().find(|t| !task_ids.insert(t.id.as_str())) {
                    return Err(PipelineValidationError::new(
                        "PIPELINE-DUPLICATE",
                        format!("Task id '{}' is declared more than once in stage '{}'", dup.id, stage.id),
                    )
                    .with_stages(vec![stage.id.clone()]));
                }
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages.into_iter().map(Arc::new).collect(),
        })
    }
}

/// A validated, immutable pipeline definition.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<StageSpec>>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every stage, Phase 1 steps first in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<StageSpec>] {
        &self.stages
    }

    /// Phase 1 steps in order.
    pub fn phase_one(&self) -> impl Iterator<Item = &Arc<StageSpec>> {
        self.stages.iter().filter(|s| s.phase == Phase::One)
    }

    /// Phase 2 agents.
    pub fn phase_two(&self) -> impl Iterator<Item = &Arc<StageSpec>> {
        self.stages.iter().filter(|s| s.phase == Phase::Two)
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&Arc<StageSpec>> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Returns true if any stage is driven by a progress stream.
    #[must_use]
    pub fn has_stream_stages(&self) -> bool {
        self.stages.iter().any(|s| s.is_stream())
    }
}
