//! Stage specifications.

use crate::core::Phase;
use crate::tasks::TaskSpec;

/// Settings for a stage driven by a progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStageSpec {
    /// Project key holding the analysis request.
    pub request_key: String,
    /// Project key receiving the results.
    pub output_key: String,
}

/// What a stage does when started.
#[derive(Debug, Clone)]
pub enum StageWork {
    /// An ordered task list run by a `TaskRunner`.
    Tasks(Vec<TaskSpec>),
    /// A single long-running analysis observed through a `ProgressStream`.
    Stream(StreamStageSpec),
}

/// A stage definition. Immutable once the pipeline is built.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Stage id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Phase, assigned by the builder.
    pub phase: Phase,
    /// Project keys that must be present before auto-start.
    pub prerequisites: Vec<String>,
    /// The stage's work.
    pub work: StageWork,
}

impl StageSpec {
    /// Creates a task stage.
    pub fn tasks(id: impl Into<String>, name: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phase: Phase::One,
            prerequisites: Vec::new(),
            work: StageWork::Tasks(tasks),
        }
    }

    /// Creates a stream stage. The request key is a prerequisite.
    pub fn stream(
        id: impl Into<String>,
        name: impl Into<String>,
        request_key: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        let request_key = request_key.into();
        Self {
            id: id.into(),
            name: name.into(),
            phase: Phase::One,
            prerequisites: vec![request_key.clone()],
            work: StageWork::Stream(StreamStageSpec {
                request_key,
                output_key: output_key.into(),
            }),
        }
    }

    /// Adds prerequisite keys.
    #[must_use]
    pub fn with_prerequisites<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !self.prerequisites.contains(&key) {
                self.prerequisites.push(key);
            }
        }
        self
    }

    /// Keys this stage writes on success.
    #[must_use]
    pub fn produces(&self) -> Vec<String> {
        match &self.work {
            StageWork::Tasks(tasks) => tasks.iter().flat_map(|t| t.produces.clone()).collect(),
            StageWork::Stream(stream) => vec![stream.output_key.clone(), "selectedNiche".to_string()],
        }
    }

    /// Returns true for stream stages.
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self.work, StageWork::Stream(_))
    }
}
