//! Stage cursor and phase switch.

use super::Pipeline;
use crate::core::{Phase, PipelineEvent};
use crate::errors::NicheflowError;
use crate::events::{noop_sink, EventSink};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Where the pipeline currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PipelinePosition {
    /// A single active Phase 1 step.
    Step {
        /// Index within Phase 1.
        index: usize,
        /// Stage id.
        stage: String,
    },
    /// Phase 2: every agent is independently controllable.
    Agents,
}

#[derive(Debug)]
struct Cursor {
    index: usize,
    phase: Phase,
}

/// Holds the ordered stage lists and the current-stage cursor.
///
/// The controller never runs anything; it only answers "where are we" and
/// "which stages may be started".
pub struct PipelineController {
    phase_one: Vec<String>,
    phase_two: Vec<String>,
    cursor: RwLock<Cursor>,
    completed: RwLock<HashSet<String>>,
    sink: Arc<dyn EventSink>,
}

impl PipelineController {
    /// Creates a controller positioned at the first Phase 1 stage.
    #[must_use]
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            phase_one: pipeline.phase_one().map(|s| s.id.clone()).collect(),
            phase_two: pipeline.phase_two().map(|s| s.id.clone()).collect(),
            cursor: RwLock::new(Cursor {
                index: 0,
                phase: Phase::One,
            }),
            completed: RwLock::new(HashSet::new()),
            sink: noop_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.cursor.read().phase
    }

    /// Returns the current position.
    #[must_use]
    pub fn position(&self) -> PipelinePosition {
        let cursor = self.cursor.read();
        match cursor.phase {
            Phase::One => PipelinePosition::Step {
                index: cursor.index,
                stage: self.phase_one[cursor.index].clone(),
            },
            Phase::Two => PipelinePosition::Agents,
        }
    }

    /// The active Phase 1 stage, or `None` once in Phase 2.
    #[must_use]
    pub fn current_stage(&self) -> Option<String> {
        match self.position() {
            PipelinePosition::Step { stage, .. } => Some(stage),
            PipelinePosition::Agents => None,
        }
    }

    /// Returns true if `stage` is the active Phase 1 stage.
    #[must_use]
    pub fn is_current(&self, stage: &str) -> bool {
        self.current_stage().as_deref() == Some(stage)
    }

    /// Phase 1 stage ids in order.
    #[must_use]
    pub fn phase_one_stages(&self) -> &[String] {
        &self.phase_one
    }

    /// Phase 2 stage ids.
    #[must_use]
    pub fn phase_two_stages(&self) -> &[String] {
        &self.phase_two
    }

    /// Moves the cursor one Phase 1 step forward, switching to Phase 2 after
    /// the last step. A no-op in Phase 2.
    pub fn advance(&self) -> PipelinePosition {
        let moved = {
            let mut cursor = self.cursor.write();
            match cursor.phase {
                Phase::Two => None,
                Phase::One if cursor.index + 1 < self.phase_one.len() => {
                    let from = cursor.index;
                    cursor.index += 1;
                    Some((from, cursor.index))
                }
                Phase::One => {
                    cursor.phase = Phase::Two;
                    Some((cursor.index, cursor.index))
                }
            }
        };

        match moved {
            Some((from, to)) if from != to => self.emit_advanced(from, to),
            Some(_) => self.emit_phase_changed("advance"),
            None => {}
        }
        self.position()
    }

    /// Switches to Phase 2. Returns false if already there.
    pub fn enter_phase_two(&self) -> bool {
        {
            let mut cursor = self.cursor.write();
            if cursor.phase == Phase::Two {
                return false;
            }
            cursor.phase = Phase::Two;
            cursor.index = self.phase_one.len() - 1;
        }
        self.emit_phase_changed("manual");
        true
    }

    /// Explicit navigation, ignoring prerequisites.
    ///
    /// Phase 1 targets move the cursor in either direction; a Phase 2 target
    /// performs the phase switch.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage` for an unknown id, and `InvalidTransition` when
    /// targeting a Phase 1 stage after the phase switch.
    pub fn jump_to(&self, stage: &str) -> Result<PipelinePosition, NicheflowError> {
        if let Some(target) = self.phase_one.iter().position(|s| s == stage) {
            let from = {
                let mut cursor = self.cursor.write();
                if cursor.phase == Phase::Two {
                    return Err(NicheflowError::InvalidTransition(format!(
                        "cannot return to Phase 1 stage '{stage}' after the phase switch"
                    )));
                }
                std::mem::replace(&mut cursor.index, target)
            };
            if from != target {
                self.emit_advanced(from, target);
            }
            return Ok(self.position());
        }

        if self.phase_two.iter().any(|s| s == stage) {
            self.enter_phase_two();
            return Ok(PipelinePosition::Agents);
        }

        Err(NicheflowError::UnknownStage(stage.to_string()))
    }

    /// Returns true if the stage may be started from the current position.
    #[must_use]
    pub fn is_reachable(&self, stage: &str) -> bool {
        let cursor = self.cursor.read();
        if let Some(index) = self.phase_one.iter().position(|s| s == stage) {
            return index <= cursor.index;
        }
        cursor.phase == Phase::Two && self.phase_two.iter().any(|s| s == stage)
    }

    /// Every stage reachable from the current position.
    #[must_use]
    pub fn reachable_stages(&self) -> Vec<String> {
        self.phase_one
            .iter()
            .chain(self.phase_two.iter())
            .filter(|s| self.is_reachable(s))
            .cloned()
            .collect()
    }

    /// Records that a stage completed successfully.
    pub fn mark_completed(&self, stage: &str) {
        self.completed.write().insert(stage.to_string());
    }

    /// Returns true if the stage has completed at least once.
    #[must_use]
    pub fn is_completed(&self, stage: &str) -> bool {
        self.completed.read().contains(stage)
    }

    /// Terminal position: Phase 2 with every agent completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase() == Phase::Two && self.phase_two.iter().all(|s| self.is_completed(s))
    }

    fn emit_advanced(&self, from: usize, to: usize) {
        let (from, to) = (&self.phase_one[from], &self.phase_one[to]);
        info!(from = %from, to = %to, "Pipeline cursor moved");
        self.sink.emit(
            PipelineEvent::new("pipeline.advanced")
                .add_data("from", json!(from))
                .add_data("to", json!(to)),
        );
    }

    fn emit_phase_changed(&self, trigger: &str) {
        info!(trigger, "Entered Phase 2");
        self.sink.emit(
            PipelineEvent::new("pipeline.phase_changed")
                .add_data("phase", json!(Phase::Two.to_string()))
                .add_data("trigger", json!(trigger)),
        );
    }
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("position", &self.position())
            .field("completed", &self.completed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{PipelineBuilder, StageSpec};
    use crate::tasks::TaskSpec;
    use crate::testing::SuccessTask;
    use pretty_assertions::assert_eq;

    fn pipeline() -> Pipeline {
        let stage = |id: &str| StageSpec::tasks(id, id, vec![TaskSpec::new("t", "T", SuccessTask::arc())]);
        PipelineBuilder::new("test")
            .step(stage("one"))
            .step(stage("two"))
            .step(stage("three"))
            .agent(stage("ads"))
            .agent(stage("email"))
            .build()
            .unwrap()
    }

    fn step(index: usize, stage: &str) -> PipelinePosition {
        PipelinePosition::Step {
            index,
            stage: stage.to_string(),
        }
    }

    #[test]
    fn test_advance_walks_phase_one_then_switches() {
        let sink = Arc::new(CollectingEventSink::new());
        let controller = PipelineController::new(&pipeline()).with_event_sink(sink.clone());

        assert_eq!(controller.position(), step(0, "one"));
        assert_eq!(controller.advance(), step(1, "two"));
        assert_eq!(controller.advance(), step(2, "three"));
        assert_eq!(controller.advance(), PipelinePosition::Agents);
        assert_eq!(controller.phase(), Phase::Two);

        // No-op in Phase 2.
        assert_eq!(controller.advance(), PipelinePosition::Agents);

        assert_eq!(sink.events_of_type("pipeline.advanced").len(), 2);
        assert_eq!(sink.events_of_type("pipeline.phase_changed").len(), 1);
    }

    #[test]
    fn test_reachability() {
        let controller = PipelineController::new(&pipeline());
        assert!(controller.is_reachable("one"));
        assert!(!controller.is_reachable("two"));
        assert!(!controller.is_reachable("ads"));

        controller.advance();
        assert_eq!(controller.reachable_stages(), vec!["one".to_string(), "two".to_string()]);

        controller.enter_phase_two();
        assert!(controller.is_reachable("ads"));
        assert!(controller.is_reachable("email"));
    }

    #[test]
    fn test_jump_to() {
        let controller = PipelineController::new(&pipeline());

        assert_eq!(controller.jump_to("three").unwrap(), step(2, "three"));
        assert_eq!(controller.jump_to("one").unwrap(), step(0, "one"));
        assert!(matches!(
            controller.jump_to("missing"),
            Err(NicheflowError::UnknownStage(_))
        ));

        assert_eq!(controller.jump_to("email").unwrap(), PipelinePosition::Agents);
        assert!(matches!(
            controller.jump_to("two"),
            Err(NicheflowError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_enter_phase_two_is_one_way() {
        let controller = PipelineController::new(&pipeline());
        assert!(controller.enter_phase_two());
        assert!(!controller.enter_phase_two());
        assert_eq!(controller.current_stage(), None);
    }

    #[test]
    fn test_finished_after_all_agents_complete() {
        let controller = PipelineController::new(&pipeline());
        controller.mark_completed("ads");
        controller.mark_completed("email");
        assert!(!controller.is_finished());

        controller.enter_phase_two();
        assert!(controller.is_finished());
        assert!(controller.is_completed("ads"));
    }
}
