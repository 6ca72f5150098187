//! The marketing workflow blueprint.
//!
//! A static catalogue of the ten stages (six Phase 1 steps, four Phase 2
//! agents) with their prerequisites and per-task output contracts. Task
//! bodies are supplied by the caller through a [`TaskBodyProvider`].

use super::{Pipeline, PipelineBuilder, StageSpec};
use crate::core::Phase;
use crate::errors::PipelineValidationError;
use crate::tasks::{TaskBody, TaskSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// A task declared by the blueprint, without a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTemplate {
    /// Task id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Description shown to the operator.
    pub description: &'static str,
    /// Project keys the task writes.
    pub produces: &'static [&'static str],
}

/// A stage declared by the blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBlueprint {
    /// Stage id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Phase.
    pub phase: Phase,
    /// Required project keys.
    pub prerequisites: &'static [&'static str],
    /// Tasks in execution order.
    pub tasks: &'static [TaskTemplate],
}

const fn task(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    produces: &'static [&'static str],
) -> TaskTemplate {
    TaskTemplate {
        id,
        name,
        description,
        produces,
    }
}

/// Phase 1 steps, in cursor order.
pub const PHASE_ONE: &[StageBlueprint] = &[
    StageBlueprint {
        id: "micro-niche",
        name: "Micro-Niche Builder",
        phase: Phase::One,
        prerequisites: &[],
        tasks: &[task(
            "find-niches",
            "Find Niches",
            "Find profitable local service niches",
            &["selectedNiche"],
        )],
    },
    StageBlueprint {
        id: "emd-finder",
        name: "EMD Finder",
        phase: Phase::One,
        prerequisites: &["selectedNiche"],
        tasks: &[
            task(
                "generate-domains",
                "Generate Domains",
                "Generate exact match domain candidates",
                &["domainCandidates"],
            ),
            task(
                "check-availability",
                "Check Availability",
                "Check registration status and pick a domain",
                &["selectedDomain"],
            ),
        ],
    },
    StageBlueprint {
        id: "seo-tool",
        name: "Unified SEO Tool",
        phase: Phase::One,
        prerequisites: &["selectedNiche", "selectedDomain"],
        tasks: &[
            task(
                "keyword-research",
                "Keyword Research",
                "Collect local search keywords",
                &["targetKeywords"],
            ),
            task(
                "competitor-analysis",
                "Competitor Analysis",
                "Analyze ranking competitors",
                &["competitors"],
            ),
            task(
                "seo-report",
                "SEO Report",
                "Compile the local SEO analysis",
                &["seoAnalysis"],
            ),
        ],
    },
    StageBlueprint {
        id: "design-scraper",
        name: "Design Scraper",
        phase: Phase::One,
        prerequisites: &["seoAnalysis"],
        tasks: &[task(
            "scrape-designs",
            "Scrape Designs",
            "Analyze competitor site designs",
            &["designInspiration", "designFeatures"],
        )],
    },
    StageBlueprint {
        id: "visual-content",
        name: "Visual Content Builder",
        phase: Phase::One,
        prerequisites: &["selectedNiche", "designFeatures"],
        tasks: &[task(
            "plan-assets",
            "Plan Assets",
            "Plan hero, trust and team visuals",
            &["visualAssets"],
        )],
    },
    StageBlueprint {
        id: "site-assembly",
        name: "Authority Site Assembly",
        phase: Phase::One,
        prerequisites: &[
            "selectedNiche",
            "selectedDomain",
            "seoAnalysis",
            "designInspiration",
            "visualAssets",
        ],
        tasks: &[task(
            "assemble-structure",
            "Assemble Structure",
            "Build the complete site structure",
            &["siteStructure", "siteStatus"],
        )],
    },
];

/// Phase 2 agents. Independent of each other.
pub const PHASE_TWO: &[StageBlueprint] = &[
    StageBlueprint {
        id: "seo-agent",
        name: "SEO Agent",
        phase: Phase::Two,
        prerequisites: &["selectedDomain", "seoAnalysis", "siteStructure"],
        tasks: &[
            task(
                "technical-seo",
                "Technical SEO Audit",
                "Analyzing site structure, meta tags, and technical elements",
                &[],
            ),
            task(
                "content-optimization",
                "Content Optimization",
                "Optimizing content for target keywords and user intent",
                &[],
            ),
            task(
                "link-building",
                "Link Building",
                "Identifying and securing high-quality backlink opportunities",
                &[],
            ),
            task(
                "local-seo",
                "Local SEO",
                "Optimizing for local search results",
                &[],
            ),
            task(
                "monitoring",
                "Performance Monitoring",
                "Setting up tracking and monitoring systems",
                &["seoAgentReport"],
            ),
        ],
    },
    StageBlueprint {
        id: "ads-agent",
        name: "ADS Agent",
        phase: Phase::Two,
        prerequisites: &["selectedNiche", "targetKeywords", "siteStructure"],
        tasks: &[
            task(
                "market-research",
                "Market Research",
                "Analyzing local market competition and pricing",
                &[],
            ),
            task(
                "campaign-setup",
                "Campaign Setup",
                "Creating targeted campaigns for each platform",
                &["adCampaigns"],
            ),
            task(
                "ad-creation",
                "Ad Creative Generation",
                "Creating compelling ad copy and visuals",
                &[],
            ),
            task(
                "audience-targeting",
                "Audience Targeting",
                "Setting up precise local audience segments",
                &[],
            ),
            task(
                "optimization",
                "Campaign Optimization",
                "Optimizing bids and targeting for best ROI",
                &["monthlyAdSpend"],
            ),
        ],
    },
    StageBlueprint {
        id: "email-agent",
        name: "Email Marketing Agent",
        phase: Phase::Two,
        prerequisites: &["selectedNiche", "selectedDomain", "siteStructure"],
        tasks: &[
            task(
                "list-building",
                "Email List Building",
                "Setting up lead capture forms and opt-in incentives",
                &[],
            ),
            task(
                "campaign-creation",
                "Campaign Creation",
                "Creating email templates and campaign content",
                &["emailCampaigns"],
            ),
            task(
                "automation-setup",
                "Automation Setup",
                "Configuring automated email sequences",
                &["emailSequences"],
            ),
            task(
                "segmentation",
                "Audience Segmentation",
                "Segmenting customers by interest and behavior",
                &[],
            ),
            task(
                "optimization",
                "Campaign Optimization",
                "A/B testing and performance optimization",
                &["emailSubscribers"],
            ),
        ],
    },
    StageBlueprint {
        id: "ai-controller",
        name: "AI Agent Controller",
        phase: Phase::Two,
        prerequisites: &["selectedDomain", "siteStructure"],
        tasks: &[
            task(
                "system-init",
                "System Initialization",
                "Initializing AI agent network and connections",
                &[],
            ),
            task(
                "agent-sync",
                "Agent Synchronization",
                "Syncing all agent data and establishing communication",
                &[],
            ),
            task(
                "performance-baseline",
                "Performance Baseline",
                "Establishing baseline metrics for optimization",
                &[],
            ),
            task(
                "automation-rules",
                "Automation Rules Setup",
                "Configuring intelligent automation workflows",
                &[],
            ),
            task(
                "monitoring-active",
                "Active Monitoring",
                "Enabling real-time monitoring and optimization",
                &["aiControllerActive", "systemHealth"],
            ),
        ],
    },
];

/// Stage id used for stream-driven niche discovery.
pub const NICHE_ANALYSIS_STAGE: &str = "niche-analysis";

/// How the first Phase 1 stage discovers a niche.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NicheDiscovery {
    /// The `micro-niche` task stage.
    #[default]
    Tasks,
    /// A stream stage reading `nicheQuery` and writing `nicheAnalysis`.
    Streaming,
}

/// Supplies task bodies for blueprint tasks.
pub trait TaskBodyProvider: Send + Sync {
    /// Returns the body for a task, or `None` if unbound.
    fn body(&self, stage: &str, task: &str) -> Option<Arc<dyn TaskBody>>;
}

/// A map-backed [`TaskBodyProvider`].
#[derive(Default)]
pub struct TaskBodyRegistry {
    bodies: HashMap<(String, String), Arc<dyn TaskBody>>,
}

impl TaskBodyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a body to `stage`/`task`, replacing any earlier binding.
    #[must_use]
    pub fn register(
        mut self,
        stage: impl Into<String>,
        task: impl Into<String>,
        body: Arc<dyn TaskBody>,
    ) -> Self {
        self.bodies.insert((stage.into(), task.into()), body);
        self
    }

    /// Returns the number of bound bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl TaskBodyProvider for TaskBodyRegistry {
    fn body(&self, stage: &str, task: &str) -> Option<Arc<dyn TaskBody>> {
        self.bodies
            .get(&(stage.to_string(), task.to_string()))
            .cloned()
    }
}

impl std::fmt::Debug for TaskBodyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBodyRegistry")
            .field("bodies", &self.bodies.len())
            .finish()
    }
}

impl StageBlueprint {
    /// Binds bodies from `provider` and produces a stage spec.
    ///
    /// # Errors
    ///
    /// Returns `PIPELINE-MISSING-BODY` if any task is unbound.
    pub fn instantiate(&self, provider: &dyn TaskBodyProvider) -> Result<StageSpec, PipelineValidationError> {
        let tasks = self
            .tasks
            .iter()
            .map(|template| {
                let body = provider.body(self.id, template.id).ok_or_else(|| {
                    PipelineValidationError::new(
                        "PIPELINE-MISSING-BODY",
                        format!("No body registered for task '{}' of stage '{}'", template.id, self.id),
                    )
                    .with_stages(vec![self.id.to_string()])
                })?;
                Ok(TaskSpec::new(template.id, template.name, body)
                    .with_description(template.description)
                    .produces(template.produces.iter().copied()))
            })
            .collect::<Result<Vec<_>, PipelineValidationError>>()?;

        Ok(StageSpec::tasks(self.id, self.name, tasks).with_prerequisites(self.prerequisites.iter().copied()))
    }
}

/// Builds the ten-stage marketing pipeline.
///
/// # Errors
///
/// Returns `PIPELINE-MISSING-BODY` if the provider lacks a body for any task
/// the blueprint declares (the `micro-niche` tasks are not required when
/// discovery is streaming).
pub fn marketing_pipeline(
    provider: &dyn TaskBodyProvider,
    discovery: NicheDiscovery,
) -> Result<Pipeline, PipelineValidationError> {
    let mut builder = PipelineBuilder::new("marketing");

    for blueprint in PHASE_ONE {
        let stage = match (discovery, blueprint.id) {
            (NicheDiscovery::Streaming, "micro-niche") => StageSpec::stream(
                NICHE_ANALYSIS_STAGE,
                "Niche Analysis",
                "nicheQuery",
                "nicheAnalysis",
            ),
            _ => blueprint.instantiate(provider)?,
        };
        builder = builder.step(stage);
    }
    for blueprint in PHASE_TWO {
        builder = builder.agent(blueprint.instantiate(provider)?);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InstantBodies, SuccessTask};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_shape() {
        assert_eq!(PHASE_ONE.len(), 6);
        assert_eq!(PHASE_TWO.len(), 4);
        assert!(PHASE_ONE.iter().all(|s| s.phase == Phase::One));
        assert!(PHASE_TWO.iter().all(|s| s.phase == Phase::Two));
    }

    #[test]
    fn test_phase_one_prerequisites_are_produced_earlier() {
        let mut produced: HashSet<&str> = HashSet::new();
        for stage in PHASE_ONE {
            for key in stage.prerequisites {
                assert!(produced.contains(key), "{} needs {key} before it is produced", stage.id);
            }
            for task in stage.tasks {
                produced.extend(task.produces.iter().copied());
            }
        }
        for stage in PHASE_TWO {
            for key in stage.prerequisites {
                assert!(produced.contains(key), "{} needs {key}", stage.id);
            }
        }
    }

    #[test]
    fn test_marketing_pipeline_with_instant_bodies() {
        let pipeline = marketing_pipeline(&InstantBodies, NicheDiscovery::Tasks).unwrap();

        let ids: Vec<_> = pipeline.phase_one().map(|s| s.id.clone()).collect();
        assert_eq!(
            ids,
            vec!["micro-niche", "emd-finder", "seo-tool", "design-scraper", "visual-content", "site-assembly"]
        );
        assert_eq!(pipeline.phase_two().count(), 4);

        let ads = pipeline.stage("ads-agent").unwrap();
        assert!(ads.produces().contains(&"adCampaigns".to_string()));
    }

    #[test]
    fn test_streaming_discovery_replaces_micro_niche() {
        let pipeline = marketing_pipeline(&InstantBodies, NicheDiscovery::Streaming).unwrap();

        let first = pipeline.phase_one().next().unwrap();
        assert_eq!(first.id, NICHE_ANALYSIS_STAGE);
        assert!(first.is_stream());
        assert_eq!(first.prerequisites, vec!["nicheQuery".to_string()]);
        assert!(pipeline.stage("micro-niche").is_none());
    }

    #[test]
    fn test_missing_body_rejected() {
        let registry = TaskBodyRegistry::new().register("micro-niche", "find-niches", SuccessTask::arc());
        let err = marketing_pipeline(&registry, NicheDiscovery::Tasks).unwrap_err();

        assert_eq!(err.code(), "PIPELINE-MISSING-BODY");
        assert_eq!(err.stages, vec!["emd-finder".to_string()]);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TaskBodyRegistry::new().register("ads-agent", "optimization", SuccessTask::arc());
        assert_eq!(registry.len(), 1);
        assert!(registry.body("ads-agent", "optimization").is_some());
        assert!(registry.body("email-agent", "optimization").is_none());
    }
}
