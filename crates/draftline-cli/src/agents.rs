//! Simulated stage agents for local runs.
//!
//! Research and competitive intel query an in-memory knowledge base; the
//! rest derive their payloads from the request and upstream results. Nothing
//! calls a model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use draftline_core::agent::Agent;
use draftline_core::domain::{
    AgentFailure, AgentOutcome, DataPoint, DraftSection, Finding, StageInput, StagePayload,
    StageType,
};
use draftline_core::impls::InMemoryKnowledgeBase;
use draftline_core::ports::KnowledgeBase;

/// Knobs for the simulation.
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    /// Transient research failures before it succeeds.
    pub research_failures: u32,
    /// Gate scores handed out in order; 1.0 once exhausted.
    pub gate_scores: Vec<f64>,
    /// Artificial latency per agent call.
    pub latency: Duration,
}

pub fn sample_knowledge_base() -> InMemoryKnowledgeBase {
    InMemoryKnowledgeBase::new()
        .with_document(
            "Youth STEM participation",
            "After-school STEM programs raise math scores and participation among \
             students from low-income households.",
        )
        .with_document(
            "Regional funders",
            "City Fund and the Harbor Foundation fund education pilots; both favour \
             programs with measurable outcomes and local staff.",
        )
        .with_document(
            "Competitor landscape",
            "Two regional nonprofits run coding clubs; neither offers mentoring or \
             family engagement.",
        )
}

/// One simulated agent serving every stage.
pub struct SimulatedAgent {
    knowledge: Arc<dyn KnowledgeBase>,
    research_failures: AtomicU32,
    gate_scores: Mutex<VecDeque<f64>>,
    latency: Duration,
}

impl SimulatedAgent {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>, simulation: Simulation) -> Self {
        Self {
            knowledge,
            research_failures: AtomicU32::new(simulation.research_failures),
            gate_scores: Mutex::new(simulation.gate_scores.into()),
            latency: simulation.latency,
        }
    }

    async fn lookup(&self, query: &str) -> Result<Vec<(String, String)>, AgentFailure> {
        let hits = self
            .knowledge
            .search(query, 3)
            .await
            .map_err(|e| AgentFailure::transient(e.to_string()))?;
        Ok(hits.into_iter().map(|h| (h.title, h.snippet)).collect())
    }

    fn next_gate_score(&self) -> f64 {
        self.gate_scores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(1.0)
    }

    async fn run(&self, input: &StageInput) -> AgentOutcome {
        let request = &input.request;
        match input.stage {
            StageType::Research => {
                let left = self.research_failures.load(Ordering::Relaxed);
                if left > 0 {
                    self.research_failures.fetch_sub(1, Ordering::Relaxed);
                    return Err(AgentFailure::transient(format!(
                        "search backend rate limited (failures left={left})"
                    )));
                }
                let query = format!("{} {}", request.title, request.focus_areas.join(" "));
                let hits = self.lookup(&query).await?;
                Ok(StagePayload::Research {
                    summary: hits
                        .iter()
                        .map(|(_, snippet)| snippet.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                    sources: hits.into_iter().map(|(title, _)| title).collect(),
                })
            }
            StageType::CompetitiveIntel => {
                let hits = self.lookup("competitor nonprofits programs").await?;
                Ok(StagePayload::CompetitiveIntel {
                    competitors: hits.into_iter().map(|(title, _)| title).collect(),
                    differentiators: vec!["mentoring".into(), "family engagement".into()],
                })
            }
            StageType::DepartmentReview(department) => Ok(StagePayload::DepartmentReview {
                department,
                recommendations: vec![format!("{department} sign-off for {}", request.title)],
                risks: Vec::new(),
            }),
            StageType::Strategy => Ok(StagePayload::Strategy {
                positioning: format!("{} as the local partner of {}", request.organization, request.funder),
                objectives: request.focus_areas.clone(),
            }),
            StageType::Drafting => {
                let mut sections = vec![
                    DraftSection::new("Statement of Need", request.summary.clone()),
                    DraftSection::new("Organization", request.organization.clone()),
                ];
                if let Some(StagePayload::Strategy { positioning, .. }) =
                    input.upstream(StageType::Strategy)
                {
                    sections.push(DraftSection::new("Approach", positioning.clone()));
                }
                if let Some(revision) = &input.revision {
                    sections.push(DraftSection::new(
                        "Revision Notes",
                        format!(
                            "revision {} addressing {}",
                            revision.attempt,
                            revision.sections_to_revise.join(", ")
                        ),
                    ));
                }
                Ok(StagePayload::Drafting { sections })
            }
            StageType::DataEnrichment => Ok(StagePayload::DataEnrichment {
                data_points: request
                    .requested_amount
                    .map(|amount| DataPoint {
                        label: "requested_amount".into(),
                        value: format!("{amount:.2}"),
                    })
                    .into_iter()
                    .collect(),
            }),
            StageType::Formatting => {
                let sections = input
                    .latest_draft()
                    .unwrap_or_default()
                    .iter()
                    .map(|s| DraftSection::new(s.title.to_uppercase(), s.body.trim()))
                    .collect();
                Ok(StagePayload::Formatting { sections })
            }
            StageType::QualityGate => {
                let score = self.next_gate_score();
                let findings = if score < 1.0 {
                    vec![Finding {
                        section: Some("Statement of Need".into()),
                        note: "needs local statistics".into(),
                    }]
                } else {
                    Vec::new()
                };
                Ok(StagePayload::QualityGate {
                    score,
                    sections_to_revise: findings.iter().filter_map(|f| f.section.clone()).collect(),
                    findings,
                })
            }
            StageType::Screening => Ok(StagePayload::Screening {
                passed: true,
                fixable: false,
                failing_aspects: Vec::new(),
                issues: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl Agent for SimulatedAgent {
    async fn execute(&self, input: StageInput) -> AgentOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        debug!(stage = %input.stage, attempt = input.attempt, "simulated agent running");
        self.run(&input).await
    }
}
