//! End-to-end scheduling scenarios with scripted agents.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::Semaphore;

use super::{Orchestrator, OrchestratorBuilder};
use crate::agent::Agent;
use crate::config::OrchestratorConfig;
use crate::domain::{
    AgentFailure, AgentOutcome, DataPoint, Decider, Decision, Department, DraftSection,
    FailureReason, JobEventKind, JobId, JobRecord, JobStatus, OrchestratorError, OutcomeKind,
    ProposalRequest, StageInput, StagePayload, StageType, Task, TaskStatus,
};
use crate::graph::PipelineShape;
use crate::impls::InMemoryJobStore;
use crate::ports::{FixedClock, JobStore, UlidGenerator};

/// Shared script for every stage agent of one orchestrator.
#[derive(Default)]
struct Script {
    queued: Mutex<HashMap<StageType, VecDeque<AgentOutcome>>>,
    gate_score: Mutex<Option<f64>>,
    held: Mutex<HashMap<StageType, Arc<Semaphore>>>,
    panics: Mutex<HashSet<StageType>>,
    calls: Mutex<Vec<StageInput>>,
}

impl Script {
    fn queue(&self, stage: StageType, outcome: AgentOutcome) {
        self.queued
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(outcome);
    }

    fn gate_score(&self, score: f64) {
        *self.gate_score.lock().unwrap() = Some(score);
    }

    /// Agents of `stage` block until `release`.
    fn hold(&self, stage: StageType) -> Arc<Semaphore> {
        let sem = Arc::new(Semaphore::new(0));
        self.held.lock().unwrap().insert(stage, Arc::clone(&sem));
        sem
    }

    fn panic_on(&self, stage: StageType) {
        self.panics.lock().unwrap().insert(stage);
    }

    fn calls_for(&self, stage: StageType) -> Vec<StageInput> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .cloned()
            .collect()
    }

    fn call_order(&self) -> Vec<StageType> {
        self.calls.lock().unwrap().iter().map(|c| c.stage).collect()
    }

    fn default_payload(&self, stage: StageType) -> StagePayload {
        match stage {
            StageType::Research => StagePayload::Research {
                summary: "community need is documented".into(),
                sources: vec!["census".into()],
            },
            StageType::CompetitiveIntel => StagePayload::CompetitiveIntel {
                competitors: vec!["Other Org".into()],
                differentiators: vec!["local staff".into()],
            },
            StageType::DepartmentReview(department) => StagePayload::DepartmentReview {
                department,
                recommendations: vec![format!("{department} ok")],
                risks: vec![],
            },
            StageType::Strategy => StagePayload::Strategy {
                positioning: "trusted local partner".into(),
                objectives: vec!["reach 200 students".into()],
            },
            StageType::Drafting => StagePayload::Drafting {
                sections: vec![DraftSection::new("Need", "draft")],
            },
            StageType::DataEnrichment => StagePayload::DataEnrichment {
                data_points: vec![DataPoint {
                    label: "students".into(),
                    value: "200".into(),
                }],
            },
            StageType::Formatting => StagePayload::Formatting {
                sections: vec![DraftSection::new("Need", "formatted")],
            },
            StageType::QualityGate => StagePayload::QualityGate {
                score: self.gate_score.lock().unwrap().unwrap_or(1.0),
                findings: vec![],
                sections_to_revise: vec!["Need".into()],
            },
            StageType::Screening => StagePayload::Screening {
                passed: true,
                fixable: false,
                failing_aspects: vec![],
                issues: vec![],
            },
        }
    }
}

struct ScriptedAgent {
    stage: StageType,
    script: Arc<Script>,
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(&self, input: StageInput) -> AgentOutcome {
        assert_eq!(input.stage, self.stage);
        self.script.calls.lock().unwrap().push(input);

        let held = self.script.held.lock().unwrap().get(&self.stage).cloned();
        if let Some(sem) = held {
            let _permit = sem.acquire().await.unwrap();
        }
        if self.script.panics.lock().unwrap().contains(&self.stage) {
            panic!("model client crashed");
        }
        let queued = self
            .script
            .queued
            .lock()
            .unwrap()
            .get_mut(&self.stage)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(self.script.default_payload(self.stage)))
    }
}

fn config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.quality.threshold = 0.7;
    config.quality.max_revisions = 3;
    config.retry.max_retries = 3;
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config.scheduler.agent_timeout_secs = 60;
    config.scheduler.lease_ttl_secs = 90;
    config
}

struct Harness {
    orchestrator: Orchestrator,
    script: Arc<Script>,
    clock: FixedClock,
    store: Arc<InMemoryJobStore>,
}

impl Harness {
    fn new(config: OrchestratorConfig) -> Self {
        let clock = FixedClock::new(start_time());
        Self::with_store(config, clock, Arc::new(InMemoryJobStore::new()))
    }

    fn with_store(
        config: OrchestratorConfig,
        clock: FixedClock,
        store: Arc<InMemoryJobStore>,
    ) -> Self {
        Self::customized(config, clock, store, |builder| builder)
    }

    fn customized(
        config: OrchestratorConfig,
        clock: FixedClock,
        store: Arc<InMemoryJobStore>,
        customize: impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder,
    ) -> Self {
        let script = Arc::new(Script::default());
        let stages = PipelineShape::from(&config.pipeline).stages();
        let mut builder = customize(
            OrchestratorBuilder::new(config)
                .with_store(store.clone())
                .with_clock(Arc::new(clock.clone()))
                .with_id_generator(Arc::new(UlidGenerator::new(clock.clone()))),
        );
        for stage in stages {
            builder = builder
                .register(
                    stage,
                    ScriptedAgent {
                        stage,
                        script: Arc::clone(&script),
                    },
                )
                .unwrap();
        }
        Self {
            orchestrator: builder.build().unwrap(),
            script,
            clock,
            store,
        }
    }

    async fn submit(&self) -> JobId {
        self.orchestrator
            .submit(
                ProposalRequest::new("req-42", "Acme Trust", "City Fund", "After-school STEM")
                    .with_summary("Two-year pilot"),
            )
            .await
            .unwrap()
    }

    /// Ticks and drains until every job is terminal.
    async fn run(&self, job_id: JobId) -> JobRecord {
        for _ in 0..200 {
            self.orchestrator.tick().await;
            self.orchestrator.drain().await;
            let job = self.orchestrator.job(job_id).await.unwrap();
            if job.is_terminal() {
                return job;
            }
        }
        panic!("job {job_id} did not finish");
    }
}

fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap()
}

fn core_pipeline(config: &mut OrchestratorConfig) {
    config.pipeline.strategy = false;
    config.pipeline.data_enrichment = false;
    config.pipeline.formatting = false;
}

fn task_attempts(job: &JobRecord, stage: StageType) -> u32 {
    job.graph.find_stage(stage).unwrap().attempts
}

#[tokio::test]
async fn happy_path_completes_with_every_stage_once() {
    let h = Harness::new(config());
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.quality_score, Some(1.0));
    assert_eq!(job.revision_count(), 0);
    assert!(job.graph.tasks().all(|t| t.status == TaskStatus::Succeeded));
    assert_eq!(h.script.call_order().len(), h.orchestrator.pipeline().stages().len());
    assert!(job.leases.is_empty());

    let view = h.orchestrator.get_status(job_id).await.unwrap();
    assert_eq!(view.progress_fraction, 1.0);
    assert_eq!(view.revision_count, 0);
}

#[tokio::test]
async fn independent_roots_dispatch_together_and_drafting_waits() {
    let h = Harness::new(config());
    let job_id = h.submit().await;

    let report = h.orchestrator.tick().await;
    assert_eq!(report.dispatched, 2);
    let job = h.orchestrator.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.leases.len(), 2);

    let job = h.run(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let order = h.script.call_order();
    let drafting = order.iter().position(|s| *s == StageType::Drafting).unwrap();
    for stage in [
        StageType::Research,
        StageType::CompetitiveIntel,
        StageType::Strategy,
        StageType::DepartmentReview(Department::Legal),
    ] {
        assert!(order.iter().position(|s| *s == stage).unwrap() < drafting);
    }

    // drafting sees every upstream result
    let input = &h.script.calls_for(StageType::Drafting)[0];
    assert!(input.upstream(StageType::Research).is_some());
    assert!(input.upstream(StageType::DepartmentReview(Department::Hr)).is_some());
    assert!(input.upstream(StageType::Strategy).is_some());
}

#[tokio::test]
async fn low_gate_score_exhausts_revision_cap() {
    let h = Harness::new(config());
    h.script.gate_score(0.5);
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::QualityExhausted));
    assert_eq!(job.revision_count(), 3);
    assert_eq!(h.script.calls_for(StageType::Drafting).len(), 4);
    assert_eq!(h.script.calls_for(StageType::Research).len(), 1);

    let failure = job.failure.unwrap();
    assert_eq!(failure.stage, Some(StageType::QualityGate));
    assert!(failure.last_error.contains("0.50"));

    let summary = job
        .decisions
        .iter()
        .find(|d| d.policy == "revision_summary")
        .unwrap();
    assert_eq!(summary.detail["revisions"], 3);
}

#[tokio::test]
async fn revision_round_hands_feedback_to_drafting() {
    let h = Harness::new(config());
    h.script.queue(
        StageType::QualityGate,
        Ok(StagePayload::QualityGate {
            score: 0.4,
            findings: vec![],
            sections_to_revise: vec!["Budget".into()],
        }),
    );
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.revision_count(), 1);
    assert_eq!(job.quality_score, Some(1.0));

    let drafts = h.script.calls_for(StageType::Drafting);
    assert_eq!(drafts.len(), 2);
    assert!(drafts[0].revision.is_none());
    let revision = drafts[1].revision.as_ref().unwrap();
    assert_eq!(revision.attempt, 1);
    assert_eq!(revision.score, Some(0.4));
    assert_eq!(revision.sections_to_revise, vec!["Budget".to_string()]);
    assert_eq!(revision.previous_draft[0].body, "formatted");

    // superseded instances are kept for history
    assert_eq!(job.graph.retired().len(), 5);
    assert_eq!(
        job.revisions[0].requeued_stages,
        vec![
            StageType::Drafting,
            StageType::DataEnrichment,
            StageType::Formatting,
            StageType::QualityGate,
            StageType::Screening,
        ]
    );
}

#[tokio::test]
async fn fixable_screening_failure_requeues_failing_aspect() {
    let h = Harness::new(config());
    h.script.queue(
        StageType::Screening,
        Ok(StagePayload::Screening {
            passed: false,
            fixable: true,
            failing_aspects: vec![StageType::Formatting],
            issues: vec!["page limit exceeded".into()],
        }),
    );
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.revision_count(), 1);
    assert_eq!(h.script.calls_for(StageType::Drafting).len(), 1);
    assert_eq!(h.script.calls_for(StageType::Formatting).len(), 2);
    let formatting = &h.script.calls_for(StageType::Formatting)[1];
    assert_eq!(
        formatting.revision.as_ref().unwrap().issues,
        vec!["page limit exceeded".to_string()]
    );
}

#[tokio::test]
async fn fixable_screening_failure_at_revision_cap_rejects_job() {
    let mut config = config();
    config.quality.max_revisions = 1;
    let h = Harness::new(config);
    for _ in 0..3 {
        h.script.queue(
            StageType::Screening,
            Ok(StagePayload::Screening {
                passed: false,
                fixable: true,
                failing_aspects: vec![StageType::Formatting],
                issues: vec!["page limit".into()],
            }),
        );
    }
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::ScreeningRejected));
    assert_eq!(job.revision_count(), 1);
    assert_eq!(h.script.calls_for(StageType::Screening).len(), 2);
    let failure = job.failure.unwrap();
    assert_eq!(failure.stage, Some(StageType::Screening));
    assert!(failure.last_error.contains("revision cap"));
    assert!(failure.last_error.contains("page limit"));
}

#[tokio::test]
async fn unfixable_screening_failure_rejects_job() {
    let h = Harness::new(config());
    h.script.queue(
        StageType::Screening,
        Ok(StagePayload::Screening {
            passed: false,
            fixable: false,
            failing_aspects: vec![],
            issues: vec!["ineligible applicant".into()],
        }),
    );
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::ScreeningRejected));
    assert!(job.failure.unwrap().last_error.contains("ineligible applicant"));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = Harness::new(config());
    h.script.queue(StageType::Research, Err(AgentFailure::transient("rate limited")));
    h.script.queue(StageType::Research, Err(AgentFailure::transient("rate limited")));
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(task_attempts(&job, StageType::Research), 3);
    let outcomes: Vec<OutcomeKind> = job
        .attempts
        .iter()
        .filter(|a| a.stage == StageType::Research)
        .map(|a| a.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![OutcomeKind::Transient, OutcomeKind::Transient, OutcomeKind::Success]
    );
    let attempts: Vec<u32> = h
        .script
        .calls_for(StageType::Research)
        .iter()
        .map(|c| c.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    let mut config = config();
    config.retry.max_retries = 1;
    let h = Harness::new(config);
    for _ in 0..2 {
        h.script.queue(StageType::Research, Err(AgentFailure::transient("upstream down")));
    }
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::StageError));
    let failure = job.failure.unwrap();
    assert_eq!(failure.stage, Some(StageType::Research));
    assert_eq!(failure.attempts, 2);
    assert!(failure.last_error.contains("upstream down"));
    assert!(h.script.calls_for(StageType::Drafting).is_empty());
}

#[tokio::test]
async fn agent_timeout_is_a_transient_failure() {
    let mut config = config();
    core_pipeline(&mut config);
    config.retry.max_retries = 0;
    config.scheduler.agent_timeout_secs = 1;
    let h = Harness::new(config);
    // never released: the call only ends through the timeout
    let _research = h.script.hold(StageType::Research);
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::StageError));
    let outcomes: Vec<OutcomeKind> = job
        .attempts
        .iter()
        .filter(|a| a.stage == StageType::Research)
        .map(|a| a.outcome)
        .collect();
    assert_eq!(outcomes, vec![OutcomeKind::Transient]);
    let failure = job.failure.unwrap();
    assert_eq!(failure.stage, Some(StageType::Research));
    assert!(failure.last_error.contains("timed out"));
}

/// Never retries, whatever the failure.
struct FailFast {
    calls: Mutex<u32>,
}

impl Decider for FailFast {
    fn decide(&self, task: &Task, failure: &AgentFailure) -> Decision {
        *self.calls.lock().unwrap() += 1;
        Decision::Fail {
            reason: format!("{} is not retried here: {}", task.stage, failure.detail),
        }
    }
}

#[tokio::test]
async fn injected_decider_replaces_retry_policy() {
    let decider = Arc::new(FailFast {
        calls: Mutex::new(0),
    });
    let injected: Arc<dyn Decider> = decider.clone();
    let h = Harness::customized(
        config(),
        FixedClock::new(start_time()),
        Arc::new(InMemoryJobStore::new()),
        |builder| builder.with_decider(injected),
    );
    h.script.queue(StageType::Research, Err(AgentFailure::transient("rate limited")));
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::StageError));
    assert_eq!(*decider.calls.lock().unwrap(), 1);
    assert_eq!(h.script.calls_for(StageType::Research).len(), 1);
    assert!(job.failure.unwrap().last_error.contains("is not retried here"));
}

#[tokio::test]
async fn failing_optional_stage_is_skipped() {
    let h = Harness::new(config());
    h.script.queue(StageType::DataEnrichment, Err(AgentFailure::invalid("no data source")));
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let enrichment = job.graph.find_stage(StageType::DataEnrichment).unwrap();
    assert_eq!(enrichment.status, TaskStatus::Skipped);
    assert!(enrichment.error.is_some());
    assert_eq!(h.script.calls_for(StageType::Formatting).len(), 1);
}

#[tokio::test]
async fn mismatched_payload_fails_the_job() {
    let h = Harness::new(config());
    h.script.queue(
        StageType::Strategy,
        Ok(StagePayload::Research {
            summary: "wrong shape".into(),
            sources: vec![],
        }),
    );
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::StageError));
    assert_eq!(job.failure.unwrap().stage, Some(StageType::Strategy));
}

#[tokio::test]
async fn panicking_agent_is_fatal() {
    let h = Harness::new(config());
    h.script.panic_on(StageType::CompetitiveIntel);
    let job_id = h.submit().await;
    let job = h.run(job_id).await;

    assert_eq!(job.status, JobStatus::Failed(FailureReason::StageError));
    let failure = job.failure.unwrap();
    assert_eq!(failure.stage, Some(StageType::CompetitiveIntel));
    assert!(failure.last_error.contains("panicked"));
    assert_eq!(h.script.calls_for(StageType::CompetitiveIntel).len(), 1);
}

#[tokio::test]
async fn cancel_discards_in_flight_results() {
    let h = Harness::new(config());
    let research = h.script.hold(StageType::Research);
    let intel = h.script.hold(StageType::CompetitiveIntel);
    let mut events = h.orchestrator.subscribe();
    let job_id = h.submit().await;

    assert_eq!(h.orchestrator.tick().await.dispatched, 2);
    assert_eq!(h.orchestrator.scheduler().in_flight(), 2);
    h.orchestrator.cancel(job_id).await.unwrap();
    research.add_permits(1);
    intel.add_permits(1);
    h.orchestrator.drain().await;
    assert_eq!(h.orchestrator.scheduler().in_flight(), 0);

    let job = h.orchestrator.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempts.len(), 2);
    assert!(job.attempts.iter().all(|a| a.discarded));
    assert!(job.graph.tasks().all(|t| t.result.is_none()));

    assert!(matches!(
        h.orchestrator.cancel(job_id).await,
        Err(OrchestratorError::AlreadyTerminal { status: JobStatus::Cancelled, .. })
    ));
    assert_eq!(h.orchestrator.tick().await.jobs_scanned, 0);

    let mut discarded = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, JobEventKind::LateResultDiscarded { .. }) {
            discarded += 1;
        }
    }
    assert_eq!(discarded, 2);
}

#[tokio::test]
async fn expired_lease_is_recovered_by_another_instance() {
    let clock = FixedClock::new(start_time());
    let store = Arc::new(InMemoryJobStore::new());

    // the first instance dispatches both roots and never hears back
    let first = Harness::with_store(config(), clock.clone(), store.clone());
    let _research = first.script.hold(StageType::Research);
    let _intel = first.script.hold(StageType::CompetitiveIntel);
    let job_id = first.submit().await;
    assert_eq!(first.orchestrator.tick().await.dispatched, 2);

    let second = Harness::with_store(config(), clock.clone(), store.clone());
    second.clock.advance(Duration::seconds(91));
    let job = second.run(job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(task_attempts(&job, StageType::Research), 2);
    assert!(job
        .attempts
        .iter()
        .any(|a| a.stage == StageType::Research && a.outcome == OutcomeKind::Abandoned));
    assert!(job.decisions.iter().any(|d| d.policy == "lease_reaper"));

    // the recovering instance runs each stage once
    let mut order = second.script.call_order();
    let total = order.len();
    order.sort();
    order.dedup();
    assert_eq!(order.len(), total);
    assert_eq!(second.script.calls_for(StageType::Research).len(), 1);
    assert_eq!(first.script.calls_for(StageType::Drafting).len(), 0);
}

#[tokio::test]
async fn worker_pool_bounds_concurrent_dispatches() {
    let mut config = config();
    config.scheduler.max_concurrency = 2;
    let h = Harness::new(config);
    let research = h.script.hold(StageType::Research);
    let intel = h.script.hold(StageType::CompetitiveIntel);
    let a = h.submit().await;
    let b = h.submit().await;

    assert_eq!(h.orchestrator.tick().await.dispatched, 2);
    assert_eq!(h.orchestrator.scheduler().available_permits(), 0);
    assert_eq!(h.orchestrator.tick().await.dispatched, 0);

    research.add_permits(1);
    intel.add_permits(1);
    assert_eq!(h.run(a).await.status, JobStatus::Completed);
    assert_eq!(h.run(b).await.status, JobStatus::Completed);
    assert_eq!(h.orchestrator.scheduler().available_permits(), 2);
}

#[tokio::test]
async fn events_follow_the_job_lifecycle() {
    let h = Harness::new(config());
    let mut events = h.orchestrator.subscribe();
    let job_id = h.submit().await;
    h.run(job_id).await;

    let mut statuses = Vec::new();
    let mut first = None;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job_id);
        first.get_or_insert(event.kind.clone());
        if let Some(status) = event.new_status() {
            statuses.push(status);
        }
    }
    assert_eq!(first, Some(JobEventKind::Submitted));
    assert_eq!(
        statuses,
        vec![
            JobStatus::Running,
            JobStatus::AwaitingGate,
            JobStatus::Screening,
            JobStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn blank_request_is_rejected() {
    let h = Harness::new(config());
    let result = h
        .orchestrator
        .submit(ProposalRequest::new("req-1", "", "City Fund", "STEM"))
        .await;
    assert!(matches!(result, Err(OrchestratorError::InvalidRequest(msg)) if msg.contains("organization")));
    assert!(h.store.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn job_record_survives_serialization_mid_run() {
    let h = Harness::new(config());
    h.script.gate_score(0.5);
    let job_id = h.submit().await;
    for _ in 0..12 {
        h.orchestrator.tick().await;
        h.orchestrator.drain().await;
    }
    let job = h.orchestrator.job(job_id).await.unwrap();
    assert!(job.revision_count() >= 1);

    let json = serde_json::to_string(&job).unwrap();
    let back: JobRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back.status, job.status);
    assert_eq!(back.graph.len(), job.graph.len());
    assert_eq!(back.graph.retired().len(), job.graph.retired().len());
    assert_eq!(back.revisions, job.revisions);
    assert_eq!(back.attempts, job.attempts);
    assert_eq!(back.version, job.version);
}

#[tokio::test]
async fn background_loop_runs_until_shutdown() {
    let mut config = config();
    config.scheduler.tick_interval_ms = 5;
    let h = Harness::new(config);
    let job_id = h.submit().await;

    let handle = h.orchestrator.spawn();
    let mut done = false;
    for _ in 0..400 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        if h.orchestrator.job(job_id).await.unwrap().is_terminal() {
            done = true;
            break;
        }
    }
    handle.shutdown_and_join().await;

    assert!(done);
    assert_eq!(
        h.orchestrator.get_status(job_id).await.unwrap().status,
        JobStatus::Completed
    );
}
