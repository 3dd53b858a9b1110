//! Job lifecycle: recording agent results, applying failure decisions, and
//! advancing the job state machine.
//!
//! Everything here is synchronous and operates on a loaded `JobRecord`; the
//! scheduler runs it inside one locked, versioned update per job.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::gate;
use crate::domain::{
    AgentFailure, AgentOutcome, AttemptRecord, Decider, Decision, DecisionRecord, FailureReason,
    JobEventKind, JobFailure, JobRecord, JobStatus, OutcomeKind, StageType, TaskError, TaskId,
    TaskStatus, WorkerId,
};
use crate::graph::TaskMark;
use crate::ports::IdGenerator;

/// Upper bound on chained transitions in one `advance` call
/// (e.g. Screening -> Revising -> Running -> AwaitingGate -> Screening).
const MAX_ADVANCE_STEPS: usize = 8;

/// What lifecycle code needs from the scheduler for one update.
pub(crate) struct LifecycleContext<'a> {
    pub now: DateTime<Utc>,
    pub threshold: f64,
    pub decider: &'a dyn Decider,
    pub ids: &'a dyn IdGenerator,
}

/// Applies a status transition and queues its event. Returns whether it applied.
pub(crate) fn transition(
    job: &mut JobRecord,
    next: JobStatus,
    now: DateTime<Utc>,
    events: &mut Vec<JobEventKind>,
) -> bool {
    match job.transition_to(next, now) {
        Some(from) => {
            info!(job_id = %job.id, %from, to = %next, "job status changed");
            events.push(JobEventKind::StatusChanged { from, to: next });
            true
        }
        None => false,
    }
}

/// Fails the job with diagnostics and queues the status event.
pub(crate) fn fail_job(
    job: &mut JobRecord,
    failure: JobFailure,
    now: DateTime<Utc>,
    events: &mut Vec<JobEventKind>,
) {
    let reason = failure.reason;
    let last_error = failure.last_error.clone();
    if let Some(from) = job.fail(failure, now) {
        error!(job_id = %job.id, %reason, error = %last_error, "job failed");
        events.push(JobEventKind::StatusChanged {
            from,
            to: JobStatus::Failed(reason),
        });
    }
}

/// One finished agent call, as reported by the worker that ran it.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    /// Attempt number the worker was dispatched with. After a lease reclaim
    /// the task may already be on a later attempt.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AgentOutcome,
}

/// Records the outcome of one dispatch.
///
/// Results for a terminal job, a retired task, or a lease that has moved to
/// another worker are kept in the attempt history under the worker's own
/// attempt number and otherwise ignored.
pub(crate) fn record_result(
    job: &mut JobRecord,
    completion: Completion,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) {
    let Completion {
        task_id,
        worker_id,
        attempt,
        started_at,
        outcome,
    } = completion;
    let Some(task) = job
        .graph
        .get(task_id)
        .or_else(|| job.graph.find_retired(task_id))
    else {
        warn!(job_id = %job.id, %task_id, "result for unknown task");
        return;
    };
    let stage = task.stage;

    let lease_held = job
        .leases
        .get(&task_id)
        .is_some_and(|lease| lease.is_held_by(worker_id));
    let discard = if job.is_terminal() {
        Some(format!("job is {}", job.status))
    } else if job.graph.get(task_id).is_none() {
        Some("task was superseded by a revision".to_string())
    } else if !lease_held {
        Some("lease is no longer held by this worker".to_string())
    } else {
        None
    };

    if let Some(reason) = discard {
        warn!(job_id = %job.id, %task_id, %stage, %worker_id, %reason, "discarding late result");
        job.attempts.push(AttemptRecord {
            task_id,
            stage,
            attempt,
            worker_id,
            outcome: outcome_kind(&outcome),
            detail: Some(reason.clone()),
            started_at,
            finished_at: ctx.now,
            discarded: true,
        });
        events.push(JobEventKind::LateResultDiscarded {
            task_id,
            stage,
            reason,
        });
        return;
    }

    job.leases.remove(&task_id);

    let outcome = outcome.and_then(|payload| match payload.validate_for(stage) {
        Ok(()) => Ok(payload),
        Err(reason) => Err(AgentFailure::invalid(reason)),
    });

    job.attempts.push(AttemptRecord {
        task_id,
        stage,
        attempt,
        worker_id,
        outcome: outcome_kind(&outcome),
        detail: outcome.as_ref().err().map(|f| f.detail.clone()),
        started_at,
        finished_at: ctx.now,
        discarded: false,
    });

    match outcome {
        Ok(payload) => match job.graph.mark(task_id, TaskMark::Succeeded(payload)) {
            Ok(_) => {
                info!(job_id = %job.id, %task_id, %stage, attempt, "task succeeded");
                events.push(JobEventKind::TaskSucceeded { task_id, stage });
            }
            Err(e) => warn!(job_id = %job.id, %task_id, error = %e, "could not record success"),
        },
        Err(failure) => apply_failure(job, task_id, &failure, ctx, events),
    }

    advance(job, ctx, events);
}

fn outcome_kind(outcome: &AgentOutcome) -> OutcomeKind {
    match outcome {
        Ok(_) => OutcomeKind::Success,
        Err(failure) => failure.kind.into(),
    }
}

/// Runs the decider on a failed Running task and applies its decision.
pub(crate) fn apply_failure(
    job: &mut JobRecord,
    task_id: TaskId,
    failure: &AgentFailure,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) {
    let Some(task) = job.graph.get(task_id) else {
        return;
    };
    let stage = task.stage;
    let attempt = task.attempts;
    let decision = ctx.decider.decide(task, failure);
    let error = TaskError::from_failure(failure, attempt);

    job.decisions.push(DecisionRecord::new(
        ctx.now,
        Some(task_id),
        "retry_policy",
        decision.label(),
        serde_json::json!({
            "stage": stage,
            "attempt": attempt,
            "kind": failure.kind,
            "detail": failure.detail,
            "reason": decision.reason(),
        }),
    ));

    let marked = match &decision {
        Decision::Retry { delay, .. } => {
            warn!(job_id = %job.id, %task_id, %stage, attempt, ?delay, error = %failure, "task will be retried");
            events.push(JobEventKind::TaskRetryScheduled {
                task_id,
                stage,
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            job.graph.mark(
                task_id,
                TaskMark::Retry {
                    error,
                    not_before: after(ctx.now, *delay),
                },
            )
        }
        Decision::Skip { reason } => {
            warn!(job_id = %job.id, %task_id, %stage, %reason, "task skipped");
            events.push(JobEventKind::TaskSkipped {
                task_id,
                stage,
                reason: reason.clone(),
            });
            job.graph.mark(task_id, TaskMark::Skipped(Some(error)))
        }
        Decision::Fail { reason } => {
            events.push(JobEventKind::TaskFailed {
                task_id,
                stage,
                error: failure.to_string(),
            });
            let marked = job.graph.mark(task_id, TaskMark::Failed(error));
            fail_job(
                job,
                JobFailure {
                    reason: FailureReason::StageError,
                    stage: Some(stage),
                    task_id: Some(task_id),
                    attempts: attempt,
                    last_error: reason.clone(),
                },
                ctx.now,
                events,
            );
            marked
        }
    };
    if let Err(e) = marked {
        warn!(job_id = %job.id, %task_id, error = %e, "could not apply failure decision");
    }
}

fn after(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Advances the job as far as its graph allows.
pub(crate) fn advance(
    job: &mut JobRecord,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) {
    for _ in 0..MAX_ADVANCE_STEPS {
        if !step(job, ctx, events) {
            break;
        }
    }

    if !job.is_terminal() && job.status != JobStatus::Pending && !job.graph.has_outstanding() {
        let last_error = format!("no runnable task left while {}", job.status);
        fail_job(
            job,
            JobFailure {
                reason: FailureReason::Stalled,
                stage: job.current_stage(),
                task_id: None,
                attempts: 0,
                last_error,
            },
            ctx.now,
            events,
        );
    }
}

/// One transition, if any applies.
fn step(job: &mut JobRecord, ctx: &LifecycleContext<'_>, events: &mut Vec<JobEventKind>) -> bool {
    match job.status {
        JobStatus::Running if job.graph.content_complete() => {
            transition(job, JobStatus::AwaitingGate, ctx.now, events)
        }
        JobStatus::AwaitingGate if stage_succeeded(job, StageType::QualityGate) => {
            gate::evaluate_gate(job, ctx, events);
            true
        }
        JobStatus::Screening if stage_succeeded(job, StageType::Screening) => {
            gate::evaluate_screening(job, ctx, events);
            true
        }
        JobStatus::Revising => transition(job, JobStatus::Running, ctx.now, events),
        _ => false,
    }
}

fn stage_succeeded(job: &JobRecord, stage: StageType) -> bool {
    job.graph
        .find_stage(stage)
        .is_some_and(|t| t.status == TaskStatus::Succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::retry::RetryPolicy;
    use crate::domain::{
        DefaultDecider, DraftSection, JobId, Lease, ProposalRequest, StagePayload, Task,
    };
    use crate::graph::{PipelineShape, TaskGraph, build_pipeline};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::TimeZone;

    struct Harness {
        job: JobRecord,
        decider: DefaultDecider,
        ids: UlidGenerator<FixedClock>,
        now: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let now = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
            let ids = UlidGenerator::new(FixedClock::new(now));
            let job_id = JobId::generate();
            let graph = build_pipeline(job_id, &PipelineShape::core(), &ids).unwrap();
            let job = JobRecord::new(
                job_id,
                ProposalRequest::new("req-1", "Acme", "Fund", "Pilot"),
                graph,
                2,
                now,
            );
            Self {
                job,
                decider: DefaultDecider::new(RetryPolicy::immediate(), 1),
                ids,
                now,
            }
        }

        fn ctx(&self) -> LifecycleContext<'_> {
            LifecycleContext {
                now: self.now,
                threshold: 0.8,
                decider: &self.decider,
                ids: &self.ids,
            }
        }

        /// Dispatches the active task of `stage` and returns its worker.
        fn dispatch(&mut self, stage: StageType) -> (TaskId, WorkerId) {
            let task_id = self.job.graph.find_stage(stage).unwrap().id;
            self.job.graph.promote_ready(self.now).unwrap();
            self.job
                .graph
                .mark(task_id, TaskMark::Running { at: self.now })
                .unwrap();
            let mut events = Vec::new();
            transition(&mut self.job, JobStatus::Running, self.now, &mut events);
            let worker = WorkerId::generate();
            self.job.leases.insert(
                task_id,
                Lease::new(task_id, worker, self.now, chrono::Duration::seconds(60)),
            );
            (task_id, worker)
        }

        fn finish(&mut self, stage: StageType, outcome: AgentOutcome) -> Vec<JobEventKind> {
            let (task_id, worker) = self.dispatch(stage);
            let mut events = Vec::new();
            let mut job = self.job.clone();
            let attempt = job.graph.get(task_id).unwrap().attempts;
            let completion = Completion {
                task_id,
                worker_id: worker,
                attempt,
                started_at: self.now,
                outcome,
            };
            record_result(&mut job, completion, &self.ctx(), &mut events);
            self.job = job;
            events
        }

        fn run_content(&mut self) {
            self.finish(
                StageType::Research,
                Ok(StagePayload::Research {
                    summary: "s".into(),
                    sources: vec![],
                }),
            );
            self.finish(
                StageType::CompetitiveIntel,
                Ok(StagePayload::CompetitiveIntel {
                    competitors: vec![],
                    differentiators: vec![],
                }),
            );
            for d in crate::domain::Department::ALL {
                self.finish(
                    StageType::DepartmentReview(d),
                    Ok(StagePayload::DepartmentReview {
                        department: d,
                        recommendations: vec![],
                        risks: vec![],
                    }),
                );
            }
            self.finish(
                StageType::Drafting,
                Ok(StagePayload::Drafting {
                    sections: vec![DraftSection::new("Need", "v")],
                }),
            );
        }
    }

    fn gate(score: f64) -> AgentOutcome {
        Ok(StagePayload::QualityGate {
            score,
            findings: vec![],
            sections_to_revise: vec!["Need".into()],
        })
    }

    #[test]
    fn content_completion_moves_to_awaiting_gate() {
        let mut h = Harness::new();
        h.run_content();
        assert_eq!(h.job.status, JobStatus::AwaitingGate);
    }

    #[test]
    fn gate_pass_moves_to_screening_and_records_score() {
        let mut h = Harness::new();
        h.run_content();
        h.finish(StageType::QualityGate, gate(0.9));
        assert_eq!(h.job.status, JobStatus::Screening);
        assert_eq!(h.job.quality_score, Some(0.9));
    }

    #[test]
    fn gate_rejection_requeues_drafting_subgraph() {
        let mut h = Harness::new();
        h.run_content();
        let old_draft = h.job.graph.find_stage(StageType::Drafting).unwrap().id;

        let events = h.finish(StageType::QualityGate, gate(0.5));

        assert_eq!(h.job.status, JobStatus::Running);
        assert_eq!(h.job.revision_count(), 1);
        let new_draft = h.job.graph.find_stage(StageType::Drafting).unwrap();
        assert_ne!(new_draft.id, old_draft);
        assert_eq!(new_draft.status, TaskStatus::Waiting);
        let revision = &h.job.revisions[0];
        assert_eq!(revision.trigger_score, Some(0.5));
        assert_eq!(revision.context.sections_to_revise, vec!["Need".to_string()]);
        assert_eq!(revision.context.previous_draft.len(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, JobEventKind::RevisionScheduled { revision: 1, .. })));
        // research results are kept
        assert_eq!(
            h.job.graph.find_stage(StageType::Research).unwrap().status,
            TaskStatus::Succeeded
        );
    }

    #[test]
    fn gate_rejection_at_cap_exhausts_quality() {
        let mut h = Harness::new();
        h.run_content();
        for _ in 0..2 {
            h.finish(StageType::QualityGate, gate(0.5));
            h.finish(
                StageType::Drafting,
                Ok(StagePayload::Drafting { sections: vec![] }),
            );
        }
        h.finish(StageType::QualityGate, gate(0.5));

        assert_eq!(h.job.status, JobStatus::Failed(FailureReason::QualityExhausted));
        assert_eq!(h.job.revision_count(), 2);
        let failure = h.job.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Some(StageType::QualityGate));
        assert!(h.job.leases.is_empty());
    }

    #[test]
    fn fatal_failure_fails_job_with_diagnostics() {
        let mut h = Harness::new();
        h.finish(StageType::Research, Err(AgentFailure::fatal("boom")));

        assert_eq!(h.job.status, JobStatus::Failed(FailureReason::StageError));
        let failure = h.job.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Some(StageType::Research));
        assert_eq!(failure.attempts, 1);
        assert!(failure.last_error.contains("boom"));
    }

    #[test]
    fn transient_failure_goes_back_to_waiting() {
        let mut h = Harness::new();
        let events = h.finish(StageType::Research, Err(AgentFailure::transient("429")));

        let task = h.job.graph.find_stage(StageType::Research).unwrap();
        assert_eq!(task.status, TaskStatus::Waiting);
        assert_eq!(task.attempts, 1);
        assert_eq!(h.job.status, JobStatus::Running);
        assert!(events
            .iter()
            .any(|e| matches!(e, JobEventKind::TaskRetryScheduled { attempt: 1, .. })));
    }

    #[test]
    fn mismatched_payload_is_invalid() {
        let mut h = Harness::new();
        h.finish(
            StageType::Research,
            Ok(StagePayload::Strategy {
                positioning: "x".into(),
                objectives: vec![],
            }),
        );
        assert_eq!(h.job.status, JobStatus::Failed(FailureReason::StageError));
        assert_eq!(h.job.attempts[0].outcome, OutcomeKind::Invalid);
    }

    #[test]
    fn result_from_stale_worker_is_discarded() {
        let mut h = Harness::new();
        let (task_id, _worker) = h.dispatch(StageType::Research);

        let mut events = Vec::new();
        let mut job = h.job.clone();
        let completion = Completion {
            task_id,
            worker_id: WorkerId::generate(),
            attempt: 1,
            started_at: h.now,
            outcome: Ok(StagePayload::Research {
                summary: "late".into(),
                sources: vec![],
            }),
        };
        record_result(&mut job, completion, &h.ctx(), &mut events);

        assert_eq!(job.graph.get(task_id).unwrap().status, TaskStatus::Running);
        assert!(job.attempts[0].discarded);
        assert!(matches!(events[0], JobEventKind::LateResultDiscarded { .. }));
    }

    #[test]
    fn stale_result_keeps_the_attempt_it_was_dispatched_with() {
        let mut h = Harness::new();
        let (task_id, first_worker) = h.dispatch(StageType::Research);

        // lease reclaimed, task handed to another worker
        h.job.leases.remove(&task_id);
        h.job
            .graph
            .mark(
                task_id,
                TaskMark::Retry {
                    error: TaskError::from_failure(&AgentFailure::transient("lease expired"), 1),
                    not_before: h.now,
                },
            )
            .unwrap();
        h.dispatch(StageType::Research);
        assert_eq!(h.job.graph.get(task_id).unwrap().attempts, 2);

        let mut events = Vec::new();
        let mut job = h.job.clone();
        let completion = Completion {
            task_id,
            worker_id: first_worker,
            attempt: 1,
            started_at: h.now,
            outcome: Ok(StagePayload::Research {
                summary: "late".into(),
                sources: vec![],
            }),
        };
        record_result(&mut job, completion, &h.ctx(), &mut events);

        let record = job.attempts.last().unwrap();
        assert!(record.discarded);
        assert_eq!(record.attempt, 1);
        assert_eq!(record.worker_id, first_worker);
        let task = job.graph.get(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempts, 2);
    }

    #[test]
    fn job_with_nothing_left_to_run_is_stalled() {
        let h = Harness::new();
        let job_id = JobId::generate();
        let task_id = TaskId::generate();
        let mut graph = TaskGraph::new();
        graph
            .add_task(Task::new(task_id, job_id, StageType::Research))
            .unwrap();
        graph.mark(task_id, TaskMark::Ready).unwrap();
        graph.mark(task_id, TaskMark::Running { at: h.now }).unwrap();
        graph
            .mark(
                task_id,
                TaskMark::Failed(TaskError::from_failure(&AgentFailure::invalid("bad"), 1)),
            )
            .unwrap();

        let mut job = JobRecord::new(
            job_id,
            ProposalRequest::new("req-2", "Acme", "Fund", "Pilot"),
            graph,
            2,
            h.now,
        );
        let mut events = Vec::new();
        transition(&mut job, JobStatus::Running, h.now, &mut events);
        assert!(!job.graph.content_complete());

        advance(&mut job, &h.ctx(), &mut events);

        assert_eq!(job.status, JobStatus::Failed(FailureReason::Stalled));
        assert!(job
            .failure
            .as_ref()
            .unwrap()
            .last_error
            .contains("no runnable task"));
        assert!(matches!(
            events.last(),
            Some(JobEventKind::StatusChanged {
                to: JobStatus::Failed(FailureReason::Stalled),
                ..
            })
        ));
    }
}
