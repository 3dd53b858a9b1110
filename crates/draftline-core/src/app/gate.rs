//! Quality gate and screening evaluation, and the revision rounds they
//! trigger.

use tracing::{info, warn};

use super::lifecycle::{LifecycleContext, fail_job, transition};
use crate::domain::{
    DecisionRecord, DraftSection, FailureReason, JobEventKind, JobFailure, JobRecord, JobStatus,
    RevisionContext, RevisionRecord, RevisionTrigger, StagePayload, StageType, TaskId,
};

/// Acts on a succeeded quality gate: proceed to screening, start a revision
/// round, or fail once the revision cap is reached.
pub(crate) fn evaluate_gate(
    job: &mut JobRecord,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) {
    let Some(gate) = job.graph.find_stage(StageType::QualityGate) else {
        return;
    };
    let gate_id = gate.id;
    let gate_attempts = gate.attempts;
    let Some(StagePayload::QualityGate {
        score,
        findings,
        sections_to_revise,
    }) = gate.result.clone()
    else {
        return;
    };

    job.quality_score = Some(score);
    let revisions = job.revision_count();

    if score >= ctx.threshold {
        job.decisions.push(DecisionRecord::new(
            ctx.now,
            Some(gate_id),
            "quality_gate",
            "proceed",
            serde_json::json!({ "score": score, "threshold": ctx.threshold }),
        ));
        info!(job_id = %job.id, score, threshold = ctx.threshold, "quality gate passed");
        transition(job, JobStatus::Screening, ctx.now, events);
        return;
    }

    if revisions < job.revision_cap {
        let context = RevisionContext {
            attempt: revisions + 1,
            score: Some(score),
            sections_to_revise,
            findings,
            issues: Vec::new(),
            previous_draft: latest_draft(job),
        };
        let roots = job
            .graph
            .find_stage(StageType::Drafting)
            .map_or(gate_id, |t| t.id);
        revise(job, RevisionTrigger::QualityGate, Some(score), &[roots], context, ctx, events);
        return;
    }

    job.decisions.push(DecisionRecord::new(
        ctx.now,
        Some(gate_id),
        "quality_gate",
        "fail",
        serde_json::json!({
            "score": score,
            "threshold": ctx.threshold,
            "revisions": revisions,
        }),
    ));
    fail_job(
        job,
        JobFailure {
            reason: FailureReason::QualityExhausted,
            stage: Some(StageType::QualityGate),
            task_id: Some(gate_id),
            attempts: gate_attempts,
            last_error: format!(
                "quality score {score:.2} below threshold {:.2} after {revisions} revisions",
                ctx.threshold
            ),
        },
        ctx.now,
        events,
    );
}

/// Acts on a succeeded screening: complete, revise the failing aspects, or
/// reject.
pub(crate) fn evaluate_screening(
    job: &mut JobRecord,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) {
    let Some(screening) = job.graph.find_stage(StageType::Screening) else {
        return;
    };
    let screening_id = screening.id;
    let screening_attempts = screening.attempts;
    let Some(StagePayload::Screening {
        passed,
        fixable,
        failing_aspects,
        issues,
    }) = screening.result.clone()
    else {
        return;
    };

    let revisions = job.revision_count();
    if passed {
        job.decisions.push(DecisionRecord::new(
            ctx.now,
            Some(screening_id),
            "screening",
            "complete",
            serde_json::json!({ "revisions": revisions }),
        ));
        transition(job, JobStatus::Completed, ctx.now, events);
        return;
    }

    if fixable && revisions < job.revision_cap {
        let mut roots: Vec<TaskId> = failing_aspects
            .iter()
            .filter_map(|&stage| job.graph.find_stage(stage).map(|t| t.id))
            .collect();
        if roots.is_empty()
            && let Some(drafting) = job.graph.find_stage(StageType::Drafting)
        {
            roots.push(drafting.id);
        }
        let score = job.quality_score;
        let context = RevisionContext {
            attempt: revisions + 1,
            score,
            sections_to_revise: Vec::new(),
            findings: Vec::new(),
            issues,
            previous_draft: latest_draft(job),
        };
        revise(job, RevisionTrigger::Screening, score, &roots, context, ctx, events);
        return;
    }

    let why = if fixable {
        format!("revision cap of {} reached", job.revision_cap)
    } else {
        "not fixable".to_string()
    };
    job.decisions.push(DecisionRecord::new(
        ctx.now,
        Some(screening_id),
        "screening",
        "reject",
        serde_json::json!({ "fixable": fixable, "issues": issues, "revisions": revisions }),
    ));
    let last_error = if issues.is_empty() {
        format!("screening failed ({why})")
    } else {
        format!("screening failed ({why}): {}", issues.join("; "))
    };
    fail_job(
        job,
        JobFailure {
            reason: FailureReason::ScreeningRejected,
            stage: Some(StageType::Screening),
            task_id: Some(screening_id),
            attempts: screening_attempts,
            last_error,
        },
        ctx.now,
        events,
    );
}

/// The current draft: formatted sections when present, raw otherwise.
fn latest_draft(job: &JobRecord) -> Vec<DraftSection> {
    let formatted = job.graph.find_stage(StageType::Formatting).and_then(|t| match &t.result {
        Some(StagePayload::Formatting { sections }) => Some(sections.clone()),
        _ => None,
    });
    formatted
        .or_else(|| {
            job.graph.find_stage(StageType::Drafting).and_then(|t| match &t.result {
                Some(StagePayload::Drafting { sections }) => Some(sections.clone()),
                _ => None,
            })
        })
        .unwrap_or_default()
}

/// Starts a revision round: re-queues `roots` and everything downstream of
/// them as fresh tasks and moves the job back to Running.
fn revise(
    job: &mut JobRecord,
    trigger: RevisionTrigger,
    score: Option<f64>,
    roots: &[TaskId],
    context: RevisionContext,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) {
    if !transition(job, JobStatus::Revising, ctx.now, events) {
        return;
    }

    let pairs = match job.graph.requeue(roots, || ctx.ids.generate_task_id()) {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "could not re-queue tasks for revision");
            fail_job(
                job,
                JobFailure {
                    reason: FailureReason::StageError,
                    stage: None,
                    task_id: None,
                    attempts: 0,
                    last_error: format!("revision failed: {e}"),
                },
                ctx.now,
                events,
            );
            return;
        }
    };

    for (old, _) in &pairs {
        job.leases.remove(old);
    }
    let requeued_tasks: Vec<TaskId> = pairs.iter().map(|&(_, new)| new).collect();
    let requeued_stages: Vec<StageType> = requeued_tasks
        .iter()
        .filter_map(|id| job.graph.get(*id).map(|t| t.stage))
        .collect();
    let attempt = context.attempt;

    info!(
        job_id = %job.id,
        revision = attempt,
        %trigger,
        ?score,
        stages = ?requeued_stages,
        "revision scheduled"
    );
    job.decisions.push(DecisionRecord::new(
        ctx.now,
        None,
        trigger.to_string(),
        "revise",
        serde_json::json!({
            "revision": attempt,
            "cap": job.revision_cap,
            "score": score,
            "stages": requeued_stages,
        }),
    ));
    job.revisions.push(RevisionRecord {
        attempt,
        trigger,
        trigger_score: score,
        requeued_stages: requeued_stages.clone(),
        requeued_tasks,
        context,
        at: ctx.now,
    });
    events.push(JobEventKind::RevisionScheduled {
        revision: attempt,
        trigger,
        stages: requeued_stages,
    });

    transition(job, JobStatus::Running, ctx.now, events);
}
