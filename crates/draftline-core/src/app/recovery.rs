//! Lease expiry: reclaiming tasks whose worker stopped reporting.

use tracing::warn;

use super::lifecycle::{LifecycleContext, apply_failure};
use crate::domain::{
    AgentFailure, AttemptRecord, DecisionRecord, JobEventKind, JobRecord, Lease, OutcomeKind,
    TaskStatus,
};

/// Releases every expired lease on `job`. A Running task behind an expired
/// lease counts as a transient failure of its current attempt. Returns the
/// number of tasks reclaimed.
pub(crate) fn reap_expired_leases(
    job: &mut JobRecord,
    ctx: &LifecycleContext<'_>,
    events: &mut Vec<JobEventKind>,
) -> usize {
    let expired: Vec<Lease> = job
        .leases
        .values()
        .filter(|lease| lease.is_expired(ctx.now))
        .cloned()
        .collect();

    let mut reclaimed = 0;
    for lease in expired {
        job.leases.remove(&lease.task_id);
        let Some(task) = job.graph.get(lease.task_id) else {
            continue;
        };
        if task.status != TaskStatus::Running {
            continue;
        }
        let stage = task.stage;
        let attempt = task.attempts;

        warn!(
            job_id = %job.id,
            task_id = %lease.task_id,
            %stage,
            worker_id = %lease.worker_id,
            expiry = %lease.expiry,
            "lease expired, reclaiming task"
        );
        job.attempts.push(AttemptRecord {
            task_id: lease.task_id,
            stage,
            attempt,
            worker_id: lease.worker_id,
            outcome: OutcomeKind::Abandoned,
            detail: Some("lease expired".to_string()),
            started_at: lease.acquired_at,
            finished_at: ctx.now,
            discarded: false,
        });
        job.decisions.push(DecisionRecord::new(
            ctx.now,
            Some(lease.task_id),
            "lease_reaper",
            "reclaim",
            serde_json::json!({
                "worker_id": lease.worker_id,
                "expiry": lease.expiry,
                "attempt": attempt,
            }),
        ));
        events.push(JobEventKind::LeaseExpired {
            task_id: lease.task_id,
            stage,
            worker_id: lease.worker_id,
        });

        let failure = AgentFailure::transient(format!(
            "lease held by {} expired at {}",
            lease.worker_id, lease.expiry
        ));
        apply_failure(job, lease.task_id, &failure, ctx, events);
        reclaimed += 1;

        if job.is_terminal() {
            break;
        }
    }
    reclaimed
}
