//! Scheduler: one pass over every active job, dispatching ready tasks to a
//! bounded pool of agent executions.
//!
//! Every job mutation goes through `update_job`, which takes the per-job lock,
//! loads the record, applies the change and saves it with a version check.
//! Agent calls run outside the lock; their results come back through the same
//! path.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event_bus::EventBus;
use super::lifecycle::{self, Completion, LifecycleContext};
use super::locks::JobLocks;
use super::recovery;
use crate::agent::{Agent, AgentRegistry};
use crate::domain::{
    AgentFailure, AgentOutcome, Decider, JobEvent, JobEventKind, JobId, JobRecord, JobStatus,
    Lease, OrchestratorError, StageInput, StoreError, TaskId, WorkerId,
};
use crate::graph::TaskMark;
use crate::ports::{Clock, IdGenerator, JobStore};

/// Load/apply/save rounds before a version conflict is given up on.
const MAX_UPDATE_ATTEMPTS: u32 = 5;

/// Scheduler knobs, resolved from `OrchestratorConfig` by the builder.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Minimum quality-gate score that lets a job proceed to screening.
    pub quality_threshold: f64,

    /// Upper bound on one agent call; expiry is a transient failure.
    pub agent_timeout: Duration,

    /// How long a dispatch stays owned by its worker. Longer than
    /// `agent_timeout`, so a live worker never loses its lease.
    pub lease_ttl: chrono::Duration,

    /// Size of the worker pool, shared by every job.
    pub max_concurrency: usize,
}

/// What one `tick` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub jobs_scanned: usize,
    pub dispatched: usize,
    pub leases_reaped: usize,
    pub transitions: usize,
    pub errors: usize,
}

/// A task claimed during a tick, launched once the claim is saved.
struct Dispatch {
    input: StageInput,
    agent: Arc<dyn Agent>,
    worker_id: WorkerId,
    dispatched_at: DateTime<Utc>,
    permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct TickEffects {
    events: Vec<JobEventKind>,
    dispatches: Vec<Dispatch>,
    reaped: usize,
}

/// Drives every active job in the store.
///
/// Invariants:
/// - a task is dispatched only while it is Ready, has no live lease, and a
///   worker permit is free
/// - the claim (Running status plus lease) is saved before the agent starts
/// - a result is applied under the same per-job lock and version check as
///   the claim
///
/// Several schedulers may share one store; the version check keeps their
/// updates from overwriting each other.
pub struct Scheduler {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) events: Arc<EventBus>,
    locks: JobLocks,
    permits: Arc<Semaphore>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<AgentRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        decider: Arc<dyn Decider>,
        events: Arc<EventBus>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            ids,
            decider,
            events,
            locks: JobLocks::new(),
            permits: Arc::new(Semaphore::new(settings.max_concurrency)),
            in_flight: Mutex::new(Vec::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Free worker slots.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Agent executions spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        let handles = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        handles.iter().filter(|h| !h.is_finished()).count()
    }

    fn context(&self, now: DateTime<Utc>) -> LifecycleContext<'_> {
        LifecycleContext {
            now,
            threshold: self.settings.quality_threshold,
            decider: self.decider.as_ref(),
            ids: self.ids.as_ref(),
        }
    }

    pub(crate) fn publish(&self, job_id: JobId, at: DateTime<Utc>, kinds: Vec<JobEventKind>) {
        for kind in kinds {
            self.events.publish(JobEvent::new(job_id, at, kind));
        }
    }

    /// Applies `apply` to the stored job under its lock and saves the result.
    ///
    /// On a version conflict the record is reloaded and `apply` runs again. An
    /// `Err` from `apply` leaves the stored record untouched.
    pub(crate) async fn update_job<T>(
        &self,
        job_id: JobId,
        mut apply: impl FnMut(&mut JobRecord) -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let _guard = self.locks.lock(job_id).await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut job = self.store.load(job_id).await?;
            let value = apply(&mut job)?;
            match self.store.save(&mut job).await {
                Ok(()) => {
                    if job.is_terminal() {
                        self.locks.forget(job_id);
                    }
                    return Ok(value);
                }
                Err(StoreError::Conflict {
                    expected, found, ..
                }) if attempt < MAX_UPDATE_ATTEMPTS => {
                    debug!(%job_id, expected, found, attempt, "version conflict, reloading job");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One scheduling pass over every active job.
    ///
    /// Per job: reclaim expired leases, advance the lifecycle, promote the
    /// ready set, and dispatch ready tasks while worker slots are free.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let mut report = TickReport::default();
        let active = match self.store.list_active().await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "failed to list active jobs");
                report.errors += 1;
                return report;
            }
        };

        for job_id in active {
            report.jobs_scanned += 1;
            match self.tick_job(job_id).await {
                Ok((dispatched, reaped, transitions)) => {
                    report.dispatched += dispatched;
                    report.leases_reaped += reaped;
                    report.transitions += transitions;
                }
                Err(OrchestratorError::JobNotFound(_)) => {}
                Err(e) => {
                    warn!(%job_id, error = %e, "tick failed for job");
                    report.errors += 1;
                }
            }
        }

        self.prune_finished();
        if report.dispatched > 0 || report.transitions > 0 || report.leases_reaped > 0 {
            debug!(?report, "tick");
        }
        report
    }

    async fn tick_job(self: &Arc<Self>, job_id: JobId) -> Result<(usize, usize, usize), OrchestratorError> {
        let now = self.clock.now();
        let effects = self
            .update_job(job_id, |job| Ok(self.plan(job, now)))
            .await?;

        let transitions = effects
            .events
            .iter()
            .filter(|e| matches!(e, JobEventKind::StatusChanged { .. }))
            .count();
        let dispatched = effects.dispatches.len();
        self.publish(job_id, now, effects.events);
        for dispatch in effects.dispatches {
            self.launch(job_id, dispatch);
        }
        Ok((dispatched, effects.reaped, transitions))
    }

    /// Decides everything this tick does to `job` and claims the tasks it
    /// dispatches. Nothing runs until the claim is saved.
    fn plan(&self, job: &mut JobRecord, now: DateTime<Utc>) -> TickEffects {
        let mut fx = TickEffects::default();
        if job.is_terminal() {
            return fx;
        }
        let ctx = self.context(now);

        fx.reaped = recovery::reap_expired_leases(job, &ctx, &mut fx.events);
        lifecycle::advance(job, &ctx, &mut fx.events);
        if job.is_terminal() {
            return fx;
        }

        if let Err(e) = job.graph.promote_ready(now) {
            warn!(job_id = %job.id, error = %e, "could not promote ready tasks");
        }

        for task_id in job.graph.dispatchable() {
            if job.leases.contains_key(&task_id) {
                continue;
            }
            let Some(stage) = job.graph.get(task_id).map(|t| t.stage) else {
                continue;
            };
            if !job.status.admits(stage) {
                continue;
            }
            let Some(agent) = self.registry.get(stage) else {
                warn!(job_id = %job.id, %stage, "no agent registered for stage");
                continue;
            };
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                debug!(job_id = %job.id, "worker pool saturated");
                break;
            };
            if let Err(e) = job.graph.mark(task_id, TaskMark::Running { at: now }) {
                warn!(job_id = %job.id, %task_id, error = %e, "could not dispatch task");
                continue;
            }
            if job.status == JobStatus::Pending {
                lifecycle::transition(job, JobStatus::Running, now, &mut fx.events);
            }

            let worker_id = self.ids.generate_worker_id();
            job.leases.insert(
                task_id,
                Lease::new(task_id, worker_id, now, self.settings.lease_ttl),
            );
            let Some(input) = stage_input(job, task_id) else {
                continue;
            };
            info!(job_id = %job.id, %task_id, %stage, attempt = input.attempt, %worker_id, "dispatching task");
            fx.events.push(JobEventKind::TaskDispatched {
                task_id,
                stage,
                attempt: input.attempt,
                worker_id,
            });
            fx.dispatches.push(Dispatch {
                input,
                agent,
                worker_id,
                dispatched_at: now,
                permit,
            });
        }
        fx
    }

    /// Spawns the agent call for a saved claim. The worker permit is held
    /// until the result is recorded.
    fn launch(self: &Arc<Self>, job_id: JobId, dispatch: Dispatch) {
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let Dispatch {
                input,
                agent,
                worker_id,
                dispatched_at,
                permit,
            } = dispatch;
            let task_id = input.task_id;
            let attempt = input.attempt;
            let outcome = scheduler.run_agent(agent, input).await;
            let completion = Completion {
                task_id,
                worker_id,
                attempt,
                started_at: dispatched_at,
                outcome,
            };
            if let Err(e) = scheduler.complete(job_id, completion).await {
                error!(%job_id, %task_id, error = %e, "failed to record task result");
            }
            drop(permit);
        });
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Runs one agent call under the timeout. A timeout is a transient
    /// failure, a panic a fatal one.
    async fn run_agent(&self, agent: Arc<dyn Agent>, input: StageInput) -> AgentOutcome {
        let stage = input.stage;
        let limit = self.settings.agent_timeout;
        let call = AssertUnwindSafe(agent.execute(input)).catch_unwind();
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => Err(AgentFailure::fatal(format!(
                "agent for {stage} panicked: {}",
                panic_message(&*panic)
            ))),
            Err(_) => Err(AgentFailure::transient(format!(
                "agent for {stage} timed out after {}s",
                limit.as_secs()
            ))),
        }
    }

    /// Records an agent result and applies everything that follows from it.
    ///
    /// The result only takes effect while the worker still holds the task's
    /// lease; otherwise it lands in the history as discarded.
    pub(crate) async fn complete(
        &self,
        job_id: JobId,
        completion: Completion,
    ) -> Result<(), OrchestratorError> {
        let (now, events) = self
            .update_job(job_id, |job| {
                let now = self.clock.now();
                let mut events = Vec::new();
                lifecycle::record_result(job, completion.clone(), &self.context(now), &mut events);
                Ok((now, events))
            })
            .await?;
        self.publish(job_id, now, events);
        Ok(())
    }

    /// Waits for every spawned agent execution, including ones spawned while
    /// waiting.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *in_flight)
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    error!(error = %e, "agent execution task panicked");
                }
            }
        }
    }

    fn prune_finished(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|h| !h.is_finished());
    }
}

/// What the agent for `task_id` receives: the request, succeeded upstream
/// payloads, and the revision context when the task was created by one.
fn stage_input(job: &JobRecord, task_id: TaskId) -> Option<StageInput> {
    let task = job.graph.get(task_id)?;
    Some(StageInput {
        job_id: job.id,
        task_id,
        stage: task.stage,
        attempt: task.attempts,
        request: job.request.clone(),
        upstream: job.graph.upstream_payloads(task_id),
        revision: job.revision_for(task_id).map(|r| r.context.clone()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
