//! Orchestrator: the public face of the engine.
//!
//! Submission, status, cancellation and event subscription, plus the
//! background scheduling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::scheduler::{Scheduler, TickReport};
use crate::domain::{
    DecisionRecord, JobEvent, JobEventKind, JobId, JobRecord, JobStatus, JobStatusView,
    OrchestratorError, ProposalRequest,
};
use crate::graph::{PipelineShape, build_pipeline};

#[derive(Clone)]
pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    shape: PipelineShape,
    revision_cap: u32,
    tick_interval: Duration,
}

impl Orchestrator {
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        shape: PipelineShape,
        revision_cap: u32,
        tick_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            shape,
            revision_cap,
            tick_interval,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &PipelineShape {
        &self.shape
    }

    /// Creates a job for `request` with a fresh task graph and persists it.
    ///
    /// # Errors
    /// `InvalidRequest` when a required field is blank.
    pub async fn submit(&self, request: ProposalRequest) -> Result<JobId, OrchestratorError> {
        let missing = request.missing_fields();
        if !missing.is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let scheduler = &self.scheduler;
        let now = scheduler.clock.now();
        let job_id = scheduler.ids.generate_job_id();
        let graph = build_pipeline(job_id, &self.shape, scheduler.ids.as_ref())?;
        let mut job = JobRecord::new(job_id, request, graph, self.revision_cap, now);
        scheduler.store.save(&mut job).await?;

        info!(
            %job_id,
            reference = %job.request.reference,
            tasks = job.graph.len(),
            revision_cap = self.revision_cap,
            "job submitted"
        );
        scheduler.publish(job_id, now, vec![JobEventKind::Submitted]);
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<JobStatusView, OrchestratorError> {
        Ok(self.job(job_id).await?.status_view())
    }

    /// The full record, including graph and history.
    pub async fn job(&self, job_id: JobId) -> Result<JobRecord, OrchestratorError> {
        Ok(self.scheduler.store.load(job_id).await?)
    }

    /// Cancels a non-terminal job. In-flight agents are not interrupted; their
    /// results are recorded as discarded when they arrive.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        let scheduler = &self.scheduler;
        let now = scheduler.clock.now();
        let from = scheduler
            .update_job(job_id, |job| {
                if job.is_terminal() {
                    return Err(OrchestratorError::AlreadyTerminal {
                        job_id,
                        status: job.status,
                    });
                }
                job.decisions.push(DecisionRecord::new(
                    now,
                    None,
                    "operator",
                    "cancel",
                    serde_json::json!({ "in_flight": job.leases.len() }),
                ));
                job.transition_to(JobStatus::Cancelled, now)
                    .ok_or(OrchestratorError::AlreadyTerminal {
                        job_id,
                        status: job.status,
                    })
            })
            .await?;

        info!(%job_id, %from, "job cancelled");
        scheduler.publish(
            job_id,
            now,
            vec![JobEventKind::StatusChanged {
                from,
                to: JobStatus::Cancelled,
            }],
        );
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.events.subscribe()
    }

    /// One scheduling pass. The background loop calls this every tick
    /// interval; tests call it directly.
    pub async fn tick(&self) -> TickReport {
        self.scheduler.tick().await
    }

    /// Waits for every in-flight agent execution to finish and record its
    /// result.
    pub async fn drain(&self) {
        self.scheduler.drain().await;
    }

    /// Starts the scheduling loop in the background.
    pub fn spawn(&self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(&self.scheduler);
        let period = self.tick_interval;

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(tick_ms = period.as_millis() as u64, "scheduler started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let report = scheduler.tick().await;
                        if report.errors > 0 {
                            debug!(?report, "tick finished with errors");
                        }
                    }
                }
            }

            info!("scheduler stopping, draining in-flight agents");
            scheduler.drain().await;
            info!("scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, join }
    }
}

/// Handle to the background scheduling loop.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops dispatching, waits for in-flight agents, and joins the loop.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}
