//! Application layer: the scheduler and the job lifecycle it drives.
//!
//! - **OrchestratorBuilder**: wiring and start-up validation
//! - **Orchestrator**: submit / status / cancel / subscribe, background loop
//! - **Scheduler**: per-tick dispatch, bounded worker pool, leases, timeouts
//! - **lifecycle / gate / recovery**: pure state transitions on a job record
//! - **EventBus**: broadcast of job events
//! - **RetryPolicy**: exponential backoff

pub mod builder;
pub mod event_bus;
mod gate;
mod lifecycle;
pub mod locks;
pub mod orchestrator;
mod recovery;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod scenarios;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::event_bus::EventBus;
pub use self::locks::JobLocks;
pub use self::orchestrator::{Orchestrator, SchedulerHandle};
pub use self::retry::RetryPolicy;
pub use self::scheduler::{Scheduler, SchedulerSettings, TickReport};
