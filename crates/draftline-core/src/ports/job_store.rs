//! JobStore port: the source of truth for job records.
//!
//! The set of active jobs lives behind this interface rather than in process
//! memory, so several scheduler instances can share one store and coordinate
//! through `save`'s version check.

use async_trait::async_trait;

use crate::domain::{JobId, JobRecord, StoreError};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically persists the whole record (status, graph, leases, history).
    ///
    /// Succeeds only if the stored version equals `job.version` (0 for a new
    /// job), then bumps `job.version`. Otherwise returns
    /// `StoreError::Conflict` and leaves both sides untouched.
    async fn save(&self, job: &mut JobRecord) -> Result<(), StoreError>;

    async fn load(&self, job_id: JobId) -> Result<JobRecord, StoreError>;

    /// Ids of non-terminal jobs, oldest first.
    async fn list_active(&self) -> Result<Vec<JobId>, StoreError>;
}
