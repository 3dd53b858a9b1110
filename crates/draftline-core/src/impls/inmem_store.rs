//! InMemoryJobStore: development / test store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord, StoreError};
use crate::ports::JobStore;

/// Keeps clones of job records behind one async mutex.
///
/// Share it between orchestrators with `Arc` to simulate several scheduler
/// instances (or a restart) over one persistence layer.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, job: &mut JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let found = jobs.get(&job.id).map(|stored| stored.version).unwrap_or(0);
        if found != job.version {
            return Err(StoreError::Conflict {
                job_id: job.id,
                expected: job.version,
                found,
            });
        }
        job.version += 1;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, job_id: JobId) -> Result<JobRecord, StoreError> {
        self.jobs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::NotFound(job_id))
    }

    async fn list_active(&self) -> Result<Vec<JobId>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut active: Vec<(chrono::DateTime<chrono::Utc>, JobId)> = jobs
            .values()
            .filter(|job| !job.is_terminal())
            .map(|job| (job.created_at, job.id))
            .collect();
        active.sort();
        Ok(active.into_iter().map(|(_, id)| id).collect())
    }
}
