//! Per-job async locks.
//!
//! Serializes read-modify-write cycles on one job inside this process.
//! Contention is scoped to a single job; different jobs never wait on each
//! other. Across processes the store's version check takes over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::domain::JobId;

#[derive(Default)]
pub struct JobLocks {
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, job_id: JobId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(job_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry of a finished job. Holders keep their guard.
    pub fn forget(&self, job_id: JobId) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
