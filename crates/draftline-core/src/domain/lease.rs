//! Dispatch lease: short-lived ownership of a running task.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, WorkerId};

/// Held by exactly one worker while its task is Running.
///
/// Created on dispatch, released on completion or expiry. Leases live inside
/// the job record and are dropped when the job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub acquired_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl Lease {
    pub fn new(task_id: TaskId, worker_id: WorkerId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            task_id,
            worker_id,
            acquired_at: now,
            expiry: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn is_held_by(&self, worker_id: WorkerId) -> bool {
        self.worker_id == worker_id
    }
}
