//! Domain model (ids, stages, payloads, tasks, jobs, history, events).

pub mod decision;
pub mod errors;
pub mod events;
pub mod history;
pub mod ids;
pub mod job;
pub mod lease;
pub mod outcome;
pub mod payload;
pub mod request;
pub mod stage;
pub mod task;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{GraphError, OrchestratorError, StoreError};
pub use events::{JobEvent, JobEventKind};
pub use history::{AttemptRecord, DecisionRecord};
pub use ids::{JobId, TaskId, WorkerId};
pub use job::{
    FailureReason, JobFailure, JobRecord, JobStatus, JobStatusView, RevisionRecord,
    RevisionTrigger,
};
pub use lease::Lease;
pub use outcome::{AgentFailure, AgentOutcome, FailureKind, OutcomeKind};
pub use payload::{DataPoint, DraftSection, Finding, RevisionContext, StageInput, StagePayload};
pub use request::ProposalRequest;
pub use stage::{Department, StageType};
pub use task::{Task, TaskError, TaskStatus};
