//! Outcome model: what an agent hands back from `execute()`.
//!
//! Agents never raise errors across the agent/orchestrator boundary. Every
//! failure is a value with a kind the scheduler knows how to act on.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::payload::StagePayload;

/// Failure taxonomy of an agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Network, timeout or rate-limit trouble. Eligible for backoff retry.
    Transient,

    /// Malformed input. Fails the task permanently, never retried.
    Invalid,

    /// Unexpected internal error. Fails the job.
    Fatal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::Invalid => "invalid",
            FailureKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// A typed failure returned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub kind: FailureKind,
    pub detail: String,

    /// Only meaningful for `Transient`: `false` means "do not bother retrying".
    pub retryable: bool,
}

impl AgentFailure {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
            retryable: true,
        }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Invalid,
            detail: detail.into(),
            retryable: false,
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            detail: detail.into(),
            retryable: false,
        }
    }

    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Whether the retry policy may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient && self.retryable
    }
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Result of one agent execution.
pub type AgentOutcome = Result<StagePayload, AgentFailure>;

/// Coarse classification used in attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Transient,
    Invalid,
    Fatal,
    /// The lease expired before a result was recorded.
    Abandoned,
}

impl From<FailureKind> for OutcomeKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Transient => OutcomeKind::Transient,
            FailureKind::Invalid => OutcomeKind::Invalid,
            FailureKind::Fatal => OutcomeKind::Fatal,
        }
    }
}
