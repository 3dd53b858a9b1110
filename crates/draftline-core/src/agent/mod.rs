//! Agent contract: one implementation per pipeline stage.

pub mod registry;

pub use registry::{AgentRegistry, RegistryError};

use async_trait::async_trait;

use crate::domain::{AgentOutcome, StageInput};

/// Executes one stage.
///
/// The input is owned; agents share no mutable state with the scheduler and
/// keep every side effect (model calls, web research, formatting) inside
/// `execute`. Failures come back as `AgentFailure` values, never as panics or
/// errors crossing this boundary. A panic is still caught by the scheduler and
/// treated as `Fatal`.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, input: StageInput) -> AgentOutcome;
}
