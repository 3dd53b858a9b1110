//! draftline-core
//!
//! Job orchestration for multi-agent proposal generation.
//!
//! A submitted proposal request becomes a job: a dependency graph of stage
//! tasks (research, reviews, drafting, quality gate, screening) that a
//! scheduler dispatches to registered agents, with retries, lease recovery
//! and quality-driven revision rounds.
//!
//! # Modules
//! - **domain**: ids, stages, payloads, tasks, jobs, history, events, errors
//! - **graph**: dependency DAG, per-job task graph, pipeline construction
//! - **agent**: the `Agent` contract and the stage registry
//! - **ports**: `JobStore`, `Clock`, `IdGenerator`, `KnowledgeBase`
//! - **impls**: in-memory store and knowledge base
//! - **app**: builder, orchestrator, scheduler, lifecycle
//! - **config**: TOML + environment configuration

pub mod agent;
pub mod app;
pub mod config;
pub mod domain;
pub mod graph;
pub mod impls;
pub mod ports;

pub use app::{BuildError, Orchestrator, OrchestratorBuilder, SchedulerHandle, TickReport};
pub use config::OrchestratorConfig;
