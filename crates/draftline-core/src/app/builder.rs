//! OrchestratorBuilder: wiring and start-up validation.
//!
//! `build()` fails fast when the configuration is invalid or a stage of the
//! configured pipeline has no agent, so a misconfigured deployment never
//! accepts a job it cannot finish.

use std::sync::Arc;

use super::event_bus::EventBus;
use super::orchestrator::Orchestrator;
use super::retry::RetryPolicy;
use super::scheduler::{Scheduler, SchedulerSettings};
use crate::agent::{Agent, AgentRegistry, RegistryError};
use crate::config::{ConfigError, OrchestratorConfig};
use crate::domain::{Decider, DefaultDecider, StageType};
use crate::graph::PipelineShape;
use crate::impls::InMemoryJobStore;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// Builds an `Orchestrator`.
///
/// # Example
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(config)
///     .register(StageType::Research, ResearchAgent::new(kb))?
///     // ... one agent per stage of the pipeline
///     .with_store(store)
///     .build()?;
/// ```
///
/// Unset ports fall back to an in-memory store, the system clock, ULID ids
/// and the default retry decider.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: AgentRegistry,
    store: Option<Arc<dyn JobStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no agent registered for stages: {}", stage_list(.0))]
    MissingAgents(Vec<StageType>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn stage_list(stages: &[StageType]) -> String {
    stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: AgentRegistry::new(),
            store: None,
            clock: None,
            ids: None,
            decider: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn register(
        self,
        stage: StageType,
        agent: impl Agent + 'static,
    ) -> Result<Self, RegistryError> {
        self.register_shared(stage, Arc::new(agent))
    }

    /// Registers an agent that is also used elsewhere (or for several stages).
    pub fn register_shared(
        mut self,
        stage: StageType,
        agent: Arc<dyn Agent>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(stage, agent)?;
        Ok(self)
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Validates the configuration and agent coverage, then wires the
    /// scheduler.
    ///
    /// # Errors
    /// - `BuildError::Config` when the configuration does not validate
    /// - `BuildError::MissingAgents` when a pipeline stage has no agent
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;

        let shape = PipelineShape::from(&self.config.pipeline);
        let missing = self.registry.missing(&shape.stages());
        if !missing.is_empty() {
            return Err(BuildError::MissingAgents(missing));
        }

        let lease_ttl = chrono::Duration::from_std(self.config.scheduler.lease_ttl())
            .map_err(|e| ConfigError::Invalid(format!("lease_ttl_secs: {e}")))?;
        let settings = SchedulerSettings {
            quality_threshold: self.config.quality.threshold,
            agent_timeout: self.config.scheduler.agent_timeout(),
            lease_ttl,
            max_concurrency: self.config.scheduler.max_concurrency,
        };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        };
        let store: Arc<dyn JobStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryJobStore::new()),
        };
        let retry = &self.config.retry;
        let decider: Arc<dyn Decider> = match self.decider {
            Some(decider) => decider,
            None => Arc::new(DefaultDecider::new(
                RetryPolicy::from(retry),
                retry.max_retries,
            )),
        };
        let events = Arc::new(EventBus::new(self.config.events.channel_capacity));

        let scheduler = Scheduler::new(
            store,
            Arc::new(self.registry),
            clock,
            ids,
            decider,
            events,
            settings,
        );
        Ok(Orchestrator::new(
            Arc::new(scheduler),
            shape,
            self.config.quality.max_revisions,
            self.config.scheduler.tick_interval(),
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}
