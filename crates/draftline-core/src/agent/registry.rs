//! Stage -> agent registry.
//!
//! Built during initialization, read-only afterwards, so it needs no locks.

use std::collections::HashMap;
use std::sync::Arc;

use super::Agent;
use crate::domain::StageType;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("an agent for stage '{0}' is already registered")]
    AlreadyRegistered(StageType),
}

#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<StageType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        stage: StageType,
        agent: Arc<dyn Agent>,
    ) -> Result<(), RegistryError> {
        if self.agents.contains_key(&stage) {
            return Err(RegistryError::AlreadyRegistered(stage));
        }
        self.agents.insert(stage, agent);
        Ok(())
    }

    pub fn get(&self, stage: StageType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&stage).cloned()
    }

    pub fn registered_stages(&self) -> Vec<StageType> {
        let mut stages: Vec<StageType> = self.agents.keys().copied().collect();
        stages.sort();
        stages
    }

    /// Stages from `required` that have no agent.
    pub fn missing(&self, required: &[StageType]) -> Vec<StageType> {
        required
            .iter()
            .filter(|s| !self.agents.contains_key(s))
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("stages", &self.registered_stages())
            .finish()
    }
}
