//! The proposal pipeline: which stages a job runs and how they depend on
//! each other.
//!
//! ```text
//! Research ----+--> DepartmentReview(*) --+
//!              |                          |
//!              +--> Strategy -------------+--> Drafting --> DataEnrichment
//!              |                          |                      |
//! CompetitiveIntel ---------+-------------+                      v
//!                                   Screening <-- QualityGate <-- Formatting
//! ```

use serde::{Deserialize, Serialize};

use super::task_graph::TaskGraph;
use crate::config::PipelineConfig;
use crate::domain::{Department, GraphError, JobId, StageType, Task, TaskId};
use crate::ports::IdGenerator;

/// Which optional stages a job's graph contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineShape {
    pub departments: Vec<Department>,
    pub strategy: bool,
    pub data_enrichment: bool,
    pub formatting: bool,
}

impl Default for PipelineShape {
    fn default() -> Self {
        Self {
            departments: Department::ALL.to_vec(),
            strategy: true,
            data_enrichment: true,
            formatting: true,
        }
    }
}

impl PipelineShape {
    /// Research, CompetitiveIntel, department reviews, Drafting, QualityGate,
    /// Screening. No strategy or post-processing stages.
    pub fn core() -> Self {
        Self {
            departments: Department::ALL.to_vec(),
            strategy: false,
            data_enrichment: false,
            formatting: false,
        }
    }

    /// Every stage this shape needs an agent for, in pipeline order.
    pub fn stages(&self) -> Vec<StageType> {
        let mut stages = vec![StageType::Research, StageType::CompetitiveIntel];
        stages.extend(self.departments.iter().map(|&d| StageType::DepartmentReview(d)));
        if self.strategy {
            stages.push(StageType::Strategy);
        }
        stages.push(StageType::Drafting);
        if self.data_enrichment {
            stages.push(StageType::DataEnrichment);
        }
        if self.formatting {
            stages.push(StageType::Formatting);
        }
        stages.push(StageType::QualityGate);
        stages.push(StageType::Screening);
        stages
    }
}

impl From<&PipelineConfig> for PipelineShape {
    fn from(config: &PipelineConfig) -> Self {
        let mut departments = config.departments.clone();
        departments.sort();
        departments.dedup();
        Self {
            departments,
            strategy: config.strategy,
            data_enrichment: config.data_enrichment,
            formatting: config.formatting,
        }
    }
}

/// Builds a fresh graph for `job_id`.
pub fn build_pipeline(
    job_id: JobId,
    shape: &PipelineShape,
    ids: &dyn IdGenerator,
) -> Result<TaskGraph, GraphError> {
    let mut graph = TaskGraph::new();
    let add = |graph: &mut TaskGraph, stage: StageType, deps: &[TaskId]| {
        let id = ids.generate_task_id();
        graph.add_task(Task::new(id, job_id, stage))?;
        for &dep in deps {
            graph.add_dependency(id, dep)?;
        }
        Ok::<_, GraphError>(id)
    };

    let research = add(&mut graph, StageType::Research, &[])?;
    let intel = add(&mut graph, StageType::CompetitiveIntel, &[])?;

    let mut drafting_deps = Vec::new();
    for &department in &shape.departments {
        drafting_deps.push(add(
            &mut graph,
            StageType::DepartmentReview(department),
            &[research],
        )?);
    }
    drafting_deps.push(intel);
    if shape.strategy {
        drafting_deps.push(add(&mut graph, StageType::Strategy, &[research, intel])?);
    }
    let mut last = add(&mut graph, StageType::Drafting, &drafting_deps)?;

    if shape.data_enrichment {
        last = add(&mut graph, StageType::DataEnrichment, &[last])?;
    }
    if shape.formatting {
        last = add(&mut graph, StageType::Formatting, &[last])?;
    }
    let gate = add(&mut graph, StageType::QualityGate, &[last])?;
    add(&mut graph, StageType::Screening, &[gate])?;

    Ok(graph)
}
