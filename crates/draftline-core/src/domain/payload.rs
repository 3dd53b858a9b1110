//! Stage inputs and stage-specific result payloads.
//!
//! `StagePayload` is a closed enumeration: the gate and screening logic only
//! ever look at their own variants, so those decisions do not depend on what
//! an agent chose to put in a free-form blob.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::{JobId, TaskId};
use super::request::ProposalRequest;
use super::stage::{Department, StageType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub title: String,
    pub body: String,
}

impl DraftSection {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// One itemized quality-gate finding. Opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub label: String,
    pub value: String,
}

/// Stage-specific result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    Research {
        summary: String,
        #[serde(default)]
        sources: Vec<String>,
    },
    CompetitiveIntel {
        #[serde(default)]
        competitors: Vec<String>,
        #[serde(default)]
        differentiators: Vec<String>,
    },
    DepartmentReview {
        department: Department,
        #[serde(default)]
        recommendations: Vec<String>,
        #[serde(default)]
        risks: Vec<String>,
    },
    Strategy {
        positioning: String,
        #[serde(default)]
        objectives: Vec<String>,
    },
    Drafting {
        sections: Vec<DraftSection>,
    },
    DataEnrichment {
        #[serde(default)]
        data_points: Vec<DataPoint>,
    },
    Formatting {
        sections: Vec<DraftSection>,
    },
    QualityGate {
        /// Aggregate score in `[0, 1]`.
        score: f64,
        #[serde(default)]
        findings: Vec<Finding>,
        #[serde(default)]
        sections_to_revise: Vec<String>,
    },
    Screening {
        passed: bool,
        #[serde(default)]
        fixable: bool,
        /// Stages whose output caused the rejection; re-queued on a fixable failure.
        #[serde(default)]
        failing_aspects: Vec<StageType>,
        #[serde(default)]
        issues: Vec<String>,
    },
}

impl StagePayload {
    /// Whether this payload is the right shape for a task of `stage`.
    pub fn matches(&self, stage: StageType) -> bool {
        match (self, stage) {
            (StagePayload::Research { .. }, StageType::Research) => true,
            (StagePayload::CompetitiveIntel { .. }, StageType::CompetitiveIntel) => true,
            (
                StagePayload::DepartmentReview { department, .. },
                StageType::DepartmentReview(expected),
            ) => *department == expected,
            (StagePayload::Strategy { .. }, StageType::Strategy) => true,
            (StagePayload::Drafting { .. }, StageType::Drafting) => true,
            (StagePayload::DataEnrichment { .. }, StageType::DataEnrichment) => true,
            (StagePayload::Formatting { .. }, StageType::Formatting) => true,
            (StagePayload::QualityGate { .. }, StageType::QualityGate) => true,
            (StagePayload::Screening { .. }, StageType::Screening) => true,
            _ => false,
        }
    }

    /// Checks a success payload before it is recorded. `Err` carries the
    /// reason the payload is rejected as invalid.
    pub fn validate_for(&self, stage: StageType) -> Result<(), String> {
        if !self.matches(stage) {
            return Err(format!("payload shape does not match stage {stage}"));
        }
        if let StagePayload::QualityGate { score, .. } = self
            && !(0.0..=1.0).contains(score)
        {
            return Err(format!("quality score {score} outside [0, 1]"));
        }
        Ok(())
    }
}

/// Context handed to a re-queued stage during a revision round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionContext {
    /// 1-based revision number.
    pub attempt: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(default)]
    pub sections_to_revise: Vec<String>,

    #[serde(default)]
    pub findings: Vec<Finding>,

    #[serde(default)]
    pub issues: Vec<String>,

    /// Draft produced before the rejection, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_draft: Vec<DraftSection>,
}

/// Everything an agent receives. Owned and serializable: agents share no
/// mutable state with the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub stage: StageType,

    /// 1-based attempt number of this dispatch.
    pub attempt: u32,

    pub request: ProposalRequest,

    /// Results of every succeeded upstream stage.
    #[serde(default)]
    pub upstream: BTreeMap<StageType, StagePayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionContext>,
}

impl StageInput {
    pub fn upstream(&self, stage: StageType) -> Option<&StagePayload> {
        self.upstream.get(&stage)
    }

    /// The most recent draft visible to this stage (formatted wins over raw).
    pub fn latest_draft(&self) -> Option<&[DraftSection]> {
        if let Some(StagePayload::Formatting { sections }) = self.upstream(StageType::Formatting) {
            return Some(sections);
        }
        match self.upstream(StageType::Drafting) {
            Some(StagePayload::Drafting { sections }) => Some(sections),
            _ => None,
        }
    }
}
