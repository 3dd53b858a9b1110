//! Stage tags: the closed set of pipeline node types.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Department reviewing the research output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Finance,
    Marketing,
    Legal,
    Ops,
    Hr,
}

impl Department {
    pub const ALL: [Department; 5] = [
        Department::Finance,
        Department::Marketing,
        Department::Legal,
        Department::Ops,
        Department::Hr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Department::Finance => "finance",
            Department::Marketing => "marketing",
            Department::Legal => "legal",
            Department::Ops => "ops",
            Department::Hr => "hr",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task-graph node type. Every stage is implemented by exactly one agent.
///
/// Ordering follows pipeline order, which `current_stage` reporting relies on.
/// Serialized as its display string (`"department_review:legal"`) so it can
/// key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageType {
    Research,
    CompetitiveIntel,
    DepartmentReview(Department),
    Strategy,
    Drafting,
    DataEnrichment,
    Formatting,
    QualityGate,
    Screening,
}

impl StageType {
    /// Content-producing stages: everything before the quality gate.
    pub fn is_content(self) -> bool {
        !matches!(self, StageType::QualityGate | StageType::Screening)
    }

    /// A skippable stage is marked `Skipped` instead of failing the job when
    /// it fails with invalid input or runs out of retries.
    pub fn is_skippable(self) -> bool {
        matches!(self, StageType::DataEnrichment | StageType::Formatting)
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageType::Research => f.write_str("research"),
            StageType::CompetitiveIntel => f.write_str("competitive_intel"),
            StageType::DepartmentReview(d) => write!(f, "department_review:{d}"),
            StageType::Strategy => f.write_str("strategy"),
            StageType::Drafting => f.write_str("drafting"),
            StageType::DataEnrichment => f.write_str("data_enrichment"),
            StageType::Formatting => f.write_str("formatting"),
            StageType::QualityGate => f.write_str("quality_gate"),
            StageType::Screening => f.write_str("screening"),
        }
    }
}

impl FromStr for Department {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Department::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown department: {s}"))
    }
}

impl FromStr for StageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(department) = s.strip_prefix("department_review:") {
            return department.parse().map(StageType::DepartmentReview);
        }
        match s {
            "research" => Ok(StageType::Research),
            "competitive_intel" => Ok(StageType::CompetitiveIntel),
            "strategy" => Ok(StageType::Strategy),
            "drafting" => Ok(StageType::Drafting),
            "data_enrichment" => Ok(StageType::DataEnrichment),
            "formatting" => Ok(StageType::Formatting),
            "quality_gate" => Ok(StageType::QualityGate),
            "screening" => Ok(StageType::Screening),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

impl Serialize for StageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::research(StageType::Research, true, false)]
    #[case::review(StageType::DepartmentReview(Department::Legal), true, false)]
    #[case::enrichment(StageType::DataEnrichment, true, true)]
    #[case::formatting(StageType::Formatting, true, true)]
    #[case::gate(StageType::QualityGate, false, false)]
    #[case::screening(StageType::Screening, false, false)]
    fn stage_classification(
        #[case] stage: StageType,
        #[case] content: bool,
        #[case] skippable: bool,
    ) {
        assert_eq!(stage.is_content(), content);
        assert_eq!(stage.is_skippable(), skippable);
    }

    #[test]
    fn display_includes_department() {
        let stage = StageType::DepartmentReview(Department::Hr);
        assert_eq!(stage.to_string(), "department_review:hr");
    }

    #[rstest]
    #[case::plain(StageType::CompetitiveIntel, "competitive_intel")]
    #[case::department(StageType::DepartmentReview(Department::Finance), "department_review:finance")]
    #[case::gate(StageType::QualityGate, "quality_gate")]
    fn stage_serializes_as_string(#[case] stage: StageType, #[case] expected: &str) {
        let v = serde_json::to_value(stage).unwrap();
        assert_eq!(v, serde_json::Value::String(expected.to_string()));
        let back: StageType = serde_json::from_value(v).unwrap();
        assert_eq!(back, stage);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!("department_review:it".parse::<StageType>().is_err());
        assert!("publishing".parse::<StageType>().is_err());
    }

    #[test]
    fn pipeline_order_is_total() {
        assert!(StageType::Research < StageType::DepartmentReview(Department::Finance));
        assert!(StageType::Drafting < StageType::QualityGate);
        assert!(StageType::QualityGate < StageType::Screening);
    }
}
