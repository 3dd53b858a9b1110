//! The structured request a job is created from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A proposal request as submitted by the front-end.
///
/// `reference` points back at the owning request in document storage; the
/// orchestrator never interprets the remaining fields, it only hands them to
/// agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub reference: String,
    pub organization: String,
    pub funder: String,
    pub title: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub focus_areas: Vec<String>,

    /// Free-form extras (funder form answers, uploaded document refs, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ProposalRequest {
    pub fn new(
        reference: impl Into<String>,
        organization: impl Into<String>,
        funder: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            organization: organization.into(),
            funder: funder.into(),
            title: title.into(),
            summary: String::new(),
            requested_amount: None,
            deadline: None,
            focus_areas: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_focus_area(mut self, area: impl Into<String>) -> Self {
        self.focus_areas.push(area.into());
        self
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required = [
            ("reference", &self.reference),
            ("organization", &self.organization),
            ("funder", &self.funder),
            ("title", &self.title),
        ];
        required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }
}
