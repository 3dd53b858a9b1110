//! Orchestrator configuration.
//!
//! Loaded from TOML with `${ENV_VAR}` expansion, then overridden by the
//! `DRAFTLINE_*` environment variables, then validated. Every field has a
//! default, so an empty file (or no file) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Department;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Size of the agent worker pool.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Must exceed `agent_timeout_secs`, otherwise a slow but healthy agent
    /// would lose its lease.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrency: default_max_concurrency(),
            agent_timeout_secs: default_agent_timeout_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum gate score in `[0, 1]` to proceed to screening.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_revisions: default_max_revisions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_departments")]
    pub departments: Vec<Department>,

    #[serde(default = "default_true")]
    pub strategy: bool,

    #[serde(default = "default_true")]
    pub data_enrichment: bool,

    #[serde(default = "default_true")]
    pub formatting: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            departments: default_departments(),
            strategy: true,
            data_enrichment: true,
            formatting: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_tick_interval_ms() -> u64 { 1000 }
fn default_max_concurrency() -> usize { 5 }
fn default_agent_timeout_secs() -> u64 { 3600 }
fn default_lease_ttl_secs() -> u64 { 3700 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 5000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_delay_ms() -> u64 { 300_000 }
fn default_threshold() -> f64 { 0.95 }
fn default_max_revisions() -> u32 { 3 }
fn default_departments() -> Vec<Department> { Department::ALL.to_vec() }
fn default_true() -> bool { true }
fn default_channel_capacity() -> usize { 256 }

/// Seconds a lease outlives the agent timeout when the timeout is raised
/// from the environment.
const LEASE_MARGIN_SECS: u64 = 100;

pub const ENV_MIN_QUALITY_SCORE: &str = "DRAFTLINE_MIN_QUALITY_SCORE";
pub const ENV_MAX_REVISIONS: &str = "DRAFTLINE_MAX_REVISIONS";
pub const ENV_MAX_CONCURRENCY: &str = "DRAFTLINE_MAX_CONCURRENCY";
pub const ENV_TASK_TIMEOUT: &str = "DRAFTLINE_TASK_TIMEOUT";
pub const ENV_MAX_RETRIES: &str = "DRAFTLINE_MAX_RETRIES";

impl OrchestratorConfig {
    /// Load from a TOML file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                }
            }
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated. Used when no file is
    /// given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML after expanding `${ENV_VAR}` references. No overrides, no
    /// validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `DRAFTLINE_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(ENV_MIN_QUALITY_SCORE) {
            let mut score: f64 = parse_override(ENV_MIN_QUALITY_SCORE, &raw)?;
            // Ten-point scores ("9.5") are accepted as well.
            if score > 1.0 && score <= 10.0 {
                score /= 10.0;
            }
            self.quality.threshold = score;
        }
        if let Some(raw) = lookup(ENV_MAX_REVISIONS) {
            self.quality.max_revisions = parse_override(ENV_MAX_REVISIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            self.scheduler.max_concurrency = parse_override(ENV_MAX_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TASK_TIMEOUT) {
            let secs: u64 = parse_override(ENV_TASK_TIMEOUT, &raw)?;
            self.scheduler.agent_timeout_secs = secs;
            if self.scheduler.lease_ttl_secs <= secs {
                self.scheduler.lease_ttl_secs = secs + LEASE_MARGIN_SECS;
            }
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_retries = parse_override(ENV_MAX_RETRIES, &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if !q.threshold.is_finite() || !(0.0..=1.0).contains(&q.threshold) {
            return Err(ConfigError::Invalid(format!(
                "quality.threshold must be within [0, 1], got {}",
                q.threshold
            )));
        }

        let s = &self.scheduler;
        if s.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_interval_ms must be > 0".into()));
        }
        if s.max_concurrency == 0 {
            return Err(ConfigError::Invalid("scheduler.max_concurrency must be > 0".into()));
        }
        if s.agent_timeout_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.agent_timeout_secs must be > 0".into()));
        }
        if s.lease_ttl_secs <= s.agent_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "scheduler.lease_ttl_secs ({}) must exceed agent_timeout_secs ({})",
                s.lease_ttl_secs, s.agent_timeout_secs
            )));
        }

        let r = &self.retry;
        if !r.multiplier.is_finite() || r.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                r.multiplier
            )));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) must be >= base_delay_ms ({})",
                r.max_delay_ms, r.base_delay_ms
            )));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigError::Invalid("events.channel_capacity must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{key}={raw:?}: {e}")))
}

/// Expand `${ENV_VAR}` patterns in a string. Unset variables are kept as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => result.push_str(&format!("${{{var_name}}}")),
            }
        } else {
            result.push(c);
        }
    }
    result
}
