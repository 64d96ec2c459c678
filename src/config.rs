//! Gate configuration
//!
//! Gates are declared in a task specification's `quality_gates` section
//! (JSON) or in a standalone TOML file, or synthesized by auto-detection.

use crate::project::ProjectType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default per-gate timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Kind of verification a gate performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateType {
    Typecheck,
    Test,
    Lint,
    Custom,
}

impl GateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateType::Typecheck => "typecheck",
            GateType::Test => "test",
            GateType::Lint => "lint",
            GateType::Custom => "custom",
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Declarative description of one verification step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Unique within one orchestrator
    pub name: String,
    #[serde(rename = "type")]
    pub gate_type: GateType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Required gates block progression and arm fail-fast when they fail
    #[serde(default = "default_true")]
    pub required: bool,
    /// Replaces the built-in command (and its fallbacks) when set
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    /// Relative paths resolve against the project root
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Overrides the detected project type for this gate
    #[serde(default)]
    pub project_type: Option<ProjectType>,
    /// Restrict the gate to files changed since the baseline
    #[serde(default)]
    pub incremental: bool,
}

impl GateConfig {
    pub fn new(name: impl Into<String>, gate_type: GateType) -> Self {
        Self {
            name: name.into(),
            gate_type,
            enabled: true,
            required: true,
            command: None,
            args: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            working_dir: None,
            env: BTreeMap::new(),
            project_type: None,
            incremental: false,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>, args: &[&str]) -> Self {
        self.command = Some(command.into());
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn for_project(mut self, project_type: ProjectType) -> Self {
        self.project_type = Some(project_type);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate gate name '{0}'")]
    DuplicateGateName(String),
    #[error("gate name must not be empty")]
    EmptyGateName,
}

/// Reject configurations the orchestrator cannot key results on.
pub fn validate_gates(gates: &[GateConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for gate in gates {
        if gate.name.trim().is_empty() {
            return Err(ConfigError::EmptyGateName);
        }
        if !seen.insert(gate.name.as_str()) {
            return Err(ConfigError::DuplicateGateName(gate.name.clone()));
        }
    }
    Ok(())
}

/// The `quality_gates` section of a task specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGatesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Seconds before a cached result expires; no expiry when absent
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    /// Run gates concurrently
    #[serde(default)]
    pub parallel: bool,
    /// `None` means "synthesize from project detection"
    #[serde(default)]
    pub gates: Option<Vec<GateConfig>>,
}

impl Default for QualityGatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_fast: true,
            use_cache: true,
            cache_ttl: None,
            parallel: false,
            gates: None,
        }
    }
}

impl QualityGatesConfig {
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl.map(Duration::from_secs)
    }

    /// Read a JSON task specification and extract its `quality_gates` section.
    ///
    /// A document that is itself the section is accepted too. A document
    /// with neither yields the defaults.
    pub fn from_task_spec(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read task spec {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid quality_gates in {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let doc: serde_json::Value = serde_json::from_str(content)?;
        let section = match doc.get("quality_gates") {
            Some(section) => section.clone(),
            None if doc.get("gates").is_some() || doc.get("fail_fast").is_some() => doc,
            None => return Ok(Self::default()),
        };
        let config: Self = serde_json::from_value(section)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a standalone TOML file (`[[gates]]` tables at the top level).
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid gate config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Dispatch on the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            _ => Self::from_task_spec(path),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.gates {
            Some(gates) => validate_gates(gates),
            None => Ok(()),
        }
    }
}
