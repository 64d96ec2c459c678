//! Result of one gate execution

use crate::config::{GateConfig, GateType};
use crate::diagnostics::ErrorInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit code recorded for process-level failures (not found, timeout, launch error)
pub const PROCESS_FAILURE_EXIT_CODE: i32 = -1;

/// Why a gate was not executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// An earlier required gate failed in this run
    FailFast { failed_gate: String },
    /// In-flight execution was abandoned after a required gate failed
    Cancelled { failed_gate: String },
    /// Incremental gate with nothing to check
    NoChangedFiles,
}

impl SkipReason {
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            SkipReason::FailFast { .. } | SkipReason::Cancelled { .. }
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FailFast { failed_gate } => {
                write!(f, "skipped (fail-fast: required gate '{}' failed)", failed_gate)
            }
            SkipReason::Cancelled { failed_gate } => write!(
                f,
                "cancelled (fail-fast: required gate '{}' failed)",
                failed_gate
            ),
            SkipReason::NoChangedFiles => f.write_str("skipped (no changed files to check)"),
        }
    }
}

/// Outcome of a gate. Built once and never mutated afterwards; a cache
/// read hands back a copy with `from_cache` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutput {
    pub gate_name: String,
    pub gate_type: GateType,
    pub passed: bool,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub duration_ms: u64,
    /// Program and arguments actually run, empty when nothing ran
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub error_summary: Option<String>,
    #[serde(default)]
    pub structured_errors: Vec<ErrorInfo>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    /// Files handed to the tool in incremental mode, `None` for full scope
    #[serde(default)]
    pub checked_files: Option<Vec<String>>,
    #[serde(default)]
    pub from_cache: bool,
}

impl GateOutput {
    /// Output for a gate that did not run.
    ///
    /// An empty incremental scope counts as a pass; any fail-fast skip
    /// counts as not passed.
    pub fn skipped(gate: &GateConfig, reason: SkipReason) -> Self {
        let passed = !reason.is_fail_fast();
        let checked_files = match reason {
            SkipReason::NoChangedFiles => Some(Vec::new()),
            _ => None,
        };
        Self {
            gate_name: gate.name.clone(),
            gate_type: gate.gate_type,
            passed,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            command: Vec::new(),
            error_summary: Some(reason.to_string()),
            structured_errors: Vec::new(),
            skipped: true,
            skip_reason: Some(reason),
            checked_files,
            from_cache: false,
        }
    }

    /// Process-level failure with `message` as the summary.
    pub fn failure(gate: &GateConfig, command: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            gate_name: gate.name.clone(),
            gate_type: gate.gate_type,
            passed: false,
            exit_code: PROCESS_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            command,
            error_summary: Some(message.into()),
            structured_errors: Vec::new(),
            skipped: false,
            skip_reason: None,
            checked_files: None,
            from_cache: false,
        }
    }

    /// Copy marked as served from the cache.
    pub fn as_cached(&self) -> Self {
        Self {
            from_cache: true,
            ..self.clone()
        }
    }

    pub fn is_fail_fast_skip(&self) -> bool {
        self.skipped
            && self
                .skip_reason
                .as_ref()
                .map(SkipReason::is_fail_fast)
                .unwrap_or(false)
    }

    /// Whether this output should be persisted.
    ///
    /// Skips describe the run, not the repository state, so they are
    /// never cached.
    pub fn is_cacheable(&self) -> bool {
        !self.skipped && !self.from_cache
    }

    pub fn status_label(&self) -> &'static str {
        match (self.skipped, self.passed) {
            (true, _) => "SKIP",
            (false, true) => "PASS",
            (false, false) => "FAIL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_skip_passes() {
        let gate = GateConfig::new("lint", GateType::Lint);
        let out = GateOutput::skipped(&gate, SkipReason::NoChangedFiles);
        assert!(out.skipped);
        assert!(out.passed);
        assert_eq!(out.checked_files, Some(Vec::new()));
        assert!(!out.is_fail_fast_skip());
        assert!(!out.is_cacheable());
    }

    #[test]
    fn fail_fast_skip_does_not_pass() {
        let gate = GateConfig::new("test", GateType::Test);
        let out = GateOutput::skipped(
            &gate,
            SkipReason::FailFast {
                failed_gate: "typecheck".into(),
            },
        );
        assert!(out.skipped);
        assert!(!out.passed);
        assert!(out.is_fail_fast_skip());
        assert!(out.error_summary.unwrap().contains("'typecheck'"));
    }

    #[test]
    fn cached_copy_differs_only_in_flag() {
        let gate = GateConfig::new("custom", GateType::Custom);
        let out = GateOutput::failure(&gate, vec!["x".into()], "boom");
        let cached = out.as_cached();
        assert!(cached.from_cache);
        assert_eq!(GateOutput { from_cache: false, ..cached }, out);
    }

    #[test]
    fn serializes_skip_reason_tagged() {
        let gate = GateConfig::new("t", GateType::Test);
        let out = GateOutput::skipped(
            &gate,
            SkipReason::Cancelled {
                failed_gate: "a".into(),
            },
        );
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["skip_reason"]["kind"], "cancelled");
        assert_eq!(json["gate_type"], "test");
    }
}
