//! Gates: one unit of verification each
//!
//! A [`Gate`] is resolved once from its [`GateConfig`] and executed with a
//! story id and an [`ExecutionContext`]. Execution never fails outright:
//! launch errors, timeouts and tool failures all fold into the returned
//! [`GateOutput`].

pub mod commands;
mod custom;
mod lint;
pub mod process;
mod test;
mod typecheck;

pub use custom::CustomGate;
pub use lint::LintGate;
pub use test::TestGate;
pub use typecheck::TypecheckGate;

use crate::changed_files::{ChangeSources, ChangedFilesDetector, DEFAULT_BASELINE};
use crate::config::{GateConfig, GateType};
use crate::diagnostics::{summarize_errors, ErrorInfo};
use crate::output::{GateOutput, SkipReason};
use crate::parsers::{parse_output, Tool};
use crate::project::ProjectType;
use crate::util::{relative_to, tail_chars};
use commands::CommandTemplate;
use process::{run_process, LaunchFailure, ProcessOutcome, ProcessSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::Instrument;

/// Diagnostics listed individually in a failure summary
const SUMMARY_MAX_ITEMS: usize = 10;

/// Raw output kept as a summary when no diagnostics were recognized
const RAW_SUMMARY_CHARS: usize = 2_000;

/// What a gate runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub project_root: PathBuf,
    /// Detected (or caller-overridden) project type
    pub project_type: ProjectType,
    /// Reference incremental gates diff against
    pub baseline: String,
    /// Caller-supplied values, available to custom commands as `{key}`
    pub options: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new(project_root: impl Into<PathBuf>, project_type: ProjectType) -> Self {
        Self {
            project_root: project_root.into(),
            project_type,
            baseline: DEFAULT_BASELINE.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A configured gate, dispatched on its type
#[derive(Debug, Clone)]
pub enum Gate {
    Typecheck(TypecheckGate),
    Test(TestGate),
    Lint(LintGate),
    Custom(CustomGate),
}

impl Gate {
    pub fn from_config(config: GateConfig) -> Self {
        match config.gate_type {
            GateType::Typecheck => Gate::Typecheck(TypecheckGate::new(config)),
            GateType::Test => Gate::Test(TestGate::new(config)),
            GateType::Lint => Gate::Lint(LintGate::new(config)),
            GateType::Custom => Gate::Custom(CustomGate::new(config)),
        }
    }

    pub fn config(&self) -> &GateConfig {
        match self {
            Gate::Typecheck(gate) => &gate.config,
            Gate::Test(gate) => &gate.config,
            Gate::Lint(gate) => &gate.config,
            Gate::Custom(gate) => &gate.config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config().name
    }

    pub async fn execute(&self, story_id: &str, ctx: &ExecutionContext) -> GateOutput {
        let span = tracing::debug_span!("gate", gate = %self.name(), story_id);
        async {
            match self {
                Gate::Typecheck(gate) => gate.execute(ctx).await,
                Gate::Test(gate) => gate.execute(ctx).await,
                Gate::Lint(gate) => gate.execute(ctx).await,
                Gate::Custom(gate) => gate.execute(story_id, ctx).await,
            }
        }
        .instrument(span)
        .await
    }
}

/// Changed-file restriction for an incremental gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Run against the whole project
    Full,
    /// Run against these files (relative to the working directory)
    Files(Vec<String>),
    /// Nothing relevant changed; do not run
    Skip,
}

pub(crate) fn project_type_for(config: &GateConfig, ctx: &ExecutionContext) -> ProjectType {
    config.project_type.unwrap_or(ctx.project_type)
}

pub(crate) fn working_dir(config: &GateConfig, ctx: &ExecutionContext) -> PathBuf {
    match &config.working_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => ctx.project_root.join(dir),
        None => ctx.project_root.clone(),
    }
}

pub(crate) fn detector_for(config: &GateConfig, ctx: &ExecutionContext) -> ChangedFilesDetector {
    ChangedFilesDetector::new(working_dir(config, ctx)).with_baseline(ctx.baseline.clone())
}

/// Decide what an incremental gate should look at.
///
/// Outside a repository the gate runs in full: incremental mode only
/// saves time, it never decides correctness.
pub(crate) async fn changed_files_for_gate(
    config: &GateConfig,
    ctx: &ExecutionContext,
    project_type: ProjectType,
) -> Scope {
    if !config.incremental {
        return Scope::Full;
    }
    let detector = detector_for(config, ctx);
    let extensions = project_type.extensions();
    let lookup = tokio::task::spawn_blocking(move || {
        if extensions.is_empty() {
            detector.changed_files(ChangeSources::default())
        } else {
            detector.changed_files_by_extension(extensions)
        }
    })
    .await;

    match lookup {
        Ok(Ok(files)) if files.is_empty() => {
            tracing::info!(gate = %config.name, "no relevant changes, skipping");
            Scope::Skip
        }
        Ok(Ok(files)) => {
            tracing::debug!(gate = %config.name, files = files.len(), "incremental scope");
            Scope::Files(files)
        }
        Ok(Err(err)) => {
            tracing::debug!(gate = %config.name, error = %err, "incremental unavailable, running full scope");
            Scope::Full
        }
        Err(err) => {
            tracing::warn!(gate = %config.name, error = %err, "change detection task failed");
            Scope::Full
        }
    }
}

/// Built-in candidates, or the single override when `command` is set.
pub(crate) fn command_templates(config: &GateConfig, project_type: ProjectType) -> Vec<CommandTemplate> {
    match &config.command {
        Some(command) => vec![CommandTemplate::from_override(command, &config.args)],
        None => commands::candidates(config.gate_type, project_type),
    }
}

/// Outcome of evaluating a candidate list
pub(crate) struct CandidateRun {
    pub command: Vec<String>,
    pub result: Result<ProcessOutcome, LaunchFailure>,
}

/// Run each argv in order until one is found.
///
/// Only a not-found launch failure moves on to the next candidate; any
/// exit status, timeout or other launch error is final. Exit status 127
/// counts as not found for built-in candidates, never for a configured
/// `command`.
pub(crate) async fn run_candidates(
    config: &GateConfig,
    ctx: &ExecutionContext,
    candidates: Vec<Vec<String>>,
) -> CandidateRun {
    let cwd = working_dir(config, ctx);
    let mut tried: Vec<String> = Vec::new();
    let mut last = CandidateRun {
        command: Vec::new(),
        result: Err(LaunchFailure::NotFound {
            program: String::from("<none>"),
        }),
    };

    for argv in candidates {
        let Some(spec) = ProcessSpec::from_argv(&argv, &cwd) else {
            continue;
        };
        let spec = spec
            .with_env(&config.env)
            .with_timeout(config.timeout())
            .status_127_not_found(config.command.is_none());
        tracing::debug!(gate = %config.name, command = %spec.label(), "launching");
        let result = run_process(&spec).await;
        match result {
            Err(err) if err.is_not_found() => {
                tracing::debug!(gate = %config.name, program = %spec.program, "not found, trying next candidate");
                tried.push(spec.program.clone());
                last = CandidateRun {
                    command: argv,
                    result: Err(err),
                };
            }
            result => {
                return CandidateRun {
                    command: argv,
                    result,
                }
            }
        }
    }

    if tried.len() > 1 {
        last.result = Err(LaunchFailure::NotFound {
            program: tried.join(", "),
        });
    }
    last
}

/// Shared flow for gates that narrow a tool to changed files.
///
/// Narrowing only applies when every candidate supports it; otherwise an
/// incremental gate with relevant changes runs in full.
pub(crate) async fn execute_scoped(config: &GateConfig, ctx: &ExecutionContext) -> GateOutput {
    let project_type = project_type_for(config, ctx);
    let templates = command_templates(config, project_type);
    if templates.is_empty() {
        return no_command(config, project_type);
    }

    let files = match changed_files_for_gate(config, ctx, project_type).await {
        Scope::Skip => return GateOutput::skipped(config, SkipReason::NoChangedFiles),
        Scope::Full => None,
        Scope::Files(files) if templates.iter().all(CommandTemplate::narrows) => Some(files),
        Scope::Files(_) => {
            tracing::debug!(gate = %config.name, "command cannot narrow to files, running full scope");
            None
        }
    };

    let argvs = templates
        .iter()
        .map(|template| template.render(files.as_deref()))
        .collect();
    let run = run_candidates(config, ctx, argvs).await;
    finish(
        config,
        ctx,
        run,
        commands::parser_chain(config.gate_type, project_type),
        files,
    )
}

/// Turn a finished candidate run into the gate's output.
pub(crate) fn finish(
    config: &GateConfig,
    ctx: &ExecutionContext,
    run: CandidateRun,
    parsers: &[Tool],
    checked_files: Option<Vec<String>>,
) -> GateOutput {
    let outcome = match run.result {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(gate = %config.name, error = %err, "gate process failed to run");
            let mut output = GateOutput::failure(config, run.command, err.to_string());
            output.checked_files = checked_files;
            return output;
        }
    };

    let passed = outcome.success();
    let (structured_errors, error_summary) = if passed {
        (Vec::new(), None)
    } else {
        let errors = diagnostics_for(&outcome, parsers, config, ctx);
        let summary = if errors.is_empty() {
            raw_summary(&outcome)
        } else {
            summarize_errors(&errors, SUMMARY_MAX_ITEMS)
        };
        (errors, Some(summary))
    };

    tracing::info!(
        gate = %config.name,
        passed,
        exit_code = outcome.exit_code,
        duration_ms = outcome.duration_ms,
        errors = structured_errors.len(),
        "gate finished"
    );

    GateOutput {
        gate_name: config.name.clone(),
        gate_type: config.gate_type,
        passed,
        exit_code: outcome.exit_code,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        duration_ms: outcome.duration_ms,
        command: run.command,
        error_summary,
        structured_errors,
        skipped: false,
        skip_reason: None,
        checked_files,
        from_cache: false,
    }
}

/// Parsed diagnostics with file paths relative to the project root.
///
/// Tools report paths relative to where they ran, so relative paths are
/// resolved against the gate's working directory first.
fn diagnostics_for(
    outcome: &ProcessOutcome,
    parsers: &[Tool],
    config: &GateConfig,
    ctx: &ExecutionContext,
) -> Vec<ErrorInfo> {
    let cwd = working_dir(config, ctx);
    parse_output(parsers, &outcome.combined())
        .into_iter()
        .map(|mut error| {
            if !error.file.is_empty() {
                let resolved = cwd.join(&error.file);
                error.file = match resolved.strip_prefix(&ctx.project_root) {
                    Ok(rel) if !rel.as_os_str().is_empty() => {
                        rel.to_string_lossy().replace('\\', "/")
                    }
                    _ => relative_to(&resolved.to_string_lossy(), &ctx.project_root),
                };
            }
            error
        })
        .collect()
}

fn raw_summary(outcome: &ProcessOutcome) -> String {
    let raw = if outcome.stderr.trim().is_empty() {
        outcome.stdout.trim()
    } else {
        outcome.stderr.trim()
    };
    if raw.is_empty() {
        format!("exited with code {}", outcome.exit_code)
    } else {
        tail_chars(raw, RAW_SUMMARY_CHARS)
    }
}

/// Output for a gate with no command to run at all.
pub(crate) fn no_command(config: &GateConfig, project_type: ProjectType) -> GateOutput {
    let message = if config.gate_type == GateType::Custom {
        "custom gate has no command configured".to_string()
    } else {
        format!(
            "no built-in {} command for project type {}; set `command` in the gate config",
            config.gate_type, project_type
        )
    };
    tracing::warn!(gate = %config.name, "{}", message);
    GateOutput::failure(config, Vec::new(), message)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{commit_all, init_repo};
    use std::fs;

    fn sh_gate(name: &str, gate_type: GateType, script: &str) -> GateConfig {
        GateConfig::new(name, gate_type).with_command("sh", &["-c", script])
    }

    #[tokio::test]
    async fn override_command_failure_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);
        let gate = Gate::from_config(sh_gate(
            "lint",
            GateType::Lint,
            "echo 'app.py:3:1: F401 unused import'; exit 1",
        ));
        let out = gate.execute("S-1", &ctx).await;
        assert!(!out.passed);
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.structured_errors.len(), 1);
        assert_eq!(out.structured_errors[0].file, "app.py");
        assert_eq!(out.structured_errors[0].line, Some(3));
        assert!(out.error_summary.unwrap().contains("app.py"));
        assert_eq!(out.command, vec!["sh", "-c", "echo 'app.py:3:1: F401 unused import'; exit 1"]);
    }

    #[tokio::test]
    async fn diagnostic_paths_are_relative_to_the_project_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("backend")).unwrap();
        let absolute = dir.path().join("backend/db.py");
        let script = format!(
            "echo 'api.py:3:1: F401 unused import'; echo '{}:5:1: E302 expected 2 blank lines'; exit 1",
            absolute.display()
        );
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);
        let gate = Gate::from_config(
            sh_gate("lint-python", GateType::Lint, &script).with_working_dir("backend"),
        );
        let out = gate.execute("S-1", &ctx).await;

        let files: Vec<&str> = out.structured_errors.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, vec!["backend/api.py", "backend/db.py"]);
    }

    #[tokio::test]
    async fn unknown_project_without_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Unknown);
        let gate = Gate::from_config(GateConfig::new("types", GateType::Typecheck));
        let out = gate.execute("S-1", &ctx).await;
        assert!(!out.passed);
        assert!(!out.skipped);
        assert_eq!(out.exit_code, crate::output::PROCESS_FAILURE_EXIT_CODE);
        assert!(out.error_summary.unwrap().contains("no built-in typecheck command"));
    }

    #[tokio::test]
    async fn missing_override_program_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Rust);
        let gate = Gate::from_config(
            GateConfig::new("types", GateType::Typecheck).with_command("qgate-missing-tool", &[]),
        );
        let out = gate.execute("S-1", &ctx).await;
        assert!(!out.passed);
        assert_eq!(out.exit_code, -1);
        assert!(out.error_summary.unwrap().contains("command not found"));
    }

    #[tokio::test]
    async fn incremental_gate_skips_without_launching() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        commit_all(&repo, "initial");
        fs::write(dir.path().join("notes.md"), "todo\n").unwrap();

        let marker = dir.path().join("launched");
        let script = format!("touch {}", marker.display());
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);
        let gate = Gate::from_config(sh_gate("lint", GateType::Lint, &script).incremental(true));
        let out = gate.execute("S-1", &ctx).await;

        assert!(out.skipped);
        assert!(out.passed);
        assert_eq!(out.skip_reason, Some(SkipReason::NoChangedFiles));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn incremental_outside_repository_runs_full_scope() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);
        let gate = Gate::from_config(sh_gate("lint", GateType::Lint, "exit 0").incremental(true));
        let out = gate.execute("S-1", &ctx).await;
        assert!(out.passed);
        assert!(!out.skipped);
        assert_eq!(out.checked_files, None);
    }

    #[tokio::test]
    async fn fallback_moves_past_missing_programs_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig::new("t", GateType::Custom);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Unknown);
        let run = run_candidates(
            &config,
            &ctx,
            vec![
                vec!["qgate-missing-a".into()],
                vec!["sh".into(), "-c".into(), "exit 4".into()],
                vec!["sh".into(), "-c".into(), "exit 0".into()],
            ],
        )
        .await;
        assert_eq!(run.command[0], "sh");
        assert_eq!(run.result.unwrap().exit_code, 4);

        let run = run_candidates(
            &config,
            &ctx,
            vec![vec!["qgate-missing-a".into()], vec!["qgate-missing-b".into()]],
        )
        .await;
        let err = run.result.unwrap_err();
        assert!(err.to_string().contains("qgate-missing-a, qgate-missing-b"));
    }

    #[test]
    fn working_dir_resolves_against_root() {
        let ctx = ExecutionContext::new("/repo", ProjectType::Python);
        let config = GateConfig::new("t", GateType::Test).with_working_dir("backend");
        assert_eq!(working_dir(&config, &ctx), PathBuf::from("/repo/backend"));
        let config = GateConfig::new("t", GateType::Test);
        assert_eq!(working_dir(&config, &ctx), PathBuf::from("/repo"));
    }
}
