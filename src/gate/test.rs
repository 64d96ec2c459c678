use super::commands::{parser_chain, CommandTemplate};
use super::{
    changed_files_for_gate, command_templates, detector_for, finish, no_command,
    project_type_for, run_candidates, ExecutionContext, Scope,
};
use crate::config::GateConfig;
use crate::output::{GateOutput, SkipReason};

/// Runs the ecosystem's test runner.
///
/// Incrementally it runs the test files that cover the changed sources,
/// or asks the runner to re-run its last failures when none map.
#[derive(Debug, Clone)]
pub struct TestGate {
    pub(crate) config: GateConfig,
}

/// Argv per candidate plus the files the run is narrowed to
type RunPlan = (Vec<Vec<String>>, Option<Vec<String>>);

impl TestGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, ctx: &ExecutionContext) -> GateOutput {
        let config = &self.config;
        let project_type = project_type_for(config, ctx);
        let templates = command_templates(config, project_type);
        if templates.is_empty() {
            return no_command(config, project_type);
        }

        let scope = changed_files_for_gate(config, ctx, project_type).await;
        if scope == Scope::Skip {
            return GateOutput::skipped(config, SkipReason::NoChangedFiles);
        }
        let (argvs, checked_files) = plan_run(config, ctx, &templates, scope).await;
        let run = run_candidates(config, ctx, argvs).await;
        finish(
            config,
            ctx,
            run,
            parser_chain(config.gate_type, project_type),
            checked_files,
        )
    }
}

async fn plan_run(
    config: &GateConfig,
    ctx: &ExecutionContext,
    templates: &[CommandTemplate],
    scope: Scope,
) -> RunPlan {
    let full = || -> Vec<Vec<String>> { templates.iter().map(|t| t.render(None)).collect() };

    let changed = match scope {
        Scope::Files(changed) if templates.iter().all(CommandTemplate::narrows) => changed,
        _ => return (full(), None),
    };

    let detector = detector_for(config, ctx);
    let mapped = tokio::task::spawn_blocking(move || detector.infer_test_files_for_changes(&changed))
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(gate = %config.name, error = %err, "test file inference failed");
            Vec::new()
        });

    if !mapped.is_empty() {
        tracing::debug!(gate = %config.name, tests = mapped.len(), "running mapped test files");
        let argvs = templates.iter().map(|t| t.render(Some(&mapped))).collect();
        return (argvs, Some(mapped));
    }

    tracing::debug!(gate = %config.name, "no mapped tests, re-running last failures");
    let argvs = templates
        .iter()
        .map(|t| t.render_rerun_failed().unwrap_or_else(|| t.render(None)))
        .collect();
    (argvs, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateType;
    use crate::gate::commands::candidates;
    use crate::project::ProjectType;
    use std::fs;

    fn python_templates() -> Vec<CommandTemplate> {
        candidates(GateType::Test, ProjectType::Python)
    }

    #[tokio::test]
    async fn mapped_test_files_narrow_the_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test_calc.py"), "").unwrap();
        let config = GateConfig::new("tests", GateType::Test).incremental(true);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);

        let (argvs, checked) = plan_run(
            &config,
            &ctx,
            &python_templates(),
            Scope::Files(vec!["calc.py".into()]),
        )
        .await;
        assert_eq!(argvs[0], vec!["pytest", "-q", "test_calc.py"]);
        assert_eq!(argvs[1], vec!["python", "-m", "pytest", "-q", "test_calc.py"]);
        assert_eq!(checked, Some(vec!["test_calc.py".to_string()]));
    }

    #[tokio::test]
    async fn unmapped_changes_rerun_last_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig::new("tests", GateType::Test).incremental(true);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);

        let (argvs, checked) = plan_run(
            &config,
            &ctx,
            &python_templates(),
            Scope::Files(vec!["calc.py".into()]),
        )
        .await;
        assert_eq!(argvs[0], vec!["pytest", "-q", "--lf"]);
        assert_eq!(checked, None);
    }

    #[tokio::test]
    async fn full_scope_runs_whole_suite() {
        let dir = tempfile::tempdir().unwrap();
        let config = GateConfig::new("tests", GateType::Test);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Rust);
        let templates = candidates(GateType::Test, ProjectType::Rust);
        let (argvs, checked) = plan_run(&config, &ctx, &templates, Scope::Full).await;
        assert_eq!(argvs, vec![vec!["cargo", "test"]]);
        assert_eq!(checked, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_suite_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo 'FAILED tests/test_calc.py::test_add - assert 1 == 2'; exit 1";
        let config = GateConfig::new("tests", GateType::Test).with_command("sh", &["-c", script]);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);
        let out = TestGate::new(config).execute(&ctx).await;
        assert!(!out.passed);
        assert!(!out.structured_errors.is_empty());
        assert_eq!(out.structured_errors[0].file, "tests/test_calc.py");
    }
}
