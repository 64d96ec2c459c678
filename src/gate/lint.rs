use super::{execute_scoped, ExecutionContext};
use crate::config::GateConfig;
use crate::output::GateOutput;

/// Runs the ecosystem's linter (eslint, ruff/flake8, clippy, golangci-lint/go vet).
#[derive(Debug, Clone)]
pub struct LintGate {
    pub(crate) config: GateConfig,
}

impl LintGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, ctx: &ExecutionContext) -> GateOutput {
        execute_scoped(&self.config, ctx).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::GateType;
    use crate::project::ProjectType;
    use crate::test_support::{commit_all, init_repo};
    use std::fs;

    #[tokio::test]
    async fn incremental_reports_checked_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.py"), "y = 1\n").unwrap();
        commit_all(&repo, "initial");
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();

        let config = GateConfig::new("lint", GateType::Lint)
            .with_command("true", &[])
            .incremental(true);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Python);
        let out = LintGate::new(config).execute(&ctx).await;

        assert!(out.passed);
        assert!(!out.skipped);
        // override commands are never narrowed
        assert_eq!(out.checked_files, None);
        assert_eq!(out.command, vec!["true"]);
    }

    #[tokio::test]
    async fn eslint_json_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let report = r#"[{"filePath":"/tmp/web/src/x.js","messages":[{"ruleId":"no-unused-vars","severity":2,"message":"a is unused","line":1,"column":7}],"errorCount":1,"warningCount":0}]"#;
        let script = format!("echo '{}'; exit 1", report);
        let config = GateConfig::new("lint", GateType::Lint)
            .for_project(ProjectType::Nodejs)
            .with_command("sh", &["-c", &script]);
        let ctx = ExecutionContext::new(dir.path(), ProjectType::Nodejs);
        let out = LintGate::new(config).execute(&ctx).await;

        assert!(!out.passed);
        assert_eq!(out.structured_errors.len(), 1);
        assert_eq!(out.structured_errors[0].code.as_deref(), Some("no-unused-vars"));
        assert_eq!(out.structured_errors[0].line, Some(1));
    }
}
