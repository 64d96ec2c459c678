use super::commands::CommandTemplate;
use super::{
    changed_files_for_gate, finish, no_command, project_type_for, run_candidates,
    ExecutionContext, Scope,
};
use crate::config::GateConfig;
use crate::output::{GateOutput, SkipReason};
use crate::util::truncate;

/// Characters of stderr kept as a custom gate's failure summary
const STDERR_SUMMARY_CHARS: usize = 500;

/// Runs an operator-supplied command template.
///
/// `{story_id}` and `{project_root}` are substituted, as is `{key}` for
/// every caller option. Pass/fail is the exit status alone.
#[derive(Debug, Clone)]
pub struct CustomGate {
    pub(crate) config: GateConfig,
}

impl CustomGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, story_id: &str, ctx: &ExecutionContext) -> GateOutput {
        let config = &self.config;
        let project_type = project_type_for(config, ctx);
        let Some(command) = config.command.as_deref().filter(|c| !c.trim().is_empty()) else {
            return no_command(config, project_type);
        };

        if changed_files_for_gate(config, ctx, project_type).await == Scope::Skip {
            return GateOutput::skipped(config, SkipReason::NoChangedFiles);
        }

        let argv: Vec<String> = CommandTemplate::from_override(command, &config.args)
            .argv
            .iter()
            .map(|part| substitute(part, story_id, ctx))
            .collect();
        let run = run_candidates(config, ctx, vec![argv]).await;
        let mut output = finish(config, ctx, run, &[], None);
        if !output.passed && output.exit_code != crate::output::PROCESS_FAILURE_EXIT_CODE {
            output.error_summary = Some(stderr_summary(&output));
        }
        output
    }
}

fn substitute(template: &str, story_id: &str, ctx: &ExecutionContext) -> String {
    let mut out = template
        .replace("{story_id}", story_id)
        .replace("{project_root}", &ctx.project_root.to_string_lossy());
    for (key, value) in &ctx.options {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

fn stderr_summary(output: &GateOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("command exited with code {}", output.exit_code)
    } else {
        truncate(stderr, STDERR_SUMMARY_CHARS)
    }
}
