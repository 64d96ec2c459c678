use super::{execute_scoped, ExecutionContext};
use crate::config::GateConfig;
use crate::output::GateOutput;

/// Runs the ecosystem's type checker (tsc, mypy/pyright, cargo check, go build).
#[derive(Debug, Clone)]
pub struct TypecheckGate {
    pub(crate) config: GateConfig,
}

impl TypecheckGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, ctx: &ExecutionContext) -> GateOutput {
        execute_scoped(&self.config, ctx).await
    }
}
