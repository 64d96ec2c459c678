//! qgate library crate
//!
//! Quality gates for agent-produced changes: typecheck, test, lint and
//! custom verification steps run against a project, with results cached
//! per repository state and aggregated into a progression decision.

pub mod cache;
pub mod changed_files;
pub mod config;
pub mod diagnostics;
pub mod gate;
pub mod orchestrator;
pub mod output;
pub mod parsers;
pub mod project;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::{GateConfig, GateType, QualityGatesConfig};
pub use gate::ExecutionContext;
pub use orchestrator::{GateResults, OrchestratorOptions, QualityGates};
pub use output::{GateOutput, SkipReason};
pub use project::ProjectType;
