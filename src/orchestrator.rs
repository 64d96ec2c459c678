//! Quality gate orchestration
//!
//! [`QualityGates`] owns the configured gates and the result cache for a
//! project. It runs gates sequentially in declaration order or all at once,
//! applying fail-fast in both modes: once a required gate fails, gates that
//! have not run yet are recorded as skipped instead of executed.

use crate::cache::{default_cache_path, CacheError, CacheLookup, GateCache};
use crate::changed_files::{ChangedFilesDetector, DEFAULT_BASELINE};
use crate::config::{validate_gates, ConfigError, GateConfig, GateType, QualityGatesConfig};
use crate::diagnostics::summarize_errors;
use crate::gate::{ExecutionContext, Gate};
use crate::output::{GateOutput, SkipReason};
use crate::project::{detect_project, ProjectType};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Structured errors listed per gate in a failure summary
const FAILURE_SUMMARY_ITEMS: usize = 3;

/// Gate name to output for one run
pub type GateResults = BTreeMap<String, GateOutput>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub fail_fast: bool,
    pub use_cache: bool,
    pub cache_ttl: Option<Duration>,
    /// Cache document location; defaults to `<root>/.qgate/gate_cache.json`
    pub cache_path: Option<PathBuf>,
    pub baseline: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            fail_fast: true,
            use_cache: true,
            cache_ttl: None,
            cache_path: None,
            baseline: DEFAULT_BASELINE.to_string(),
        }
    }
}

impl From<&QualityGatesConfig> for OrchestratorOptions {
    fn from(config: &QualityGatesConfig) -> Self {
        Self {
            fail_fast: config.fail_fast,
            use_cache: config.use_cache,
            cache_ttl: config.cache_ttl(),
            ..Self::default()
        }
    }
}

pub struct QualityGates {
    project_root: PathBuf,
    gates: Vec<Gate>,
    options: OrchestratorOptions,
    cache: Option<GateCache>,
}

impl QualityGates {
    pub fn new(
        project_root: impl Into<PathBuf>,
        configs: Vec<GateConfig>,
        options: OrchestratorOptions,
    ) -> Result<Self, ConfigError> {
        validate_gates(&configs)?;
        let project_root = project_root.into();
        let cache = options.use_cache.then(|| {
            let mut detector =
                ChangedFilesDetector::new(&project_root).with_baseline(options.baseline.clone());
            let path = match &options.cache_path {
                Some(path) => {
                    detector = detector.excluding(path.clone());
                    path.clone()
                }
                None => default_cache_path(&project_root),
            };
            GateCache::open_at(path, detector)
        });
        Ok(Self {
            project_root,
            gates: configs.into_iter().map(Gate::from_config).collect(),
            options,
            cache,
        })
    }

    /// Build from a task's `quality_gates` section; no gate list means
    /// auto-detection, a disabled section means no gates.
    pub fn from_config(
        project_root: impl Into<PathBuf>,
        config: &QualityGatesConfig,
    ) -> Result<Self, ConfigError> {
        let project_root = project_root.into();
        let configs = if !config.enabled {
            Vec::new()
        } else {
            match &config.gates {
                Some(gates) => gates.clone(),
                None => Self::create_default(&project_root),
            }
        };
        Self::new(project_root, configs, OrchestratorOptions::from(config))
    }

    /// Ordered project types under `root`, `[Unknown]` when none match.
    pub fn detect_project_types(root: &Path) -> Vec<ProjectType> {
        crate::project::detect_project_types(root)
    }

    /// Typecheck, test and lint gates for every detected ecosystem.
    ///
    /// Test and typecheck gates are required, lint gates optional. In a
    /// mixed repository names carry the ecosystem (`test-python`) and each
    /// gate runs in the directory its ecosystem was found in.
    pub fn create_default(project_root: &Path) -> Vec<GateConfig> {
        let detection = detect_project(project_root);
        let known = detection.known_types();
        if known.is_empty() {
            tracing::warn!(root = %project_root.display(), "no known project type, no default gates");
            return Vec::new();
        }
        let mixed = known.len() > 1;

        let mut configs = Vec::new();
        for project_type in known {
            for (gate_type, required) in [
                (GateType::Typecheck, true),
                (GateType::Test, true),
                (GateType::Lint, false),
            ] {
                let name = if mixed {
                    format!("{}-{}", gate_type, project_type)
                } else {
                    gate_type.to_string()
                };
                let mut config = GateConfig::new(name, gate_type)
                    .required(required)
                    .for_project(project_type);
                if let Some(dir) = detection
                    .location(project_type)
                    .filter(|dir| !dir.as_os_str().is_empty())
                {
                    config = config.with_working_dir(dir);
                }
                configs.push(config);
            }
        }
        configs
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Configured gates in declaration order
    pub fn gate_configs(&self) -> impl Iterator<Item = &GateConfig> {
        self.gates.iter().map(Gate::config)
    }

    pub fn cache_mut(&mut self) -> Option<&mut GateCache> {
        self.cache.as_mut()
    }

    /// Context using the primary detected project type and configured baseline.
    pub fn execution_context(&self) -> ExecutionContext {
        let detection = detect_project(&self.project_root);
        ExecutionContext::new(self.project_root.clone(), detection.primary())
            .with_baseline(self.options.baseline.clone())
    }

    pub async fn execute(
        &mut self,
        story_id: &str,
        ctx: &ExecutionContext,
        parallel: bool,
    ) -> GateResults {
        if parallel {
            self.execute_parallel(story_id, ctx).await
        } else {
            self.execute_sequential(story_id, ctx).await
        }
    }

    /// Run enabled gates one after another in declaration order.
    pub async fn execute_sequential(&mut self, story_id: &str, ctx: &ExecutionContext) -> GateResults {
        let span = tracing::info_span!("quality_gates", run_id = %Uuid::new_v4(), story_id, mode = "sequential");
        self.run_sequential(story_id, ctx).instrument(span).await
    }

    /// Run enabled gates concurrently, one task per gate.
    pub async fn execute_parallel(&mut self, story_id: &str, ctx: &ExecutionContext) -> GateResults {
        let span = tracing::info_span!("quality_gates", run_id = %Uuid::new_v4(), story_id, mode = "parallel");
        self.run_parallel(story_id, ctx).instrument(span).await
    }

    /// Key this run's cache traffic on the state before any gate executes.
    fn refresh_state_hash(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            if let Some(hash) = cache.refresh_hash() {
                tracing::debug!(tree_hash = %hash, "repository state");
            }
        }
    }

    async fn run_sequential(&mut self, story_id: &str, ctx: &ExecutionContext) -> GateResults {
        self.refresh_state_hash();
        let mut results = GateResults::new();
        let mut failed_required: Option<String> = None;

        for gate in self.gates.iter().filter(|gate| gate.config().enabled) {
            let config = gate.config();
            if let Some(failed_gate) = &failed_required {
                tracing::info!(gate = %config.name, failed_gate = %failed_gate, "skipping (fail-fast)");
                results.insert(
                    config.name.clone(),
                    GateOutput::skipped(
                        config,
                        SkipReason::FailFast {
                            failed_gate: failed_gate.clone(),
                        },
                    ),
                );
                continue;
            }

            let output = match lookup(&mut self.cache, &config.name) {
                Some(hit) => hit,
                None => {
                    let output = gate.execute(story_id, ctx).await;
                    store(&mut self.cache, &output, self.options.cache_ttl);
                    output
                }
            };

            if self.options.fail_fast && config.required && !output.passed {
                tracing::warn!(gate = %config.name, "required gate failed, arming fail-fast");
                failed_required = Some(config.name.clone());
            }
            results.insert(config.name.clone(), output);
        }
        results
    }

    async fn run_parallel(&mut self, story_id: &str, ctx: &ExecutionContext) -> GateResults {
        self.refresh_state_hash();
        let mut results = GateResults::new();
        let mut cached_failure: Option<String> = None;
        let mut misses: Vec<Gate> = Vec::new();

        for gate in self.gates.iter().filter(|gate| gate.config().enabled) {
            let config = gate.config();
            match lookup(&mut self.cache, &config.name) {
                Some(hit) => {
                    if config.required && !hit.passed && cached_failure.is_none() {
                        cached_failure = Some(config.name.clone());
                    }
                    results.insert(config.name.clone(), hit);
                }
                None => misses.push(gate.clone()),
            }
        }

        if self.options.fail_fast {
            if let Some(failed_gate) = &cached_failure {
                tracing::warn!(failed_gate = %failed_gate, skipped = misses.len(), "cached required failure, skipping remaining gates");
                for gate in &misses {
                    let config = gate.config();
                    results.insert(
                        config.name.clone(),
                        GateOutput::skipped(
                            config,
                            SkipReason::FailFast {
                                failed_gate: failed_gate.clone(),
                            },
                        ),
                    );
                }
                return results;
            }
        }

        let story_id = story_id.to_string();
        let ctx = ctx.clone();
        self.run_tasks(misses, &mut results, move |gate| {
            let story_id = story_id.clone();
            let ctx = ctx.clone();
            async move { gate.execute(&story_id, &ctx).await }
        })
        .await;
        results
    }

    /// Spawn one task per gate from `launch` and collect them as they finish.
    ///
    /// With fail-fast on, the first required failure aborts every task
    /// still running. A task that panics is recorded as a failure and does
    /// not stop the others.
    async fn run_tasks<F, Fut>(&mut self, gates: Vec<Gate>, results: &mut GateResults, mut launch: F)
    where
        F: FnMut(Gate) -> Fut,
        Fut: Future<Output = GateOutput> + Send + 'static,
    {
        let mut failed_required: Option<String> = None;
        let configs: HashMap<String, GateConfig> = gates
            .iter()
            .map(|gate| (gate.name().to_string(), gate.config().clone()))
            .collect();
        let mut aborts = Vec::with_capacity(gates.len());
        let mut pending = FuturesUnordered::new();
        for gate in gates {
            let name = gate.name().to_string();
            let handle = tokio::spawn(launch(gate).in_current_span());
            aborts.push((name.clone(), handle.abort_handle()));
            pending.push(async move { (name, handle.await) });
        }

        while let Some((name, joined)) = pending.next().await {
            let Some(config) = configs.get(&name) else {
                continue;
            };
            let output = match joined {
                Ok(output) => {
                    store(&mut self.cache, &output, self.options.cache_ttl);
                    output
                }
                Err(err) if err.is_cancelled() => {
                    let failed_gate = failed_required.clone().unwrap_or_default();
                    tracing::info!(gate = %name, failed_gate = %failed_gate, "cancelled (fail-fast)");
                    GateOutput::skipped(config, SkipReason::Cancelled { failed_gate })
                }
                // not cached, a panic says nothing about the repository state
                Err(err) => {
                    tracing::warn!(gate = %name, error = %err, "gate task panicked");
                    GateOutput::failure(config, Vec::new(), format!("gate task failed: {}", err))
                }
            };

            if self.options.fail_fast
                && failed_required.is_none()
                && config.required
                && !output.passed
                && !output.skipped
            {
                tracing::warn!(gate = %name, "required gate failed, cancelling in-flight gates");
                failed_required = Some(name.clone());
                for (other, abort) in &aborts {
                    if other != &name {
                        abort.abort();
                    }
                }
            }
            results.insert(name, output);
        }
    }

    /// True iff every enabled, required gate passed.
    ///
    /// A required gate missing from `results` counts as not passed.
    pub fn should_allow_progression(&self, results: &GateResults) -> bool {
        self.gate_configs()
            .filter(|config| config.enabled && config.required)
            .all(|config| {
                results
                    .get(&config.name)
                    .map(|output| output.passed)
                    .unwrap_or(false)
            })
    }

    /// Human report of failing gates and fail-fast skips.
    pub fn get_failure_summary(&self, results: &GateResults) -> String {
        let mut failures = Vec::new();
        let mut skipped = Vec::new();

        for config in self.gate_configs().filter(|config| config.enabled) {
            let Some(output) = results.get(&config.name) else {
                continue;
            };
            if output.is_fail_fast_skip() {
                let reason = output
                    .skip_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                skipped.push(format!("  - {}: {}", config.name, reason));
                continue;
            }
            if output.passed {
                continue;
            }

            let label = if config.required { "REQUIRED" } else { "OPTIONAL" };
            let detail = if output.structured_errors.is_empty() {
                output
                    .error_summary
                    .clone()
                    .unwrap_or_else(|| format!("exited with code {}", output.exit_code))
            } else {
                summarize_errors(&output.structured_errors, FAILURE_SUMMARY_ITEMS)
            };
            failures.push(format!("[{}] {}:\n{}", label, config.name, indent(&detail)));
        }

        if failures.is_empty() && skipped.is_empty() {
            return "All quality gates passed".to_string();
        }

        let mut report = String::new();
        if !failures.is_empty() {
            report.push_str("Quality gate failures:\n");
            report.push_str(&failures.join("\n"));
        }
        if !skipped.is_empty() {
            if !report.is_empty() {
                report.push_str("\n\n");
            }
            report.push_str("Skipped due to fail-fast:\n");
            report.push_str(&skipped.join("\n"));
        }
        report
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn lookup(cache: &mut Option<GateCache>, gate_name: &str) -> Option<GateOutput> {
    let cache = cache.as_mut()?;
    match cache.get(gate_name) {
        CacheLookup::Hit(output) => {
            tracing::info!(gate = %gate_name, passed = output.passed, from_cache = true, "cache hit");
            Some(output)
        }
        CacheLookup::Miss(reason) => {
            tracing::debug!(gate = %gate_name, %reason, "cache miss");
            None
        }
    }
}

fn store(cache: &mut Option<GateCache>, output: &GateOutput, ttl: Option<Duration>) {
    let Some(cache) = cache.as_mut() else {
        return;
    };
    if !output.is_cacheable() {
        return;
    }
    match cache.set(&output.gate_name, output, ttl) {
        Ok(()) => {}
        Err(err @ CacheError::StateUnavailable(_)) => {
            tracing::debug!(gate = %output.gate_name, error = %err, "not caching gate result");
        }
        Err(err) => {
            tracing::warn!(gate = %output.gate_name, error = %err, "failed to cache gate result");
        }
    }
}
