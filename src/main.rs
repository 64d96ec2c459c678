use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use qgate::cache::GateCache;
use qgate::changed_files::{ChangeSources, ChangedFilesDetector, DEFAULT_BASELINE};
use qgate::orchestrator::{GateResults, OrchestratorOptions, QualityGates};
use qgate::project::detect_project;
use qgate::util::{command_label, truncate};
use qgate::QualityGatesConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Log filter variable, falls back to `RUST_LOG`
const LOG_ENV: &str = "QGATE_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "qgate",
    about = "Run typecheck, test, lint and custom quality gates against a project",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured (or auto-detected) gates
    Run(RunArgs),
    /// Print detected project types and where they were found
    Detect(PathArgs),
    /// List files changed since the baseline
    Changed(ChangedArgs),
    /// Manage the gate result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Args, Debug)]
struct PathArgs {
    /// Project root (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(default_value = ".")]
    path: PathBuf,
    /// Task spec (JSON with a `quality_gates` section) or gate file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Story or task identifier passed to custom gates
    #[arg(short, long)]
    story: Option<String>,
    /// Run gates concurrently
    #[arg(short, long)]
    parallel: bool,
    #[arg(long)]
    no_cache: bool,
    #[arg(long)]
    no_fail_fast: bool,
    /// Reference incremental gates and the cache compare against
    #[arg(long, default_value = DEFAULT_BASELINE)]
    baseline: String,
    /// Print results as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ChangedArgs {
    #[arg(default_value = ".")]
    path: PathBuf,
    /// Only files with these extensions (repeatable)
    #[arg(short, long = "ext")]
    extensions: Vec<String>,
    #[arg(long, default_value = DEFAULT_BASELINE)]
    baseline: String,
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Drop cached results for one gate, or all of them
    Clear {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(short, long)]
        gate: Option<String>,
    },
}

#[derive(Serialize)]
struct RunReport<'a> {
    story_id: &'a str,
    allowed: bool,
    results: &'a GateResults,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Detect(args) => detect(&args.path),
        Commands::Changed(args) => changed(args),
        Commands::Cache {
            command: CacheCommands::Clear { path, gate },
        } => clear_cache(&path, gate.as_deref()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("Project root not found: {}", path.display()))
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let root = canonical_root(&args.path)?;
    let config = match &args.config {
        Some(path) => QualityGatesConfig::load(path)?,
        None => QualityGatesConfig::default(),
    };

    let mut options = OrchestratorOptions::from(&config);
    options.baseline = args.baseline.clone();
    if args.no_cache {
        options.use_cache = false;
    }
    if args.no_fail_fast {
        options.fail_fast = false;
    }

    let gates = if !config.enabled {
        Vec::new()
    } else {
        config
            .gates
            .clone()
            .unwrap_or_else(|| QualityGates::create_default(&root))
    };
    let mut orchestrator = QualityGates::new(&root, gates, options)?;
    let story_id = args
        .story
        .clone()
        .unwrap_or_else(|| format!("adhoc-{}", Uuid::new_v4()));
    let ctx = orchestrator.execution_context();
    let results = orchestrator
        .execute(&story_id, &ctx, args.parallel || config.parallel)
        .await;
    let allowed = orchestrator.should_allow_progression(&results);

    if args.json {
        let report = RunReport {
            story_id: &story_id,
            allowed,
            results: &results,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_results(&orchestrator, &results);
        if !allowed || results.values().any(|out| !out.passed) {
            println!();
            println!("{}", orchestrator.get_failure_summary(&results));
        }
        println!();
        println!(
            "{}",
            if allowed {
                "Progression allowed"
            } else {
                "Progression blocked"
            }
        );
    }

    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_results(orchestrator: &QualityGates, results: &GateResults) {
    if results.is_empty() {
        println!("No quality gates configured");
        return;
    }
    let width = orchestrator
        .gate_configs()
        .map(|config| config.name.chars().count())
        .max()
        .unwrap_or(0);
    for config in orchestrator.gate_configs() {
        let Some(output) = results.get(&config.name) else {
            continue;
        };
        let mut detail = if output.skipped {
            output
                .skip_reason
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        } else {
            format!("{}ms  {}", output.duration_ms, command_label(&output.command))
        };
        if output.from_cache {
            detail.push_str("  (cached)");
        }
        println!(
            "{:<4}  {:<width$}  {}",
            output.status_label(),
            config.name,
            truncate(&detail, 100),
            width = width
        );
    }
}

fn detect(path: &Path) -> Result<ExitCode> {
    let root = canonical_root(path)?;
    let detection = detect_project(&root);
    for project_type in &detection.types {
        match detection.location(*project_type) {
            Some(dir) if !dir.as_os_str().is_empty() => {
                println!("{:<8}  {}", project_type.as_str(), dir.display())
            }
            _ => println!("{:<8}  .", project_type.as_str()),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn changed(args: ChangedArgs) -> Result<ExitCode> {
    let root = canonical_root(&args.path)?;
    let detector = ChangedFilesDetector::new(&root).with_baseline(args.baseline);
    let files = if args.extensions.is_empty() {
        detector.changed_files(ChangeSources::default())?
    } else {
        let extensions: Vec<&str> = args.extensions.iter().map(String::as_str).collect();
        detector.changed_files_by_extension(&extensions)?
    };
    for file in files {
        println!("{}", file);
    }
    Ok(ExitCode::SUCCESS)
}

fn clear_cache(path: &Path, gate: Option<&str>) -> Result<ExitCode> {
    let root = canonical_root(path)?;
    let mut cache = GateCache::open(&root);
    let before = cache.len();
    cache.invalidate(gate)?;
    println!("Removed {} cached result(s)", before - cache.len());
    Ok(ExitCode::SUCCESS)
}
