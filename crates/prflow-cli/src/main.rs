//! prflow - pull request analysis and remediation CLI
//!
//! ## Commands
//!
//! - `modules`: List the registered analysis modules
//! - `analyze`: Run the analysis engine against a PR description (JSON)
//! - `run`: Drive a full workflow (analyze, issues, auto-fix, validate)
//! - `status`: Show a persisted workflow
//! - `list`: List persisted workflows

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

use prflow_core::metrics::METRICS;
use prflow_core::reporting::write_workflow_report_json;
use prflow_core::telemetry::{init_tracing, LogFormat};
use prflow_core::{
    builtin_modules, AnalysisEngine, Collaborators, EventBus, MarkdownIssueTracker,
    ModuleAutoFixAgent, ModuleOutcome, Orchestrator, PrContext, PrflowConfig, RecoveryPlanner,
    WorkflowExecution, WorkflowManager, WorkflowState,
};
use prflow_state::{SurrealWorkflowStore, WorkflowStore};

#[derive(Parser)]
#[command(name = "prflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pull request analysis and remediation workflows", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "PRFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Workflow store: `mem`, a SurrealDB URL, or a local directory.
    /// Defaults to SURREALDB_URL, then `.prflow/db`.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the analysis modules enabled by the configuration
    Modules,

    /// Analyze a PR without filing issues; prints the report as JSON
    Analyze {
        /// Path to the PR context (JSON)
        #[arg(long)]
        pr: PathBuf,

        /// Only run these modules, in this order (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        modules: Vec<String>,
    },

    /// Run the full workflow for a PR
    Run {
        /// Path to the PR context (JSON)
        #[arg(long)]
        pr: PathBuf,

        /// Directory receiving the Markdown issues
        #[arg(long, default_value = ".prflow/issues")]
        issues_dir: PathBuf,

        /// Also write the finished workflow as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show a persisted workflow
    Status {
        /// Workflow ID
        id: String,

        /// Print the full workflow as JSON
        #[arg(long)]
        full: bool,
    },

    /// List persisted workflows
    List {
        /// Only workflows for this PR id
        #[arg(long)]
        pr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, level);

    let config =
        PrflowConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let outcome = match cli.command {
        Commands::Modules => cmd_modules(&config),
        Commands::Analyze { pr, modules } => cmd_analyze(&config, &pr, &modules).await,
        Commands::Run {
            pr,
            issues_dir,
            report,
        } => {
            let store = open_store(cli.db.as_deref()).await?;
            cmd_run(&config, store, &pr, &issues_dir, report.as_deref()).await
        }
        Commands::Status { id, full } => {
            let store = open_store(cli.db.as_deref()).await?;
            cmd_status(store.as_ref(), &id, full).await
        }
        Commands::List { pr } => {
            let store = open_store(cli.db.as_deref()).await?;
            cmd_list(store.as_ref(), pr.as_deref()).await
        }
    };

    METRICS.flush();
    outcome
}

async fn open_store(db: Option<&str>) -> Result<Arc<dyn WorkflowStore>> {
    let store = match db {
        Some("mem") => SurrealWorkflowStore::in_memory().await,
        Some(url) if url.contains("://") => SurrealWorkflowStore::connect(url).await,
        Some(dir) => SurrealWorkflowStore::at_path(Path::new(dir)).await,
        None => SurrealWorkflowStore::from_env().await,
    }
    .context("Failed to open workflow store")?;
    Ok(Arc::new(store))
}

fn read_pr(path: &Path) -> Result<PrContext> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read PR file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid PR JSON in {}", path.display()))
}

fn build_engine(config: &PrflowConfig, events: EventBus) -> Result<Arc<AnalysisEngine>> {
    let engine = AnalysisEngine::from_config(config, events);
    engine
        .initialize(builtin_modules())
        .context("Failed to initialize analysis engine")?;
    Ok(Arc::new(engine))
}

/// List registered modules
fn cmd_modules(config: &PrflowConfig) -> Result<()> {
    let engine = build_engine(config, EventBus::new())?;
    let modules = engine.module_info();

    if modules.is_empty() {
        println!("No modules enabled. Check [analysis.categories] in the configuration.");
        return Ok(());
    }

    for module in modules {
        println!(
            "{:<20} {:<12} v{}{}",
            module.name,
            module.category.as_str(),
            module.version,
            if module.supports_auto_fix {
                "  (auto-fix)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

/// Run the analysis engine only
async fn cmd_analyze(config: &PrflowConfig, pr_path: &Path, modules: &[String]) -> Result<()> {
    let pr = read_pr(pr_path)?;
    let engine = build_engine(config, EventBus::new())?;

    let report = if modules.is_empty() {
        engine.analyze_all_detailed(&pr).await?
    } else {
        engine.analyze_with_modules(&pr, modules).await?
    };

    for run in &report.module_runs {
        if let ModuleOutcome::Failed { error } = &run.outcome {
            eprintln!("module {} failed: {}", run.module, error);
        } else if run.outcome == ModuleOutcome::TimedOut {
            eprintln!("module {} timed out", run.module);
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Drive one PR through the whole workflow
async fn cmd_run(
    config: &PrflowConfig,
    store: Arc<dyn WorkflowStore>,
    pr_path: &Path,
    issues_dir: &Path,
    report: Option<&Path>,
) -> Result<()> {
    let pr = read_pr(pr_path)?;
    let events = EventBus::new();
    let engine = build_engine(config, events.clone())?;
    let manager = Arc::new(WorkflowManager::new(
        config.targets.clone(),
        events.clone(),
    ));
    let issues = MarkdownIssueTracker::open(issues_dir)
        .await
        .with_context(|| format!("Failed to open issues directory {}", issues_dir.display()))?;

    let orchestrator = Orchestrator::new(
        engine.clone(),
        manager.clone(),
        Collaborators {
            issues: Arc::new(issues),
            auto_fix: Arc::new(ModuleAutoFixAgent::new(engine)),
            recovery: Arc::new(RecoveryPlanner::default()),
            store,
        },
        config.workflow.clone(),
        events,
    );

    let wf = orchestrator
        .process_pr(&pr)
        .await
        .context("Workflow could not be started")?;
    print_workflow(&wf);

    if let Some(path) = report {
        write_workflow_report_json(path, &wf)?;
        println!("Report:   {}", path.display());
    }

    let check = manager.check_performance_targets().await;
    println!(
        "Targets:  speed {} | coverage {} | auto-fix {}",
        mark(check.speed_ok),
        mark(check.coverage_ok),
        mark(check.auto_fix_ok)
    );

    if wf.state() == WorkflowState::Failed {
        anyhow::bail!("Workflow {} failed", wf.id);
    }
    Ok(())
}

/// Show one persisted workflow
async fn cmd_status(store: &dyn WorkflowStore, id: &str, full: bool) -> Result<()> {
    let record = store
        .get_workflow(id)
        .await
        .context("Failed to query workflow store")?
        .with_context(|| format!("Workflow '{}' not found", id))?;
    let wf = WorkflowExecution::from_record(record)?;

    if full {
        println!("{}", serde_json::to_string_pretty(&wf)?);
    } else {
        print_workflow(&wf);
    }
    Ok(())
}

/// List persisted workflows, newest first
async fn cmd_list(store: &dyn WorkflowStore, pr: Option<&str>) -> Result<()> {
    let records = store
        .list_workflows(pr)
        .await
        .context("Failed to query workflow store")?;

    if records.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<16} {:<10} {}",
            record.workflow_id,
            record.pr_id,
            record.state,
            record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn print_workflow(wf: &WorkflowExecution) {
    println!("workflow {}", wf.id);
    println!("PR:       {}", wf.pr_id);
    println!("State:    {}", wf.state());
    println!(
        "Started:  {}",
        wf.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("Duration: {}ms", wf.duration().num_milliseconds());
    println!("Findings: {}", wf.results.len());
    if let Some(improvement) = &wf.improvement {
        println!(
            "Fixed:    {} of {} ({:.1}%), {} remaining",
            improvement.fixed, improvement.original, improvement.percentage, improvement.remaining
        );
    }
    if !wf.issue_ids.is_empty() {
        println!("Issues:   {}", wf.issue_ids.join(", "));
    }
    println!(
        "Auto-fix: {}/{} succeeded",
        wf.auto_fix_successes,
        wf.auto_fix_attempts()
    );
    for error in &wf.errors {
        println!("Error:    {}", error.message);
    }
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "missed"
    }
}
