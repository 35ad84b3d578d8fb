use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use gref_lib::adapters::{HttpEvalRunner, HttpFailureAnalyzer, HttpGuidelineStore};
use gref_lib::lock::LockError;
use gref_lib::status::list_model_statuses;
use gref_orchestrator::{RefinementOrchestrator, StopSignal};
use gref_types::{EvalFilter, RunOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const HEALTH_CHECK_ATTEMPTS: u32 = 20;

/// Command-line runner for the guideline refinement orchestrator.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refine a guideline document until plateau, full pass, or budget.
    Run {
        /// Model identifier, e.g. claude-3-5-sonnet-latest.
        model: String,
        /// Provider identifier, e.g. anthropic.
        provider: String,
        /// Path to the guideline document under refinement.
        #[arg(long, default_value = "guidelines.md")]
        guideline: PathBuf,
        /// Directory for lock records, checkpoints, and run logs.
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
        /// Regex over `category/name` eval names; only matches are run.
        #[arg(long)]
        filter: Option<String>,
        /// Base URL of the eval runner service.
        #[arg(long, default_value = "http://127.0.0.1:9090")]
        runner_url: String,
        /// Base URL of the failure analyzer service.
        #[arg(long, default_value = "http://127.0.0.1:9091")]
        analyzer_url: String,
        /// Base URL of the guideline merge service.
        #[arg(long, default_value = "http://127.0.0.1:9092")]
        merger_url: String,
        /// Suite repetitions per iteration.
        #[arg(long)]
        repetitions: Option<usize>,
        /// Consecutive non-improving iterations before stopping.
        #[arg(long)]
        plateau_threshold: Option<u32>,
        /// Hard cap on refinement iterations.
        #[arg(long)]
        iteration_budget: Option<u32>,
        /// YAML run-options file; takes precedence over the flags above.
        #[arg(long, conflicts_with_all = ["filter", "repetitions", "plateau_threshold", "iteration_budget"])]
        config: Option<PathBuf>,
    },
    /// Show the status of every (model, provider) run in a state directory.
    Status {
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
        /// Seconds of silence after which a holder counts as dead.
        #[arg(long, default_value_t = 120)]
        liveness_window_secs: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gref_lib=debug,gref_orchestrator=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            model,
            provider,
            guideline,
            state_dir,
            filter,
            runner_url,
            analyzer_url,
            merger_url,
            repetitions,
            plateau_threshold,
            iteration_budget,
            config,
        } => {
            let options = match config {
                Some(path) => {
                    let file = std::fs::File::open(&path)
                        .with_context(|| format!("failed to open config: {path:?}"))?;
                    serde_yaml::from_reader(file)
                        .with_context(|| format!("failed to parse config: {path:?}"))?
                }
                None => {
                    let mut options = RunOptions::new(model, provider, guideline, state_dir);
                    if let Some(pattern) = filter {
                        options.filter = Some(
                            EvalFilter::regex(pattern).context("invalid --filter pattern")?,
                        );
                    }
                    if let Some(repetitions) = repetitions {
                        options.repetitions = repetitions;
                    }
                    if let Some(threshold) = plateau_threshold {
                        options.plateau_threshold = threshold;
                    }
                    if let Some(budget) = iteration_budget {
                        options.iteration_budget = budget;
                    }
                    options
                }
            };
            run_refinement(options, runner_url, analyzer_url, merger_url).await
        }
        Command::Status {
            state_dir,
            liveness_window_secs,
        } => {
            let statuses = list_model_statuses(&state_dir, liveness_window_secs)?;
            if statuses.is_empty() {
                println!("No runs found under {}", state_dir.display());
                return Ok(());
            }
            for status in statuses {
                let progress = status
                    .lock
                    .as_ref()
                    .and_then(|lock| lock.last_eval_result)
                    .map(|summary| format!("{}/{}", summary.passed, summary.total))
                    .unwrap_or_else(|| "-".to_string());
                let size = status
                    .guideline_bytes
                    .map(|bytes| format!("{bytes}B"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<40} {:<12} {:<12} passing: {:<8} guidelines: {}",
                    format!("{}/{}", status.model, status.provider),
                    status.state.to_string(),
                    status
                        .lock
                        .as_ref()
                        .map(|lock| format!("iter {}", lock.iteration))
                        .unwrap_or_else(|| "-".to_string()),
                    progress,
                    size,
                );
            }
            Ok(())
        }
    }
}

async fn run_refinement(
    options: RunOptions,
    runner_url: String,
    analyzer_url: String,
    merger_url: String,
) -> Result<()> {
    let runner_timeout = Duration::from_secs(options.runner_timeout_secs);
    let analyzer_timeout = Duration::from_secs(options.analyzer_timeout_secs);

    let runner = HttpEvalRunner::new(runner_url, runner_timeout)?;
    let analyzer = HttpFailureAnalyzer::new(analyzer_url, analyzer_timeout)?;
    let guidelines = HttpGuidelineStore::new(merger_url, analyzer_timeout)?;

    info!("waiting for external services to become healthy");
    runner.wait_until_healthy(HEALTH_CHECK_ATTEMPTS).await?;
    analyzer.wait_until_healthy(HEALTH_CHECK_ATTEMPTS).await?;
    guidelines.wait_until_healthy(HEALTH_CHECK_ATTEMPTS).await?;

    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping at the next iteration boundary");
            ctrl_c_stop.trigger();
        }
    });

    let orchestrator = RefinementOrchestrator::new(
        options,
        Arc::new(runner),
        Arc::new(analyzer),
        Arc::new(guidelines),
        stop,
    )?;

    let report = match orchestrator.run().await {
        Ok(report) => report,
        Err(e) => {
            if let Some(LockError::Busy { key, pid, .. }) = e.downcast_ref::<LockError>() {
                eprintln!("Refinement for {key} is already running (pid {pid}).");
                std::process::exit(2);
            }
            return Err(e);
        }
    };

    println!("--- Refinement Finished ---");
    println!("Outcome:    {}", report.outcome.describe());
    println!("Iterations: {}", report.iterations);
    println!(
        "Best:       {} passing (iteration {})",
        report.best_pass_count, report.best_iteration
    );
    if let Some(summary) = report.last_summary {
        println!(
            "Last run:   {}/{} passing, {} failing",
            summary.passed, summary.total, summary.failed
        );
    }
    Ok(())
}
