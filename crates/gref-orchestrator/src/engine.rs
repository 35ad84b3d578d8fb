//! The refinement control loop.
//!
//! One orchestrator instance is a single sequential loop. The only internal
//! parallelism is the scatter/gather of the N suite repetitions, which share
//! no mutable state and are merged behind an explicit join barrier. All
//! cross-process coordination goes through the lock and checkpoint files.

use anyhow::{anyhow, Context, Result};
use gref_lib::adapters::{
    AnalysisRequest, EvalRunRequest, EvalSuiteRunner, FailureAnalyzer, GuidelineStore,
};
use gref_lib::checkpoint::CheckpointStore;
use gref_lib::lock::{AcquireOutcome, LockCoordinator, LockPatch};
use gref_lib::run_log::RunLog;
use gref_lib::stability::classify;
use gref_types::{
    CheckpointData, EvalResult, EvalRunResult, EvalRunSummary, EvalStability, GuidelineEdit,
    RunOptions, RunPhase,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::signal::StopSignal;

const ANALYZER_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Why a run terminated. The causes are reported distinguishably, per the
/// audit requirements on the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every eval passed deterministically: zero failures, zero flaky.
    FullPass,
    /// No improvement for the configured number of consecutive iterations.
    Plateaued { stable_iterations: u32 },
    /// The iteration budget ran out first.
    BudgetExhausted { iterations: u32 },
    /// An external stop signal was honored at an iteration boundary.
    Stopped,
}

impl RunOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::FullPass => "full pass: every eval deterministically passing".to_string(),
            Self::Plateaued { stable_iterations } => {
                format!("plateau: {stable_iterations} consecutive iterations without improvement")
            }
            Self::BudgetExhausted { iterations } => {
                format!("iteration budget exhausted after {iterations} iterations")
            }
            Self::Stopped => "stopped by external signal".to_string(),
        }
    }
}

/// Final report for one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Iteration counter at termination, checkpoint-resumed runs included.
    pub iterations: u32,
    pub best_pass_count: usize,
    pub best_iteration: u32,
    /// Counts of the last completed suite execution, baseline included.
    pub last_summary: Option<EvalRunSummary>,
}

/// In-memory plateau bookkeeping, mirrored into the lock record every
/// iteration and re-hydrated from checkpoint plus lock record on resume.
struct PlateauTracker {
    best_pass_count: usize,
    best_iteration: u32,
    stable_iterations: u32,
}

impl PlateauTracker {
    fn improved(&mut self, checkpoint: &CheckpointData) {
        self.best_pass_count = checkpoint.pass_count;
        self.best_iteration = checkpoint.iteration;
        self.stable_iterations = 0;
    }
}

enum IterationVerdict {
    Completed {
        summary: EvalRunSummary,
        flaky_count: usize,
    },
    /// The suite could not be executed; the iteration still counts toward
    /// the budget.
    Failed,
}

/// Drives startup -> construction -> refinement -> complete for one
/// (model, provider) key.
pub struct RefinementOrchestrator {
    options: RunOptions,
    lock: LockCoordinator,
    checkpoints: CheckpointStore,
    runner: Arc<dyn EvalSuiteRunner>,
    analyzer: Arc<dyn FailureAnalyzer>,
    guidelines: Arc<dyn GuidelineStore>,
    stop: StopSignal,
    run_log: RunLog,
}

impl RefinementOrchestrator {
    pub fn new(
        options: RunOptions,
        runner: Arc<dyn EvalSuiteRunner>,
        analyzer: Arc<dyn FailureAnalyzer>,
        guidelines: Arc<dyn GuidelineStore>,
        stop: StopSignal,
    ) -> Result<Self> {
        let lock = LockCoordinator::new(&options);
        let checkpoints = CheckpointStore::open(options.checkpoint_path())?;
        let run_log = RunLog::create(options.run_log_path())?;
        Ok(Self {
            options,
            lock,
            checkpoints,
            runner,
            analyzer,
            guidelines,
            stop,
            run_log,
        })
    }

    /// Run to termination.
    ///
    /// Fails fast with `LockError::Busy` (inside the returned error) when a
    /// live holder owns the key. Fatal conditions (checkpoint write failure,
    /// merge failure, lost lock ownership) abort without releasing; the last
    /// durable checkpoint remains the source of truth and the abandoned lock
    /// record is left for the next invocation to reclaim.
    #[instrument(
        skip(self),
        fields(
            model = %self.options.model,
            provider = %self.options.provider,
            run_id = %self.options.run_id,
        )
    )]
    pub async fn run(mut self) -> Result<RunReport> {
        // -- startup -----------------------------------------------------
        let acquired = self.lock.acquire(&self.options)?;
        let mut tracker = self.hydrate(&acquired)?;
        let mut iteration = self
            .checkpoints
            .load_latest()?
            .map(|c| c.iteration)
            .unwrap_or(0);
        if let AcquireOutcome::Reclaimed { previous, .. } = &acquired {
            self.run_log.event(
                "reclaim",
                &format!(
                    "reclaimed abandoned run {} (pid {})",
                    previous.run_id, previous.pid
                ),
            );
        }
        self.run_log.event("phase", "startup");
        info!(
            iteration,
            best_pass_count = tracker.best_pass_count,
            stable_iterations = tracker.stable_iterations,
            "startup complete"
        );

        // -- construction: establish the baseline ------------------------
        self.lock.update(
            LockPatch::action("establishing baseline").with_phase(RunPhase::Construction),
        )?;
        self.run_log.event("phase", "construction");
        let baseline = self
            .run_suite_once()
            .await
            .context("baseline suite execution failed")?;
        self.checkpoints.record_baseline(baseline.passed);
        if baseline.passed > tracker.best_pass_count {
            tracker.best_pass_count = baseline.passed;
            tracker.best_iteration = iteration;
        }
        let mut last_summary = Some(baseline.summary());
        self.lock.update(
            LockPatch::action(format!(
                "baseline: {}/{} passing",
                baseline.passed, baseline.total
            ))
            .with_phase(RunPhase::Refinement)
            .with_last_eval_result(baseline.summary())
            .with_plateau(
                tracker.best_pass_count,
                tracker.best_iteration,
                tracker.stable_iterations,
            ),
        )?;
        self.run_log.event(
            "phase",
            &format!(
                "refinement (baseline {}/{})",
                baseline.passed, baseline.total
            ),
        );

        // -- refinement --------------------------------------------------
        let outcome = loop {
            if self.stop.is_triggered() {
                info!("stop signal observed at iteration boundary");
                break RunOutcome::Stopped;
            }
            if iteration >= self.options.iteration_budget {
                break RunOutcome::BudgetExhausted {
                    iterations: iteration,
                };
            }
            iteration += 1;

            match self.run_iteration(iteration, &mut tracker).await? {
                IterationVerdict::Completed {
                    summary,
                    flaky_count,
                } => {
                    last_summary = Some(summary);
                    if summary.failed == 0 && flaky_count == 0 {
                        break RunOutcome::FullPass;
                    }
                    if tracker.stable_iterations >= self.options.plateau_threshold {
                        break RunOutcome::Plateaued {
                            stable_iterations: tracker.stable_iterations,
                        };
                    }
                }
                IterationVerdict::Failed => {}
            }
        };

        // -- complete ----------------------------------------------------
        self.lock.release()?;
        self.run_log.event("phase", "complete");
        self.run_log.event("outcome", &outcome.describe());
        info!(outcome = %outcome.describe(), iteration, "run complete");

        Ok(RunReport {
            outcome,
            iterations: iteration,
            best_pass_count: tracker.best_pass_count,
            best_iteration: tracker.best_iteration,
            last_summary,
        })
    }

    /// One refinement iteration: gather repetitions, classify, analyze the
    /// deterministic failures, merge, verify, checkpoint, publish.
    async fn run_iteration(
        &mut self,
        iteration: u32,
        tracker: &mut PlateauTracker,
    ) -> Result<IterationVerdict> {
        info!(iteration, "starting refinement iteration");
        self.lock.update(
            LockPatch::action(format!(
                "iteration {iteration}: gathering {} repetitions",
                self.options.repetitions
            ))
            .with_iteration(iteration),
        )?;

        let runs = match self.gather_repetitions().await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(iteration, error = %format!("{e:#}"), "suite repetitions failed");
                self.run_log
                    .event("iteration-failed", &format!("iteration {iteration}: {e:#}"));
                return Ok(IterationVerdict::Failed);
            }
        };

        let stabilities = classify(&runs, self.options.repetitions);
        let mut flaky: Vec<&str> = stabilities
            .values()
            .filter(|s| s.is_flaky())
            .map(|s| s.eval_name.as_str())
            .collect();
        flaky.sort_unstable();
        for name in &flaky {
            self.run_log.event(
                "flaky",
                &format!("{name}: unstable across repetitions, recorded but not acted on"),
            );
        }

        let mut failing: Vec<&EvalStability> = stabilities
            .values()
            .filter(|s| s.is_consistently_failing())
            .collect();
        failing.sort_by(|a, b| a.eval_name.cmp(&b.eval_name));
        debug!(
            iteration,
            failing = failing.len(),
            flaky = flaky.len(),
            "stability classified"
        );

        let edits = self.collect_edits(iteration, &runs, &failing).await?;
        if !edits.is_empty() {
            // A failed merge is fatal: the document must never be left in a
            // partially edited state, and the adapter owns that atomicity.
            let merged = self
                .guidelines
                .apply_edits(&edits)
                .await
                .context("guideline merge failed")?;
            self.run_log.event(
                "merge",
                &format!(
                    "iteration {iteration}: applied {} edits; document has {} entries ({} bytes)",
                    edits.len(),
                    merged.entries,
                    merged.approx_bytes
                ),
            );
        }

        let post = match self.run_suite_once().await {
            Ok(run) => run,
            Err(e) => {
                warn!(iteration, error = %format!("{e:#}"), "post-edit verification run failed");
                self.run_log
                    .event("iteration-failed", &format!("iteration {iteration}: {e:#}"));
                return Ok(IterationVerdict::Failed);
            }
        };

        match self.checkpoints.maybe_checkpoint(post.summary(), iteration)? {
            Some(checkpoint) => {
                tracker.improved(&checkpoint);
                self.run_log.event(
                    "checkpoint",
                    &format!(
                        "iteration {iteration}: {}/{} passing",
                        checkpoint.pass_count,
                        checkpoint.pass_count + checkpoint.fail_count
                    ),
                );
            }
            None => tracker.stable_iterations += 1,
        }

        self.lock.update(
            LockPatch::action(format!(
                "iteration {iteration} complete: {}/{} passing",
                post.passed, post.total
            ))
            .with_iteration(iteration)
            .with_last_eval_result(post.summary())
            .with_plateau(
                tracker.best_pass_count,
                tracker.best_iteration,
                tracker.stable_iterations,
            ),
        )?;

        Ok(IterationVerdict::Completed {
            summary: post.summary(),
            flaky_count: flaky.len(),
        })
    }

    /// Analyze each consistently-failing eval. A failure after bounded
    /// retries skips that eval for this iteration; its guideline text is
    /// left unchanged and the loop continues.
    async fn collect_edits(
        &self,
        iteration: u32,
        runs: &[EvalRunResult],
        failing: &[&EvalStability],
    ) -> Result<Vec<GuidelineEdit>> {
        if failing.is_empty() {
            return Ok(vec![]);
        }

        let document = match self.guidelines.document().await {
            Ok(document) => Some(document),
            Err(e) => {
                debug!(error = %format!("{e:#}"), "guideline document unavailable for validation");
                None
            }
        };

        let mut edits = Vec::new();
        for stability in failing {
            let Some(eval) = latest_result_for(runs, &stability.eval_name) else {
                continue;
            };
            let request = AnalysisRequest {
                run_id: self.options.run_id.clone(),
                eval: eval.clone(),
                diff: file_set_diff(eval),
            };
            match self.analyze_with_retry(&request).await {
                Ok(analysis) => {
                    info!(
                        eval = %stability.eval_name,
                        confidence = %analysis.confidence,
                        "analysis received"
                    );
                    if let Some(document) = &document {
                        if document
                            .find_section(&analysis.suggested_edit.section)
                            .is_none()
                        {
                            self.run_log.event(
                                "merge",
                                &format!(
                                    "{}: edit targets new section {}",
                                    stability.eval_name, analysis.suggested_edit.section
                                ),
                            );
                        }
                    }
                    edits.push(analysis.suggested_edit);
                }
                Err(e) => {
                    warn!(
                        eval = %stability.eval_name,
                        error = %format!("{e:#}"),
                        "analyzer failed, skipping eval this iteration"
                    );
                    self.run_log.event(
                        "skip",
                        &format!(
                            "iteration {iteration}: {}: analyzer failed after {} attempts: {e:#}",
                            stability.eval_name, self.options.analyzer_attempts
                        ),
                    );
                }
            }
        }
        Ok(edits)
    }

    async fn analyze_with_retry(
        &self,
        request: &AnalysisRequest,
    ) -> Result<gref_types::FailureAnalysis> {
        let deadline = Duration::from_secs(self.options.analyzer_timeout_secs);
        crate::retry::retry_with_backoff(
            self.options.analyzer_attempts,
            ANALYZER_INITIAL_BACKOFF,
            || {
                let analyzer = Arc::clone(&self.analyzer);
                let request = request.clone();
                async move {
                    match tokio::time::timeout(deadline, analyzer.analyze(&request)).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow!(
                            "analyzer call timed out after {}s",
                            deadline.as_secs()
                        )),
                    }
                }
            },
        )
        .await
    }

    /// Scatter the N repetitions as independent tasks and join them all
    /// before touching the results.
    async fn gather_repetitions(&self) -> Result<Vec<EvalRunResult>> {
        let mut tasks = JoinSet::new();
        for repetition in 0..self.options.repetitions {
            let runner = Arc::clone(&self.runner);
            let request = self.run_request(repetition);
            let timeout_secs = self.options.runner_timeout_secs;
            tasks.spawn(async move { run_suite_with_retry(runner, request, timeout_secs).await });
        }

        let mut runs = Vec::with_capacity(self.options.repetitions);
        while let Some(joined) = tasks.join_next().await {
            runs.push(joined.context("repetition task panicked")??);
        }
        Ok(runs)
    }

    async fn run_suite_once(&self) -> Result<EvalRunResult> {
        run_suite_with_retry(
            Arc::clone(&self.runner),
            self.run_request(0),
            self.options.runner_timeout_secs,
        )
        .await
    }

    fn run_request(&self, repetition: usize) -> EvalRunRequest {
        EvalRunRequest {
            run_id: self.options.run_id.clone(),
            guideline_path: self.options.guideline_path.clone(),
            filter: self.options.filter.clone(),
            repetition,
        }
    }

    fn hydrate(&self, acquired: &AcquireOutcome) -> Result<PlateauTracker> {
        let checkpoint = self.checkpoints.load_latest()?;
        let mut tracker = PlateauTracker {
            best_pass_count: checkpoint.as_ref().map(|c| c.pass_count).unwrap_or(0),
            best_iteration: checkpoint.as_ref().map(|c| c.iteration).unwrap_or(0),
            stable_iterations: 0,
        };
        if let AcquireOutcome::Reclaimed { previous, .. } = acquired {
            tracker.stable_iterations = previous.stable_iterations;
            if previous.best_pass_count > tracker.best_pass_count {
                tracker.best_pass_count = previous.best_pass_count;
                tracker.best_iteration = previous.best_iteration;
            }
        }
        Ok(tracker)
    }
}

/// Execute the suite once, retrying a crashed invocation a single time
/// before giving up on the repetition.
async fn run_suite_with_retry(
    runner: Arc<dyn EvalSuiteRunner>,
    request: EvalRunRequest,
    timeout_secs: u64,
) -> Result<EvalRunResult> {
    let deadline = Duration::from_secs(timeout_secs);
    match run_suite_attempt(&runner, &request, deadline).await {
        Ok(run) => Ok(run),
        Err(e) => {
            warn!(
                repetition = request.repetition,
                error = %format!("{e:#}"),
                "suite execution failed, retrying once"
            );
            run_suite_attempt(&runner, &request, deadline).await
        }
    }
}

async fn run_suite_attempt(
    runner: &Arc<dyn EvalSuiteRunner>,
    request: &EvalRunRequest,
    deadline: Duration,
) -> Result<EvalRunResult> {
    match tokio::time::timeout(deadline, runner.run_suite(request)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "suite execution timed out after {}s",
            deadline.as_secs()
        )),
    }
}

/// Most recent recorded result for an eval across the gathered repetitions.
fn latest_result_for<'a>(runs: &'a [EvalRunResult], eval_name: &str) -> Option<&'a EvalResult> {
    runs.iter()
        .rev()
        .flat_map(|run| run.results.iter())
        .find(|result| result.eval_name == eval_name)
}

/// Expected-versus-produced file summary handed to the analyzer.
fn file_set_diff(eval: &EvalResult) -> String {
    let expected: BTreeSet<_> = eval.expected_files.iter().collect();
    let produced: BTreeSet<_> = eval.produced_files.iter().collect();
    let missing: Vec<String> = expected
        .difference(&produced)
        .map(|p| p.display().to_string())
        .collect();
    let unexpected: Vec<String> = produced
        .difference(&expected)
        .map(|p| p.display().to_string())
        .collect();
    format!(
        "missing: [{}]\nunexpected: [{}]",
        missing.join(", "),
        unexpected.join(", ")
    )
}
