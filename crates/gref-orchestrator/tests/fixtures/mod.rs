//! Scripted adapters shared by the orchestrator integration tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gref_lib::adapters::{
    AnalysisRequest, EvalRunRequest, EvalSuiteRunner, FailureAnalyzer, GuidelineStore,
};
use gref_types::{
    Confidence, EditOp, EvalResult, EvalRunResult, FailureAnalysis, Guideline, GuidelineEdit,
    GuidelineNode, GuidelineRef, GuidelineSection, LockFileStatus, RunOptions,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A pid far above any default Linux pid ceiling, guaranteed dead.
pub const DEAD_PID: u32 = 999_999_999;

/// Options pointed at a fresh temp directory, tuned small for tests.
pub fn test_options(dir: &TempDir) -> RunOptions {
    let mut options = RunOptions::new(
        "model-x",
        "provider-y",
        dir.path().join("guidelines.md"),
        dir.path().join("state"),
    );
    options.repetitions = 1;
    options.plateau_threshold = 2;
    options.iteration_budget = 5;
    options.analyzer_attempts = 2;
    options.runner_timeout_secs = 5;
    options.analyzer_timeout_secs = 5;
    options
}

/// A suite execution with the given per-eval outcomes.
pub fn suite(evals: &[(&str, bool)]) -> EvalRunResult {
    EvalRunResult::from_results(
        evals
            .iter()
            .map(|(name, passed)| EvalResult::new(*name, *passed))
            .collect(),
    )
}

/// A suite of `total` evals named `suite/eval-NN`, the first `passing` of
/// which pass.
pub fn uniform(total: usize, passing: usize) -> EvalRunResult {
    EvalRunResult::from_results(
        (0..total)
            .map(|i| EvalResult::new(format!("suite/eval-{i:02}"), i < passing))
            .collect(),
    )
}

/// Runner serving a pre-scripted sequence of suite outcomes in call order,
/// repeating the last entry once the script runs dry.
pub struct ScriptedRunner {
    script: Vec<Result<EvalRunResult, String>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Result<EvalRunResult, String>>) -> Arc<Self> {
        assert!(!script.is_empty(), "script must not be empty");
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn passing(script: Vec<EvalRunResult>) -> Arc<Self> {
        Self::new(script.into_iter().map(Ok).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvalSuiteRunner for ScriptedRunner {
    async fn run_suite(&self, _request: &EvalRunRequest) -> Result<EvalRunResult> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .expect("script must not be empty");
        entry.clone().map_err(|e| anyhow!(e))
    }
}

/// Analyzer that either suggests one canned edit per call or always fails,
/// recording which evals it was asked about.
pub struct ScriptedAnalyzer {
    fail: bool,
    analyzed: Mutex<Vec<String>>,
}

impl ScriptedAnalyzer {
    pub fn suggesting() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            analyzed: Mutex::new(vec![]),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            analyzed: Mutex::new(vec![]),
        })
    }

    pub fn analyzed(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }
}

#[async_trait]
impl FailureAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<FailureAnalysis> {
        self.analyzed
            .lock()
            .unwrap()
            .push(request.eval.eval_name.clone());
        if self.fail {
            return Err(anyhow!("analyzer backend unavailable"));
        }
        Ok(FailureAnalysis {
            eval_name: request.eval.eval_name.clone(),
            analysis: "the answer omitted a return validator".to_string(),
            suggested_edit: GuidelineEdit {
                section: "function_guidelines/validators".to_string(),
                op: EditOp::Append,
                content: format!(
                    "Always include a return validator (seen failing in {}).",
                    request.eval.eval_name
                ),
            },
            confidence: Confidence::High,
            related_entries: vec![],
        })
    }
}

/// Guideline store that records every applied batch. Optionally clobbers the
/// lock record on apply, simulating a foreign reclaim mid-run.
pub struct RecordingGuidelines {
    applied: Mutex<Vec<Vec<GuidelineEdit>>>,
    clobber: Option<(PathBuf, LockFileStatus)>,
}

impl RecordingGuidelines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(vec![]),
            clobber: None,
        })
    }

    pub fn clobbering_lock(lock_path: PathBuf, foreign: LockFileStatus) -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(vec![]),
            clobber: Some((lock_path, foreign)),
        })
    }

    pub fn applied(&self) -> Vec<Vec<GuidelineEdit>> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuidelineStore for RecordingGuidelines {
    async fn document(&self) -> Result<GuidelineSection> {
        Ok(GuidelineSection::new(
            "convex_guidelines",
            vec![GuidelineNode::Section(GuidelineSection::new(
                "function_guidelines",
                vec![GuidelineNode::Section(GuidelineSection::new(
                    "validators",
                    vec![GuidelineNode::Entry(Guideline::new(
                        "Always include argument validators.",
                    ))],
                ))],
            ))],
        ))
    }

    async fn apply_edits(&self, edits: &[GuidelineEdit]) -> Result<GuidelineRef> {
        self.applied.lock().unwrap().push(edits.to_vec());
        if let Some((lock_path, foreign)) = &self.clobber {
            std::fs::write(lock_path, serde_json::to_string_pretty(foreign).unwrap()).unwrap();
        }
        Ok(GuidelineRef {
            path: PathBuf::from("guidelines.md"),
            entries: 1 + edits.len(),
            approx_bytes: 1024,
        })
    }
}
