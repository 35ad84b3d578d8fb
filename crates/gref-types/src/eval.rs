//! Eval outcome types produced by the eval runner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of one eval for one suite execution.
///
/// Produced by the eval runner; consumed read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvalResult {
    /// Composite eval name, `category/name`.
    pub eval_name: String,
    /// Whether the grader accepted the produced output.
    pub passed: bool,
    /// Files the answer was expected to produce.
    pub expected_files: Vec<PathBuf>,
    /// Files actually produced by the candidate.
    pub produced_files: Vec<PathBuf>,
    /// Execution log for this eval.
    pub log_path: PathBuf,
    /// The task description the eval was generated from.
    pub task_path: PathBuf,
}

impl EvalResult {
    /// Minimal result with no recorded artifacts.
    pub fn new(eval_name: impl Into<String>, passed: bool) -> Self {
        Self {
            eval_name: eval_name.into(),
            passed,
            expected_files: Vec::new(),
            produced_files: Vec::new(),
            log_path: PathBuf::new(),
            task_path: PathBuf::new(),
        }
    }
}

/// Aggregate over one full suite execution.
///
/// Invariants: `passed + failed == total` and `total == results.len()`.
/// One instance per runner invocation; ephemeral, folded into stability and
/// checkpoint data rather than persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvalRunResult {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    /// Per-eval outcomes in runner order.
    pub results: Vec<EvalResult>,
}

impl EvalRunResult {
    /// Aggregate per-eval outcomes, deriving the counts.
    pub fn from_results(results: Vec<EvalResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            passed,
            failed: results.len() - passed,
            total: results.len(),
            results,
        }
    }

    /// Every eval in the suite passed.
    pub fn is_full_pass(&self) -> bool {
        self.failed == 0
    }

    /// The counts alone, as recorded in the lock record.
    pub fn summary(&self) -> EvalRunSummary {
        EvalRunSummary {
            passed: self.passed,
            failed: self.failed,
            total: self.total,
        }
    }
}

/// Pass/fail counts of the most recent suite execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvalRunSummary {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_derived_from_results() {
        let run = EvalRunResult::from_results(vec![
            EvalResult::new("fundamentals/crud", true),
            EvalResult::new("fundamentals/http_actions", false),
            EvalResult::new("data_modeling/simple_schema", true),
        ]);
        assert_eq!(run.passed, 2);
        assert_eq!(run.failed, 1);
        assert_eq!(run.total, 3);
        assert_eq!(run.passed + run.failed, run.total);
        assert_eq!(run.total, run.results.len());
        assert!(!run.is_full_pass());
    }

    #[test]
    fn empty_suite_is_a_full_pass() {
        let run = EvalRunResult::from_results(vec![]);
        assert_eq!(run.total, 0);
        assert!(run.is_full_pass());
    }
}
