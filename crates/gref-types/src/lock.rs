//! On-disk coordination record for one (model, provider) run.

use crate::eval::EvalRunSummary;
use crate::options::RunOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::Display;

/// Phase of an orchestrator run.
///
/// Advances forward only in the sequence
/// startup -> construction -> refinement -> complete; a reclaimed run is the
/// one exception, restarting from `Construction` under a fresh record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunPhase {
    Startup,
    Construction,
    Refinement,
    Complete,
}

impl RunPhase {
    fn rank(self) -> u8 {
        match self {
            Self::Startup => 0,
            Self::Construction => 1,
            Self::Refinement => 2,
            Self::Complete => 3,
        }
    }

    /// Forward-only ordering check.
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        next.rank() >= self.rank()
    }
}

/// Process-wide coordination record for one (model, provider) run.
///
/// One live instance per key; rewritten atomically on every update so a
/// concurrent dashboard reader never observes a torn record. The plateau
/// fields were added after the first records shipped, so readers default them
/// when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockFileStatus {
    pub run_id: String,
    /// Holder process id, probed for liveness on reclaim.
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub phase: RunPhase,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_eval_result: Option<EvalRunSummary>,
    /// Free-text description of what the holder is doing right now.
    pub current_action: String,
    pub updated_at: DateTime<Utc>,
    /// Best pass count seen across the run.
    #[serde(default)]
    pub best_pass_count: usize,
    /// Iteration at which the best pass count was seen.
    #[serde(default)]
    pub best_iteration: u32,
    /// Consecutive iterations without improvement.
    #[serde(default)]
    pub stable_iterations: u32,
    /// Run id of the abandoned record this one reclaimed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaimed_from: Option<String>,
    /// Guideline document this run refines; lets dashboards estimate size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guideline_path: Option<PathBuf>,
}

impl LockFileStatus {
    /// Fresh record for a newly acquired run, in phase `Startup`.
    pub fn new(options: &RunOptions, pid: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id: options.run_id.clone(),
            pid,
            started_at: now,
            phase: RunPhase::Startup,
            iteration: 0,
            last_eval_result: None,
            current_action: "starting up".to_string(),
            updated_at: now,
            best_pass_count: 0,
            best_iteration: 0,
            stable_iterations: 0,
            reclaimed_from: None,
            guideline_path: Some(options.guideline_path.clone()),
        }
    }

    /// Age of the record relative to `now`, in whole seconds. Saturates to
    /// zero when a reader's clock lags the writer's.
    pub fn age_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.updated_at).num_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_advance_forward() {
        assert!(RunPhase::Startup.can_advance_to(RunPhase::Construction));
        assert!(RunPhase::Construction.can_advance_to(RunPhase::Refinement));
        assert!(RunPhase::Refinement.can_advance_to(RunPhase::Refinement));
        assert!(!RunPhase::Refinement.can_advance_to(RunPhase::Construction));
        assert!(!RunPhase::Complete.can_advance_to(RunPhase::Refinement));
    }

    #[test]
    fn plateau_fields_default_when_absent() {
        // A record written before plateau tracking shipped.
        let value = serde_json::json!({
            "runId": "run-1",
            "pid": 4242,
            "startedAt": "2025-11-02T10:00:00Z",
            "phase": "refinement",
            "iteration": 7,
            "currentAction": "running suite",
            "updatedAt": "2025-11-02T10:05:00Z",
        });
        let record: LockFileStatus = serde_json::from_value(value).unwrap();
        assert_eq!(record.best_pass_count, 0);
        assert_eq!(record.best_iteration, 0);
        assert_eq!(record.stable_iterations, 0);
        assert!(record.reclaimed_from.is_none());
        assert!(record.last_eval_result.is_none());
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(RunPhase::Construction).unwrap(),
            serde_json::json!("construction")
        );
        assert_eq!(RunPhase::Complete.to_string(), "complete");
    }
}
