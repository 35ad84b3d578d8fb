//! File-based mutual exclusion for one (model, provider) run.
//!
//! Exactly one orchestrator holds the lock for a key at a time, across
//! processes. This is cooperative locking on a shared filesystem, not a
//! kernel lock: the liveness window plus a pid probe is the only defense
//! against records orphaned by crashed holders. Every write goes through a
//! temp-file-then-rename swap so a concurrent dashboard reader never
//! observes a partially written record.

use chrono::{DateTime, Utc};
use gref_types::{EvalRunSummary, LockFileStatus, RunOptions, RunPhase};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from lock coordination. `Busy` and `LostOwnership` are signals the
/// orchestrator must branch on; the rest are plumbing failures.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock for {key} is held by live pid {pid}, last updated {updated_at}")]
    Busy {
        key: String,
        pid: u32,
        updated_at: DateTime<Utc>,
    },

    #[error("lock ownership lost: record now names run {holder_run_id} (pid {holder_pid})")]
    LostOwnership {
        holder_run_id: String,
        holder_pid: u32,
    },

    #[error("phase cannot move backward from {from} to {to}")]
    PhaseRegression { from: RunPhase, to: RunPhase },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("lock record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of a successful acquisition.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// No live record existed; a fresh one was created.
    Acquired(LockFileStatus),
    /// An abandoned record was overwritten. The previous record is returned
    /// so the caller can re-hydrate plateau tracking from it.
    Reclaimed {
        record: LockFileStatus,
        previous: LockFileStatus,
    },
}

impl AcquireOutcome {
    pub fn record(&self) -> &LockFileStatus {
        match self {
            Self::Acquired(record) => record,
            Self::Reclaimed { record, .. } => record,
        }
    }
}

/// Fields an update merges into the current record. Unset fields are left
/// unchanged; `updated_at` is always rewritten.
#[derive(Debug, Clone, Default)]
pub struct LockPatch {
    pub phase: Option<RunPhase>,
    pub iteration: Option<u32>,
    pub last_eval_result: Option<EvalRunSummary>,
    pub current_action: Option<String>,
    pub best_pass_count: Option<usize>,
    pub best_iteration: Option<u32>,
    pub stable_iterations: Option<u32>,
}

impl LockPatch {
    pub fn action(message: impl Into<String>) -> Self {
        Self {
            current_action: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase: RunPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_last_eval_result(mut self, summary: EvalRunSummary) -> Self {
        self.last_eval_result = Some(summary);
        self
    }

    pub fn with_plateau(
        mut self,
        best_pass_count: usize,
        best_iteration: u32,
        stable_iterations: u32,
    ) -> Self {
        self.best_pass_count = Some(best_pass_count);
        self.best_iteration = Some(best_iteration);
        self.stable_iterations = Some(stable_iterations);
        self
    }
}

/// Grants one active orchestrator per (model, provider) key and persists
/// liveness and progress for external observability.
pub struct LockCoordinator {
    path: PathBuf,
    key: String,
    run_id: String,
    pid: u32,
    liveness_window_secs: u64,
}

impl LockCoordinator {
    pub fn new(options: &RunOptions) -> Self {
        Self {
            path: options.lock_path(),
            key: options.model_key(),
            run_id: options.run_id.clone(),
            pid: std::process::id(),
            liveness_window_secs: options.liveness_window_secs,
        }
    }

    /// Acquire the lock for this run.
    ///
    /// Fails with `Busy` when a live holder exists; overwrites abandoned
    /// records (dead holder, or silent past the liveness window) and reports
    /// the reclaim. A record in phase `Complete` is finished business and is
    /// replaced without being treated as a reclaim.
    pub fn acquire(&self, options: &RunOptions) -> Result<AcquireOutcome, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let existing = match read_lock_record(&self.path)? {
            None => {
                let record = LockFileStatus::new(options, self.pid);
                self.write_record(&record)?;
                info!(key = %self.key, run_id = %self.run_id, "acquired lock");
                return Ok(AcquireOutcome::Acquired(record));
            }
            Some(existing) => existing,
        };

        if existing.phase != RunPhase::Complete {
            let holder_alive = pid_alive(existing.pid);
            let within_window = existing.age_secs(Utc::now()) <= self.liveness_window_secs;
            if holder_alive && within_window {
                return Err(LockError::Busy {
                    key: self.key.clone(),
                    pid: existing.pid,
                    updated_at: existing.updated_at,
                });
            }

            let mut record = LockFileStatus::new(options, self.pid);
            record.reclaimed_from = Some(existing.run_id.clone());
            self.write_record(&record)?;
            warn!(
                key = %self.key,
                abandoned_run = %existing.run_id,
                abandoned_pid = existing.pid,
                holder_alive,
                "reclaimed abandoned lock"
            );
            return Ok(AcquireOutcome::Reclaimed {
                record,
                previous: existing,
            });
        }

        let record = LockFileStatus::new(options, self.pid);
        self.write_record(&record)?;
        info!(key = %self.key, run_id = %self.run_id, "acquired lock over completed run");
        Ok(AcquireOutcome::Acquired(record))
    }

    /// Merge `patch` into the current record and rewrite `updated_at`.
    ///
    /// Fails with `LostOwnership` when the on-disk record no longer names
    /// this holder, which the orchestrator must treat as fatal.
    pub fn update(&self, patch: LockPatch) -> Result<LockFileStatus, LockError> {
        let mut record = self.owned_record()?;

        if let Some(phase) = patch.phase {
            if !record.phase.can_advance_to(phase) {
                return Err(LockError::PhaseRegression {
                    from: record.phase,
                    to: phase,
                });
            }
            if record.phase != phase {
                debug!(key = %self.key, from = %record.phase, to = %phase, "phase transition");
            }
            record.phase = phase;
        }
        if let Some(iteration) = patch.iteration {
            record.iteration = iteration;
        }
        if let Some(summary) = patch.last_eval_result {
            record.last_eval_result = Some(summary);
        }
        if let Some(action) = patch.current_action {
            record.current_action = action;
        }
        if let Some(best) = patch.best_pass_count {
            record.best_pass_count = best;
        }
        if let Some(best_iteration) = patch.best_iteration {
            record.best_iteration = best_iteration;
        }
        if let Some(stable) = patch.stable_iterations {
            record.stable_iterations = stable;
        }
        record.updated_at = Utc::now();

        self.write_record(&record)?;
        Ok(record)
    }

    /// Mark the run complete. The record is left behind for post-mortem
    /// inspection, never deleted.
    pub fn release(&self) -> Result<LockFileStatus, LockError> {
        let record =
            self.update(LockPatch::action("run complete").with_phase(RunPhase::Complete))?;
        info!(key = %self.key, run_id = %self.run_id, "released lock");
        Ok(record)
    }

    fn owned_record(&self) -> Result<LockFileStatus, LockError> {
        let record = read_lock_record(&self.path)?.ok_or_else(|| LockError::LostOwnership {
            holder_run_id: "<missing>".to_string(),
            holder_pid: 0,
        })?;
        if record.run_id != self.run_id || record.pid != self.pid {
            return Err(LockError::LostOwnership {
                holder_run_id: record.run_id,
                holder_pid: record.pid,
            });
        }
        Ok(record)
    }

    fn write_record(&self, record: &LockFileStatus) -> Result<(), LockError> {
        atomic_write_json(&self.path, record)
    }
}

/// Read a lock record, treating a missing or unparseable file as absent.
/// A half-written record cannot occur (writes are atomic), so garbage here
/// means an operator or foreign tool touched the file.
pub fn read_lock_record(path: &Path) -> Result<Option<LockFileStatus>, LockError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable lock record");
            Ok(None)
        }
    }
}

/// Serialize `value` next to `path` and swap it into place, so readers see
/// either the old record or the new one, never a torn write.
pub(crate) fn atomic_write_json<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), LockError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.persist(path).map_err(|e| LockError::Io(e.error))?;
    Ok(())
}

/// Probe whether a process id is alive. Signal 0 performs the existence
/// check without delivering anything; EPERM still means the pid exists.
pub(crate) fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
