//! Durable best-so-far checkpointing.
//!
//! The store owns the checkpoint file for one (model, provider) key and
//! exposes only the latest snapshot. A checkpoint is written only when the
//! pass count strictly improves, so the persisted sequence is non-decreasing
//! across the lifetime of a run, process restarts included.

use anyhow::{Context, Result};
use chrono::Utc;
use gref_types::{CheckpointData, EvalRunSummary};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::lock::atomic_write_json;

pub struct CheckpointStore {
    path: PathBuf,
    best_pass_count: Option<usize>,
}

impl CheckpointStore {
    /// Open a store, re-hydrating the best-seen pass count from the latest
    /// checkpoint so monotonicity survives a crash and restart.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let latest = load_checkpoint(&path)?;
        if let Some(checkpoint) = &latest {
            debug!(
                pass_count = checkpoint.pass_count,
                iteration = checkpoint.iteration,
                "re-hydrated checkpoint store"
            );
        }
        Ok(Self {
            best_pass_count: latest.map(|c| c.pass_count),
            path,
        })
    }

    /// The most recent checkpoint, if any was ever written for this key.
    pub fn load_latest(&self) -> Result<Option<CheckpointData>> {
        load_checkpoint(&self.path)
    }

    pub fn best_pass_count(&self) -> Option<usize> {
        self.best_pass_count
    }

    /// Seed the best-seen count from a baseline run without writing a
    /// checkpoint. An earlier re-hydrated best is kept when it is higher.
    pub fn record_baseline(&mut self, pass_count: usize) {
        if self.best_pass_count.map_or(true, |best| pass_count > best) {
            self.best_pass_count = Some(pass_count);
        }
    }

    /// Write a checkpoint iff `current` strictly improves on the best pass
    /// count recorded so far in this run.
    ///
    /// Returns the written checkpoint, or `None` when the caller should
    /// count this iteration toward its plateau instead. A write failure is
    /// fatal to the run; the previous checkpoint on disk stays authoritative.
    pub fn maybe_checkpoint(
        &mut self,
        current: EvalRunSummary,
        iteration: u32,
    ) -> Result<Option<CheckpointData>> {
        if let Some(best) = self.best_pass_count {
            if current.passed <= best {
                debug!(
                    passed = current.passed,
                    best, iteration, "no improvement, checkpoint skipped"
                );
                return Ok(None);
            }
        }

        let checkpoint = CheckpointData {
            pass_count: current.passed,
            fail_count: current.failed,
            iteration,
            timestamp: Utc::now(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create checkpoint dir: {parent:?}"))?;
        }
        atomic_write_json(&self.path, &checkpoint)
            .with_context(|| format!("failed to write checkpoint: {:?}", self.path))?;
        self.best_pass_count = Some(checkpoint.pass_count);
        info!(
            pass_count = checkpoint.pass_count,
            fail_count = checkpoint.fail_count,
            iteration,
            "checkpoint written"
        );
        Ok(Some(checkpoint))
    }
}

fn load_checkpoint(path: &Path) -> Result<Option<CheckpointData>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read checkpoint: {path:?}"));
        }
    };
    let checkpoint = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse checkpoint: {path:?}"))?;
    Ok(Some(checkpoint))
}
