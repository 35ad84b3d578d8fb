//! Read-only status queries over the shared state directory.
//!
//! Dashboards and tooling compose `ModelStatus` from the lock record and the
//! guideline file; there is no write path here.

use anyhow::{Context, Result};
use gref_types::{split_model_key, ModelStatus};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::lock::{pid_alive, read_lock_record};

/// Status for one (model, provider) key.
pub fn read_model_status(
    state_dir: &Path,
    model: &str,
    provider: &str,
    liveness_window_secs: u64,
) -> Result<ModelStatus> {
    let key = format!("{model}__{provider}");
    let lock_path = state_dir.join("locks").join(format!("{key}.json"));
    status_from_lock_path(&lock_path, model, provider, liveness_window_secs)
}

/// Statuses for every key with a lock record under `state_dir`, sorted by
/// model then provider.
pub fn list_model_statuses(state_dir: &Path, liveness_window_secs: u64) -> Result<Vec<ModelStatus>> {
    let locks_dir = state_dir.join("locks");
    let entries = match fs::read_dir(&locks_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read lock dir: {locks_dir:?}"));
        }
    };

    let mut statuses = vec![];
    for entry in entries {
        let path = entry?.path();
        if path.extension() != Some("json".as_ref()) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((model, provider)) = split_model_key(stem) else {
            debug!(path = %path.display(), "skipping lock file with unrecognized name");
            continue;
        };
        statuses.push(status_from_lock_path(
            &path,
            &model,
            &provider,
            liveness_window_secs,
        )?);
    }

    statuses.sort_by(|a, b| (&a.model, &a.provider).cmp(&(&b.model, &b.provider)));
    Ok(statuses)
}

fn status_from_lock_path(
    lock_path: &Path,
    model: &str,
    provider: &str,
    liveness_window_secs: u64,
) -> Result<ModelStatus> {
    let Some(record) = read_lock_record(lock_path)? else {
        return Ok(ModelStatus::not_started(model, provider));
    };

    let guideline_bytes = record
        .guideline_path
        .as_ref()
        .and_then(|path| fs::metadata(path).ok())
        .map(|meta| meta.len());

    let state = ModelStatus::derive_state(&record, pid_alive(record.pid), liveness_window_secs);
    Ok(ModelStatus {
        model: model.to_string(),
        provider: provider.to_string(),
        state,
        guideline_bytes,
        updated_at: Some(record.updated_at),
        lock: Some(record),
    })
}
