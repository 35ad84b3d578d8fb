//! Read-only status composite for dashboards and tooling.

use crate::lock::{LockFileStatus, RunPhase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Coarse run state derived from the lock record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RunState {
    /// A live holder is actively progressing the run.
    Running,
    /// A record exists but its holder is dead or silent.
    Paused,
    Complete,
    NotStarted,
}

/// Composite status for one (model, provider) key.
///
/// Purely derived from the lock record and the guideline file; never an
/// independent source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelStatus {
    pub model: String,
    pub provider: String,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockFileStatus>,
    /// Approximate size of the guideline document, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guideline_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModelStatus {
    /// Status for a key with no lock record at all.
    pub fn not_started(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            state: RunState::NotStarted,
            lock: None,
            guideline_bytes: None,
            updated_at: None,
        }
    }

    /// Derive the coarse state from a lock record and a holder-liveness probe.
    pub fn derive_state(record: &LockFileStatus, holder_alive: bool, liveness_window_secs: u64) -> RunState {
        if record.phase == RunPhase::Complete {
            RunState::Complete
        } else if holder_alive && record.age_secs(Utc::now()) <= liveness_window_secs {
            RunState::Running
        } else {
            RunState::Paused
        }
    }
}
