//! Durable checkpoint record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the best-known guideline performance.
///
/// Written only on improvement, so the sequence of persisted `pass_count`
/// values is non-decreasing across a run's lifetime. Owned exclusively by the
/// checkpoint store; replaced atomically, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointData {
    pub pass_count: usize,
    pub fail_count: usize,
    /// Refinement iteration that produced this snapshot.
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_camel_case_keys() {
        let checkpoint = CheckpointData {
            pass_count: 8,
            fail_count: 2,
            iteration: 4,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&checkpoint).unwrap();
        assert!(value.get("passCount").is_some());
        assert!(value.get("failCount").is_some());
        assert!(value.get("iteration").is_some());
    }
}
