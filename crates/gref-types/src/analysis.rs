//! Failure-analysis types returned by the external analyzer.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Confidence the analyzer assigns to a suggested edit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// How a suggested edit applies to its target section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EditOp {
    /// Add a new entry at the end of the section.
    Append,
    /// Replace the section's entries wholesale.
    Replace,
}

/// The unit of change the analyzer proposes and the external merge consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuidelineEdit {
    /// Slash-separated section path, e.g. `function_guidelines/validators`.
    pub section: String,
    pub op: EditOp,
    /// Prose of the new or replacement entry.
    pub content: String,
}

/// Root-cause analysis for one consistently-failing eval.
///
/// One per distinct failing eval per iteration; used to update the guideline
/// document, then discardable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureAnalysis {
    pub eval_name: String,
    /// Free-text root cause.
    pub analysis: String,
    pub suggested_edit: GuidelineEdit,
    pub confidence: Confidence,
    /// Names of prior guideline entries the analysis relates to.
    #[serde(default)]
    pub related_entries: Vec<String>,
}
