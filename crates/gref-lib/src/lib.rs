//! # gref-lib
//!
//! Leaf components of the guideline refinement framework: the file-based
//! lock coordinator, the checkpoint store, the stability analyzer, the
//! adapter seams to the external eval runner and failure analyzer, the
//! status query surface, and the audit run log.

pub mod adapters;
pub mod checkpoint;
pub mod lock;
pub mod run_log;
pub mod stability;
pub mod status;

pub use adapters::{
    AnalysisRequest, EvalRunRequest, EvalSuiteRunner, FailureAnalyzer, GuidelineStore,
    HttpEvalRunner, HttpFailureAnalyzer, HttpGuidelineStore,
};
pub use checkpoint::CheckpointStore;
pub use lock::{AcquireOutcome, LockCoordinator, LockError, LockPatch};
pub use run_log::{sanitize_output, RunLog};
pub use stability::classify;
pub use status::{list_model_statuses, read_model_status};
