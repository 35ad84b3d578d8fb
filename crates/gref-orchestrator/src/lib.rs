//! # gref-orchestrator
//!
//! The guideline refinement control loop: acquires the per-model lock, runs
//! the eval suite repeatedly, classifies stability, feeds consistently
//! failing evals to the analyzer, folds the suggested edits into the
//! guideline document, checkpoints improvements, and decides when to stop.

pub mod engine;
pub mod retry;
pub mod signal;

pub use engine::{RefinementOrchestrator, RunOutcome, RunReport};
pub use retry::retry_with_backoff;
pub use signal::StopSignal;

/// Result type for orchestrator operations
pub type Result<T> = anyhow::Result<T>;
