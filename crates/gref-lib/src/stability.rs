//! Stability classification over repeated suite executions.
//!
//! Pure function of its inputs: no locks, no I/O.

use gref_types::{EvalRunResult, EvalStability};
use std::collections::HashMap;

/// Count per-eval passes and fails across `repetitions` executions.
///
/// An eval absent from a repetition's result set is counted as failing for
/// that repetition (a crash or timeout counts against it). Every eval name
/// present in any repetition appears exactly once in the output mapping.
pub fn classify(runs: &[EvalRunResult], repetitions: usize) -> HashMap<String, EvalStability> {
    debug_assert!(runs.len() <= repetitions);

    let mut pass_counts: HashMap<String, usize> = HashMap::new();
    for run in runs {
        for result in &run.results {
            let passes = pass_counts.entry(result.eval_name.clone()).or_insert(0);
            if result.passed {
                *passes += 1;
            }
        }
    }

    pass_counts
        .into_iter()
        .map(|(eval_name, pass_count)| {
            let stability = EvalStability {
                eval_name: eval_name.clone(),
                pass_count,
                fail_count: repetitions - pass_count,
                repetitions,
            };
            (eval_name, stability)
        })
        .collect()
}
