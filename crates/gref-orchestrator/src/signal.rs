//! Cooperative stop signal checked at iteration boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clone-able flag an external caller flips to request a clean stop.
///
/// The loop checks it at the start of each iteration. In-flight runner and
/// analyzer calls finish or are abandoned with their results discarded,
/// never partially merged into the guideline document.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
