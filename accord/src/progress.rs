//! Per-iteration progress reporting.

use common::SharedFn;

/// State after one completed EM iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationProgress {
    /// Completed iterations (1-based).
    pub iteration: u32,
    /// Largest confusion-matrix entry change in this iteration.
    pub max_update: f64,
    /// Iteration cap, if any.
    pub max_iterations: Option<u32>,
}

/// Callback type for iteration events.
pub type IterationCallback = SharedFn<dyn Fn(&IterationProgress) + Send + Sync>;

/// Report an iteration using the callback if set.
pub fn report_iteration(
    callback: &IterationCallback,
    iteration: u32,
    max_update: f64,
    max_iterations: Option<u32>,
) {
    if let Some(f) = callback.get() {
        f(&IterationProgress {
            iteration,
            max_update,
            max_iterations,
        });
    }
}
