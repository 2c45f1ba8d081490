//! Convergence monitoring for the EM loop.

use strum_macros::Display;

/// Why the EM loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Termination {
    /// The largest confusion-matrix update fell below the threshold.
    Converged,
    /// The iteration cap was reached before the threshold was met.
    IterationLimit,
    /// The caller cancelled the run at an iteration boundary.
    Cancelled,
}

/// Tracks the largest confusion-matrix update per iteration and decides when
/// the loop ends.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    threshold: f64,
    max_iterations: Option<u32>,
    history: Vec<f64>,
}

impl ConvergenceMonitor {
    pub fn new(threshold: f64, max_iterations: Option<u32>) -> Self {
        Self {
            threshold,
            max_iterations,
            history: Vec::new(),
        }
    }

    /// Record the max update of a completed iteration. Returns the reason to
    /// stop, if any. Convergence wins over the cap when both apply.
    pub fn record(&mut self, max_update: f64) -> Option<Termination> {
        self.history.push(max_update);
        if max_update < self.threshold {
            Some(Termination::Converged)
        } else if self
            .max_iterations
            .is_some_and(|cap| self.iterations() >= cap)
        {
            Some(Termination::IterationLimit)
        } else {
            None
        }
    }

    /// Completed iterations.
    pub fn iterations(&self) -> u32 {
        self.history.len() as u32
    }

    /// Max update of the last completed iteration; infinite before the first.
    pub fn last_update(&self) -> f64 {
        self.history.last().copied().unwrap_or(f64::INFINITY)
    }

    /// Max update of every completed iteration, in order.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn into_history(self) -> Vec<f64> {
        self.history
    }
}
