//! Accord - consensus labeling of multiple segmentations.
//!
//! Fuses several discrete-label segmentations of the same scene into one
//! consensus labeling with the multi-label STAPLE algorithm, estimating a
//! confusion matrix per source along the way:
//! - Label space discovery and class priors (global or per pixel)
//! - Identity-like or majority-vote initialization
//! - Parallel E-step and M-step with rayon
//! - Tie handling by class preference or an undecided label
//! - Optional per-class probability volumes
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use accord::{FusionConfig, FusionInputs, fuse};
//!
//! let inputs = FusionInputs::new(&segmentations).with_mask(&mask);
//! let result = fuse::<u8, u8>(&inputs, FusionConfig::majority_vote_seeded())?;
//!
//! println!(
//!     "{} after {} iterations",
//!     result.termination, result.elapsed_iterations
//! );
//! let reliability = result.confusion_matrix(0);
//! ```

mod config;
mod error;
mod image;
mod label;

pub(crate) mod confusion;
pub(crate) mod convergence;
pub(crate) mod decision;
pub(crate) mod estimation;
pub(crate) mod fusion;
pub(crate) mod label_space;
pub(crate) mod posterior;
pub(crate) mod prior;
pub(crate) mod progress;

#[cfg(test)]
pub mod testing;

pub mod prelude;

// ============================================================================
// Volumes and labels
// ============================================================================

pub use image::{Dimensions, Volume};
pub use label::Label;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    DEFAULT_IDENTITY_DIAGONAL, DEFAULT_TERMINATION_THRESHOLD, FusionConfig, Initialization,
    TieBreak,
};
pub use error::{Error, Result};

// ============================================================================
// Fusion
// ============================================================================

pub use confusion::ConfusionMatrix;
pub use convergence::Termination;
pub use decision::TIE_TOLERANCE;
pub use fusion::{
    // Main API
    FusionInputs,
    FusionResult,
    StapleEstimator,
    fuse,
    fuse_with_progress,
};
pub use label_space::{LabelSpace, MAX_CLASS_COUNT};
pub use prior::PRIOR_FLOOR;
pub use progress::{IterationCallback, IterationProgress};
