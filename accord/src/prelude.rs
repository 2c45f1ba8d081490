//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use accord::prelude::*;
//! ```

pub use crate::{Dimensions, Label, Volume};

pub use crate::{
    ConfusionMatrix, FusionConfig, FusionInputs, FusionResult, Initialization, IterationCallback,
    IterationProgress, StapleEstimator, Termination, TieBreak, fuse, fuse_with_progress,
};
