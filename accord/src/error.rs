//! Error types for fusion runs.
//!
//! Every variant is a configuration or input problem detected before the
//! first EM iteration. Non-convergence is not an error; see
//! [`Termination`](crate::Termination).

use common::file_format::FileFormatError;
use thiserror::Error;

use crate::image::Dimensions;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No source segmentations provided")]
    NoSources,

    #[error("Dimension mismatch for {what} {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        index: usize,
        expected: Dimensions,
        actual: Dimensions,
    },

    #[error("Source {source_index} has label {label}, outside {class_count} declared classes")]
    LabelOutOfRange {
        source_index: usize,
        label: u32,
        class_count: usize,
    },

    #[error("Invalid class count {0}: must be at least 1")]
    InvalidClassCount(usize),

    #[error("{class_count} classes exceed the supported maximum of {max}")]
    TooManyClasses { class_count: usize, max: usize },

    #[error("Invalid prior probabilities: {0}")]
    InvalidPriorProbabilities(String),

    #[error("Expected {expected} prior probability images (one per class), got {actual}")]
    PriorImageCount { expected: usize, actual: usize },

    #[error("Invalid prior preference: {0}")]
    InvalidPriorPreference(String),

    #[error("Invalid observer trust: {0}")]
    InvalidObserverTrust(String),

    #[error("Invalid initialization: {0}")]
    InvalidInitialization(String),

    #[error("Invalid termination threshold {0}: must be finite and >= 0")]
    InvalidTerminationThreshold(f64),

    #[error("Invalid iteration cap: must be at least 1")]
    InvalidIterationCap,

    #[error("Label value {value} does not fit the output label type (max {max})")]
    UnrepresentableLabel { value: u64, max: u32 },

    #[error("Mask excludes every pixel; confusion matrices cannot be estimated")]
    EmptyMask,

    #[error("Configuration file: {0}")]
    ConfigFile(#[from] FileFormatError),
}

pub type Result<T> = std::result::Result<T, Error>;
