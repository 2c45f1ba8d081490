//! Fusion configuration.
//!
//! `FusionConfig` is an immutable, per-run description of every tunable of the
//! EM fusion. Optional parameters are `Option`s: `None` means "derive it from
//! the inputs" (class count, priors, undecided label) or "not used" (trust,
//! iteration cap).

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{Error, Result};
use crate::label_space::MAX_CLASS_COUNT;

/// Default termination threshold on the largest confusion-matrix update.
pub const DEFAULT_TERMINATION_THRESHOLD: f64 = 1e-5;

/// Diagonal mass of the identity-like initial confusion matrices.
pub const DEFAULT_IDENTITY_DIAGONAL: f64 = 0.99;

/// How the confusion matrices are seeded before the first E-step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Initialization {
    /// `diagonal` on the diagonal, the remainder spread evenly over the row.
    Identity { diagonal: f64 },
    /// Empirical joint distribution of (pixelwise majority vote, source label).
    MajorityVote,
}

impl Default for Initialization {
    fn default() -> Self {
        Self::Identity {
            diagonal: DEFAULT_IDENTITY_DIAGONAL,
        }
    }
}

/// What the decision stage writes when several classes share the maximal
/// posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TieBreak {
    /// Pick the tied class with the lowest prior preference value.
    #[default]
    Preference,
    /// Write the undecided label.
    Undecided,
}

/// Configuration of one fusion run.
///
/// # Examples
///
/// ```ignore
/// use accord::{FusionConfig, Initialization};
///
/// let config = FusionConfig {
///     initialization: Initialization::MajorityVote,
///     max_iterations: Some(50),
///     probabilistic_output: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Stop once no confusion-matrix entry changes by this much or more.
    pub termination_threshold: f64,
    /// Hard cap on EM iterations. Without a cap only the threshold ends the
    /// loop, so pathological inputs may iterate for a long time.
    pub max_iterations: Option<u32>,
    /// Number of classes K. Discovered as max label + 1 when `None`.
    pub class_count: Option<usize>,
    /// Output value for unresolved ties. Defaults to K, which is the max
    /// observed label + 1 unless a larger `class_count` is declared; K keeps
    /// the value clear of every class in that case too.
    pub undecided_label: Option<u32>,
    pub initialization: Initialization,
    pub tie_break: TieBreak,
    /// Global class priors, one per class. Estimated from label frequencies
    /// when `None`.
    pub prior_probabilities: Option<Vec<f64>>,
    /// Per-source exponent on that source's confusion-matrix likelihood.
    pub observer_trust: Option<Vec<f64>>,
    /// Per-class tie-break rank; lower wins. Defaults to the class index.
    pub prior_preference: Option<Vec<usize>>,
    /// Keep one posterior probability volume per class in the result.
    pub probabilistic_output: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            termination_threshold: DEFAULT_TERMINATION_THRESHOLD,
            max_iterations: None,
            class_count: None,
            undecided_label: None,
            initialization: Initialization::default(),
            tie_break: TieBreak::default(),
            prior_probabilities: None,
            observer_trust: None,
            prior_preference: None,
            probabilistic_output: false,
        }
    }
}

impl FusionConfig {
    // ========== Presets ==========

    /// Preset: majority-vote warm start.
    pub fn majority_vote_seeded() -> Self {
        Self {
            initialization: Initialization::MajorityVote,
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    // ========== Files ==========

    /// Load a configuration from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = common::file_format::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        common::file_format::write_file(path, self)?;
        Ok(())
    }

    // ========== Validation ==========

    /// Check the parameters that do not depend on the inputs.
    pub fn validate(&self) -> Result<()> {
        if !self.termination_threshold.is_finite() || self.termination_threshold < 0.0 {
            return Err(Error::InvalidTerminationThreshold(
                self.termination_threshold,
            ));
        }
        if self.max_iterations == Some(0) {
            return Err(Error::InvalidIterationCap);
        }
        if self.class_count == Some(0) {
            return Err(Error::InvalidClassCount(0));
        }
        if let Some(class_count) = self.class_count.filter(|&k| k > MAX_CLASS_COUNT) {
            return Err(Error::TooManyClasses {
                class_count,
                max: MAX_CLASS_COUNT,
            });
        }
        if let Initialization::Identity { diagonal } = self.initialization {
            if !(diagonal > 0.0 && diagonal <= 1.0) {
                return Err(Error::InvalidInitialization(format!(
                    "identity diagonal {diagonal} must be in (0, 1]"
                )));
            }
        }

        if let Some(priors) = &self.prior_probabilities {
            if let Some(p) = priors.iter().find(|p| !p.is_finite() || **p < 0.0) {
                return Err(Error::InvalidPriorProbabilities(format!(
                    "entry {p} is negative or not finite"
                )));
            }
            if priors.iter().sum::<f64>() <= 0.0 {
                return Err(Error::InvalidPriorProbabilities(
                    "entries sum to zero".to_string(),
                ));
            }
        }

        if let Some(trust) = &self.observer_trust {
            if let Some(t) = trust.iter().find(|t| !t.is_finite() || **t < 0.0) {
                return Err(Error::InvalidObserverTrust(format!(
                    "weight {t} is negative or not finite"
                )));
            }
        }

        if let Some(preference) = &self.prior_preference {
            let mut seen = preference.clone();
            seen.sort_unstable();
            if seen.windows(2).any(|w| w[0] == w[1]) {
                return Err(Error::InvalidPriorPreference(
                    "duplicate preference values".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Check the per-class and per-source vectors against the run's class
    /// and source counts.
    pub fn validate_lengths(&self, class_count: usize, source_count: usize) -> Result<()> {
        if let Some(priors) = &self.prior_probabilities {
            if priors.len() != class_count {
                return Err(Error::InvalidPriorProbabilities(format!(
                    "expected {class_count} entries, got {}",
                    priors.len()
                )));
            }
        }

        if let Some(trust) = &self.observer_trust {
            if trust.len() != source_count {
                return Err(Error::InvalidObserverTrust(format!(
                    "expected {source_count} weights, got {}",
                    trust.len()
                )));
            }
        }

        if let Some(preference) = &self.prior_preference {
            if preference.len() != class_count {
                return Err(Error::InvalidPriorPreference(format!(
                    "expected {class_count} entries, got {}",
                    preference.len()
                )));
            }
            if let Some(p) = preference.iter().find(|p| **p >= class_count) {
                return Err(Error::InvalidPriorPreference(format!(
                    "value {p} is not below the class count {class_count}"
                )));
            }
        }

        Ok(())
    }
}
