//! Fusion entry point.
//!
//! Provides [`StapleEstimator`] and the [`fuse`] / [`fuse_with_progress`]
//! functions as the main API. A run validates its inputs, alternates E- and
//! M-steps until the confusion matrices stop moving (or the cap or a cancel
//! request ends the loop), then labels every pixel from one last E-step with
//! the final matrices.


use std::time::Instant;

use common::CancelToken;
use rayon::prelude::*;

use crate::config::FusionConfig;
use crate::confusion::{ConfusionMatrix, ConfusionMatrixStore};
use crate::convergence::{ConvergenceMonitor, Termination};
use crate::decision::{DecisionRule, probability_volumes};
use crate::error::{Error, Result};
use crate::estimation::reestimate_confusion;
use crate::image::{Dimensions, Volume};
use crate::label::Label;
use crate::label_space::LabelSpace;
use crate::posterior::{EStep, PosteriorStore};
use crate::prior::PriorModel;
use crate::progress::{IterationCallback, report_iteration};

/// Borrowed input volumes of one run.
#[derive(Debug, Clone, Copy)]
pub struct FusionInputs<'a, L: Label> {
    /// Source segmentations, all of identical dimensions.
    pub sources: &'a [Volume<L>],
    /// Pixels where the mask is `false` take no part in estimation.
    pub mask: Option<&'a Volume<bool>>,
    /// One prior probability volume per class, overriding the global prior
    /// vector pixel by pixel.
    pub prior_images: Option<&'a [Volume<f32>]>,
}

impl<'a, L: Label> FusionInputs<'a, L> {
    pub fn new(sources: &'a [Volume<L>]) -> Self {
        Self {
            sources,
            mask: None,
            prior_images: None,
        }
    }

    pub fn with_mask(mut self, mask: &'a Volume<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_prior_images(mut self, prior_images: &'a [Volume<f32>]) -> Self {
        self.prior_images = Some(prior_images);
        self
    }

    /// Common dimensions of the sources and the mask.
    fn validate_geometry(&self) -> Result<Dimensions> {
        let first = self.sources.first().ok_or(Error::NoSources)?;
        let expected = first.dimensions();

        for (index, source) in self.sources.iter().enumerate().skip(1) {
            check_dimensions("source", index, expected, source.dimensions())?;
        }
        if let Some(mask) = self.mask {
            check_dimensions("mask", 0, expected, mask.dimensions())?;
        }
        Ok(expected)
    }

    fn validate_prior_images(&self, expected: Dimensions, class_count: usize) -> Result<()> {
        let Some(images) = self.prior_images else {
            return Ok(());
        };
        if images.len() != class_count {
            return Err(Error::PriorImageCount {
                expected: class_count,
                actual: images.len(),
            });
        }
        for (index, image) in images.iter().enumerate() {
            check_dimensions("prior image", index, expected, image.dimensions())?;
            if image.pixels().par_iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(Error::InvalidPriorProbabilities(format!(
                    "prior image {index} contains a negative or non-finite value"
                )));
            }
        }
        Ok(())
    }

    /// Pixels that take part in estimation.
    fn in_mask_count(&self, pixel_count: usize) -> usize {
        match self.mask {
            Some(mask) => mask.pixels().par_iter().filter(|&&m| m).count(),
            None => pixel_count,
        }
    }
}

fn check_dimensions(
    what: &'static str,
    index: usize,
    expected: Dimensions,
    actual: Dimensions,
) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            what,
            index,
            expected,
            actual,
        })
    }
}

/// Outcome of a fusion run.
///
/// Every volume is owned by the result and independent of the inputs.
#[derive(Debug, Clone)]
pub struct FusionResult<O: Label> {
    /// Consensus label per pixel.
    pub labels: Volume<O>,
    /// One K×K matrix per source, in source order.
    pub confusion_matrices: Vec<ConfusionMatrix>,
    /// Completed EM iterations.
    pub elapsed_iterations: u32,
    /// Largest confusion-matrix entry change in the last iteration.
    pub max_update: f64,
    pub termination: Termination,
    /// Max update of every iteration, in order.
    pub update_history: Vec<f64>,
    /// Global class priors used by the run.
    pub priors: Vec<f64>,
    pub label_space: LabelSpace,
    probabilities: Option<Vec<Volume<f32>>>,
}

impl<O: Label> FusionResult<O> {
    /// Confusion matrix of source `source`, if it exists.
    pub fn confusion_matrix(&self, source: usize) -> Option<&ConfusionMatrix> {
        self.confusion_matrices.get(source)
    }

    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    /// Per-class posterior volumes, present when requested and not yet
    /// released.
    pub fn probability_images(&self) -> Option<&[Volume<f32>]> {
        self.probabilities.as_deref()
    }

    /// Probability volume of `class`.
    pub fn probability_image(&self, class: usize) -> Option<&Volume<f32>> {
        self.probabilities.as_ref()?.get(class)
    }

    /// Drop the probability volumes. Labels and matrices are unaffected.
    pub fn release_probabilities(&mut self) {
        self.probabilities = None;
    }
}

/// Runs STAPLE fusion with a fixed, validated configuration.
///
/// The estimator holds no state between runs; one instance may fuse any
/// number of input sets.
#[derive(Debug, Clone)]
pub struct StapleEstimator {
    config: FusionConfig,
    progress: IterationCallback,
    cancel: Option<CancelToken>,
}

impl StapleEstimator {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: IterationCallback::default(),
            cancel: None,
        })
    }

    /// Call `progress` after every completed iteration.
    pub fn with_progress(mut self, progress: IterationCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Stop at the next iteration boundary once `cancel` is triggered. The
    /// run then finishes as if it had converged.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse `inputs` into one label volume of type `O`.
    ///
    /// # Errors
    ///
    /// Returns an error, before any iteration, if:
    /// - No sources are provided, or their dimensions (or the mask's, or a
    ///   prior image's) differ
    /// - A source label is outside a declared class count
    /// - A per-class or per-source vector has the wrong length or invalid
    ///   entries
    /// - An output label does not fit `O`
    /// - The mask excludes every pixel
    pub fn fuse<I: Label, O: Label>(
        &self,
        inputs: &FusionInputs<'_, I>,
    ) -> Result<FusionResult<O>> {
        let config = &self.config;
        let dimensions = inputs.validate_geometry()?;
        let sources = inputs.sources;
        let mask = inputs.mask;

        let label_space =
            LabelSpace::discover(sources, config.class_count, config.undecided_label)?;
        let class_count = label_space.class_count;
        config.validate_lengths(class_count, sources.len())?;
        inputs.validate_prior_images(dimensions, class_count)?;

        let pixel_count = dimensions.pixel_count();
        let in_mask = inputs.in_mask_count(pixel_count);
        if in_mask == 0 {
            return Err(Error::EmptyMask);
        }

        let rule = DecisionRule::<O>::new(
            class_count,
            config.tie_break,
            config.prior_preference.as_deref(),
            label_space.undecided_label,
            label_space.max_label,
        )?;

        tracing::info!(
            sources = sources.len(),
            class_count,
            %dimensions,
            masked_out = pixel_count - in_mask,
            initialization = %config.initialization,
            "Starting STAPLE fusion"
        );
        let start = Instant::now();

        let priors = PriorModel::new(
            config.prior_probabilities.as_deref(),
            inputs.prior_images,
            sources,
            mask,
            class_count,
        );
        let mut matrices =
            ConfusionMatrixStore::initialize(config.initialization, sources, mask, class_count);
        let mut posteriors = PosteriorStore::new(pixel_count, class_count);
        let mut monitor =
            ConvergenceMonitor::new(config.termination_threshold, config.max_iterations);

        let termination = loop {
            self.e_step(sources, mask, &priors, matrices.matrices(), &mut posteriors);

            let update = reestimate_confusion(sources, mask, &posteriors, matrices.matrices());
            if update.empty_rows > 0 {
                tracing::debug!(
                    empty_rows = update.empty_rows,
                    "Confusion rows without evidence kept their previous values"
                );
            }
            let max_update = matrices.replace(update.matrices);
            let stop = monitor.record(max_update);

            let iteration = monitor.iterations();
            tracing::debug!(iteration, max_update, "EM iteration");
            report_iteration(&self.progress, iteration, max_update, config.max_iterations);

            if let Some(termination) = stop {
                break termination;
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                break Termination::Cancelled;
            }
        };

        self.e_step(sources, mask, &priors, matrices.matrices(), &mut posteriors);

        let labels = rule.decide(&posteriors, &sources[0], mask);
        let probabilities = config
            .probabilistic_output
            .then(|| probability_volumes(&posteriors, dimensions));

        let elapsed_iterations = monitor.iterations();
        let max_update = monitor.last_update();
        tracing::info!(
            %termination,
            elapsed_iterations,
            max_update,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "STAPLE fusion finished"
        );

        Ok(FusionResult {
            labels,
            confusion_matrices: matrices.into_matrices(),
            elapsed_iterations,
            max_update,
            termination,
            update_history: monitor.into_history(),
            priors: priors.global().to_vec(),
            label_space,
            probabilities,
        })
    }

    fn e_step<L: Label>(
        &self,
        sources: &[Volume<L>],
        mask: Option<&Volume<bool>>,
        priors: &PriorModel<'_>,
        matrices: &[ConfusionMatrix],
        posteriors: &mut PosteriorStore,
    ) {
        let degenerate = EStep {
            sources,
            mask,
            priors,
            matrices,
            trust: self.config.observer_trust.as_deref(),
        }
        .run(posteriors);
        if degenerate > 0 {
            tracing::warn!(degenerate, "Posteriors fell back to the prior");
        }
    }
}

/// Fuse `inputs` with `config`.
///
/// # Examples
///
/// ```ignore
/// use accord::{FusionConfig, FusionInputs, fuse};
///
/// let inputs = FusionInputs::new(&sources);
/// let result = fuse::<u8, u8>(&inputs, FusionConfig::default())?;
/// println!("{} iterations", result.elapsed_iterations);
/// ```
pub fn fuse<I: Label, O: Label>(
    inputs: &FusionInputs<'_, I>,
    config: FusionConfig,
) -> Result<FusionResult<O>> {
    StapleEstimator::new(config)?.fuse(inputs)
}

/// Fuse `inputs` with `config`, calling `progress` after every iteration.
pub fn fuse_with_progress<I: Label, O: Label>(
    inputs: &FusionInputs<'_, I>,
    config: FusionConfig,
    progress: IterationCallback,
) -> Result<FusionResult<O>> {
    StapleEstimator::new(config)?
        .with_progress(progress)
        .fuse(inputs)
}
