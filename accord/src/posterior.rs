//! Posterior estimation (E-step).
//!
//! For every in-mask pixel p and candidate true label k:
//!
//! ```text
//! W_k(p) ∝ prior(k, p) * Π_s C_s[k][l_s(p)] ^ trust(s)
//! ```
//!
//! normalized over k. The product is accumulated as a sum of logarithms and
//! shifted by its maximum before exponentiation, so hundreds of sources do not
//! underflow it. Pixels are independent, so the store is split into
//! pixel-aligned chunks and filled in parallel; confusion matrices and priors
//! are only read.

use common::parallel::ParRecordsMut;
use rayon::prelude::*;

use crate::confusion::ConfusionMatrix;
use crate::image::Volume;
use crate::label::Label;
use crate::prior::PriorModel;

/// One length-K probability vector per pixel, stored pixel-major.
///
/// Masked-out pixels keep an all-zero vector.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorStore {
    class_count: usize,
    weights: Vec<f64>,
}

impl PosteriorStore {
    pub fn new(pixel_count: usize, class_count: usize) -> Self {
        assert!(class_count > 0, "class_count must be positive");
        Self {
            class_count,
            weights: vec![0.0; pixel_count * class_count],
        }
    }

    /// Wrap precomputed weights (`pixel_count * class_count` values).
    pub fn from_weights(class_count: usize, weights: Vec<f64>) -> Self {
        assert!(class_count > 0, "class_count must be positive");
        assert_eq!(
            weights.len() % class_count,
            0,
            "weights length must be a multiple of class_count"
        );
        Self {
            class_count,
            weights,
        }
    }

    #[inline]
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.weights.len() / self.class_count
    }

    /// Posterior vector of `pixel`.
    #[inline]
    pub fn pixel(&self, pixel: usize) -> &[f64] {
        let start = pixel * self.class_count;
        &self.weights[start..start + self.class_count]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }
}

/// Read-only model parameters of one E-step.
pub struct EStep<'a, L: Label> {
    pub sources: &'a [Volume<L>],
    pub mask: Option<&'a Volume<bool>>,
    pub priors: &'a PriorModel<'a>,
    pub matrices: &'a [ConfusionMatrix],
    pub trust: Option<&'a [f64]>,
}

impl<L: Label> EStep<'_, L> {
    /// Recompute every in-mask posterior vector.
    ///
    /// Returns the number of degenerate pixels, where every class has zero
    /// prior or zero likelihood; those fall back to the normalized prior at
    /// the pixel.
    pub fn run(&self, store: &mut PosteriorStore) -> usize {
        let class_count = store.class_count;
        debug_assert!(self.matrices.iter().all(|m| m.class_count() == class_count));

        store
            .weights
            .par_records_mut_auto(class_count)
            .map(|(first_pixel, chunk)| {
                let mut degenerate = 0;
                for (local, weights) in chunk.chunks_exact_mut(class_count).enumerate() {
                    let pixel = first_pixel + local;
                    if self.mask.is_some_and(|m| !m[pixel]) {
                        weights.fill(0.0);
                        continue;
                    }
                    if !self.pixel_posterior(pixel, weights) {
                        degenerate += 1;
                    }
                }
                degenerate
            })
            .sum()
    }

    /// Fill `weights` with the normalized posterior at `pixel`. Returns
    /// `false` if the prior fallback was used.
    fn pixel_posterior(&self, pixel: usize, weights: &mut [f64]) -> bool {
        for (class, w) in weights.iter_mut().enumerate() {
            *w = self.priors.prior(pixel, class).ln();
        }

        for (source_index, (source, matrix)) in
            self.sources.iter().zip(self.matrices).enumerate()
        {
            let exponent = self.trust.map_or(1.0, |t| t[source_index]);
            // A zero-trust source contributes nothing, even where C is zero.
            if exponent == 0.0 {
                continue;
            }
            let observed = source[pixel].class_index();
            for (class, w) in weights.iter_mut().enumerate() {
                *w += exponent * matrix.get(class, observed).ln();
            }
        }

        let max_log = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max_log.is_finite() {
            weights.iter_mut().for_each(|w| *w = (*w - max_log).exp());
            let sum: f64 = weights.iter().sum();
            weights.iter_mut().for_each(|w| *w /= sum);
            return true;
        }

        for (class, w) in weights.iter_mut().enumerate() {
            *w = self.priors.prior(pixel, class);
        }
        let prior_sum: f64 = weights.iter().sum();
        if prior_sum > 0.0 && prior_sum.is_finite() {
            weights.iter_mut().for_each(|w| *w /= prior_sum);
        } else {
            weights.fill(1.0 / weights.len() as f64);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Dimensions;

    fn volume(labels: &[u8]) -> Volume<u8> {
        Volume::new(Dimensions::new_2d(labels.len(), 1), labels.to_vec())
    }

    fn run(
        sources: &[Volume<u8>],
        mask: Option<&Volume<bool>>,
        priors: &PriorModel,
        matrices: &[ConfusionMatrix],
        trust: Option<&[f64]>,
    ) -> (PosteriorStore, usize) {
        let mut store = PosteriorStore::new(sources[0].len(), priors.class_count());
        let degenerate = EStep {
            sources,
            mask,
            priors,
            matrices,
            trust,
        }
        .run(&mut store);
        (store, degenerate)
    }

    #[test]
    fn test_posteriors_sum_to_one() {
        let sources = [volume(&[0, 1, 2, 1, 0]), volume(&[0, 1, 1, 2, 2])];
        let priors = PriorModel::new(None, None, &sources, None, 3);
        let matrices = vec![
            ConfusionMatrix::identity_like(3, 0.8),
            ConfusionMatrix::identity_like(3, 0.6),
        ];
        let (store, degenerate) = run(&sources, None, &priors, &matrices, None);
        assert_eq!(degenerate, 0);
        for pixel in 0..store.pixel_count() {
            let sum: f64 = store.pixel(pixel).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "pixel {pixel} sums to {sum}");
        }
    }

    #[test]
    fn test_matches_hand_computed_posterior() {
        // Two sources disagree; priors 0.5/0.5.
        let sources = [volume(&[0]), volume(&[1])];
        let priors = PriorModel::new(Some(&[0.5, 0.5]), None, &sources, None, 2);
        let matrices = vec![
            ConfusionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.1, 0.9]]),
            ConfusionMatrix::from_rows(&[vec![0.7, 0.3], vec![0.3, 0.7]]),
        ];
        let (store, _) = run(&sources, None, &priors, &matrices, None);
        // W0 ∝ 0.9 * 0.3 = 0.27, W1 ∝ 0.1 * 0.7 = 0.07
        let w = store.pixel(0);
        assert!((w[0] - 0.27 / 0.34).abs() < 1e-12);
        assert!((w[1] - 0.07 / 0.34).abs() < 1e-12);
    }

    #[test]
    fn test_zero_trust_ignores_source() {
        let sources = [volume(&[0]), volume(&[1])];
        let priors = PriorModel::new(Some(&[0.5, 0.5]), None, &sources, None, 2);
        let matrices = vec![
            ConfusionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.1, 0.9]]),
            ConfusionMatrix::from_rows(&[vec![0.9, 0.1], vec![0.1, 0.9]]),
        ];
        let trust = [1.0, 0.0];
        let (store, _) = run(&sources, None, &priors, &matrices, Some(&trust));
        assert!((store.pixel(0)[0] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_masked_pixels_are_skipped() {
        let sources = [volume(&[0, 1]), volume(&[0, 1])];
        let mask = Volume::new(Dimensions::new_2d(2, 1), vec![true, false]);
        let priors = PriorModel::new(Some(&[0.5, 0.5]), None, &sources, None, 2);
        let matrices = vec![ConfusionMatrix::identity_like(2, 0.9); 2];
        let (store, _) = run(&sources, Some(&mask), &priors, &matrices, None);
        assert_eq!(store.pixel(1), &[0.0, 0.0]);
        assert!(store.pixel(0)[0] > 0.9);
    }

    #[test]
    fn test_degenerate_pixel_falls_back_to_prior() {
        // Hard identity matrices and disagreeing sources: every class has
        // zero likelihood.
        let sources = [volume(&[0]), volume(&[1])];
        let priors = PriorModel::new(Some(&[0.25, 0.75]), None, &sources, None, 2);
        let matrices = vec![ConfusionMatrix::identity_like(2, 1.0); 2];
        let (store, degenerate) = run(&sources, None, &priors, &matrices, None);
        assert_eq!(degenerate, 1);
        assert_eq!(store.pixel(0), &[0.25, 0.75]);
    }

    #[test]
    fn test_many_sources_do_not_underflow() {
        // 180 of 400 sources report class 0, 220 report class 1. The plain
        // likelihood product is below f64::MIN_POSITIVE for both classes.
        let sources: Vec<Volume<u8>> = (0..400).map(|s| volume(&[u8::from(s >= 180)])).collect();
        let priors = PriorModel::new(Some(&[0.75, 0.25]), None, &sources, None, 2);
        let matrices = vec![ConfusionMatrix::identity_like(2, 0.99); sources.len()];

        let (store, degenerate) = run(&sources, None, &priors, &matrices, None);

        assert_eq!(degenerate, 0);
        let w = store.pixel(0);
        assert!(w[1] > 1.0 - 1e-12, "posterior {w:?}");
        assert!((w[0] + w[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_prior_class_gets_zero_weight() {
        let sources = [volume(&[0]), volume(&[0])];
        let priors = PriorModel::new(Some(&[0.0, 1.0]), None, &sources, None, 2);
        let matrices = vec![ConfusionMatrix::identity_like(2, 0.9); 2];
        let (store, degenerate) = run(&sources, None, &priors, &matrices, None);
        assert_eq!(degenerate, 0);
        assert_eq!(store.pixel(0), &[0.0, 1.0]);
    }
}
