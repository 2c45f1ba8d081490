//! Per-source confusion matrices and their initialization.
//!
//! Row `i` of a source's matrix is the distribution of labels the source
//! reports when the true label is `i`; column `j` is the reported label.

use std::ops::Index;

use common::parallel::par_fold_ranges;

use crate::config::{DEFAULT_IDENTITY_DIAGONAL, Initialization};
use crate::image::Volume;
use crate::label::Label;

/// Dense K x K matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    class_count: usize,
    entries: Vec<f64>,
}

impl ConfusionMatrix {
    pub fn zeros(class_count: usize) -> Self {
        Self {
            class_count,
            entries: vec![0.0; class_count * class_count],
        }
    }

    /// `diagonal` on the diagonal, the rest of each row spread evenly.
    /// With a single class the matrix is `[1.0]`.
    pub fn identity_like(class_count: usize, diagonal: f64) -> Self {
        let mut matrix = Self::zeros(class_count);
        let off_diagonal = if class_count > 1 {
            (1.0 - diagonal) / (class_count - 1) as f64
        } else {
            0.0
        };
        for i in 0..class_count {
            matrix.row_mut(i).fill(off_diagonal);
            matrix.entries[i * class_count + i] = if class_count > 1 { diagonal } else { 1.0 };
        }
        matrix
    }

    /// Build a matrix from explicit rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let class_count = rows.len();
        assert!(
            rows.iter().all(|row| row.len() == class_count),
            "confusion matrix must be square"
        );
        Self {
            class_count,
            entries: rows.concat(),
        }
    }

    #[inline]
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// P(source reports `observed` | true label is `truth`).
    #[inline]
    pub fn get(&self, truth: usize, observed: usize) -> f64 {
        self.entries[truth * self.class_count + observed]
    }

    #[inline]
    pub(crate) fn add(&mut self, truth: usize, observed: usize, value: f64) {
        self.entries[truth * self.class_count + observed] += value;
    }

    #[inline]
    pub fn row(&self, truth: usize) -> &[f64] {
        let start = truth * self.class_count;
        &self.entries[start..start + self.class_count]
    }

    #[inline]
    fn row_mut(&mut self, truth: usize) -> &mut [f64] {
        let start = truth * self.class_count;
        &mut self.entries[start..start + self.class_count]
    }

    pub fn entries(&self) -> &[f64] {
        &self.entries
    }

    /// Element-wise sum, used to merge partial count matrices.
    pub(crate) fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.class_count, other.class_count);
        self.entries
            .iter_mut()
            .zip(&other.entries)
            .for_each(|(a, b)| *a += b);
    }

    /// Turn accumulated counts into row distributions.
    ///
    /// Rows without any evidence take the corresponding row of `fallback`.
    /// Returns the number of such rows.
    pub(crate) fn normalize_rows(&mut self, fallback: &ConfusionMatrix) -> usize {
        debug_assert_eq!(self.class_count, fallback.class_count);
        let mut empty_rows = 0;
        for truth in 0..self.class_count {
            let sum: f64 = self.row(truth).iter().sum();
            if sum > 0.0 && sum.is_finite() {
                self.row_mut(truth).iter_mut().for_each(|v| *v /= sum);
            } else {
                self.row_mut(truth).copy_from_slice(fallback.row(truth));
                empty_rows += 1;
            }
        }
        empty_rows
    }

    /// Largest absolute entry-wise difference.
    pub fn max_abs_difference(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.class_count, other.class_count);
        self.entries
            .iter()
            .zip(&other.entries)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Largest deviation of any row sum from 1.
    pub fn max_row_sum_error(&self) -> f64 {
        (0..self.class_count)
            .map(|truth| (self.row(truth).iter().sum::<f64>() - 1.0).abs())
            .fold(0.0, f64::max)
    }
}

impl Index<(usize, usize)> for ConfusionMatrix {
    type Output = f64;

    #[inline]
    fn index(&self, (truth, observed): (usize, usize)) -> &f64 {
        &self.entries[truth * self.class_count + observed]
    }
}

/// Owns one confusion matrix per source for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct ConfusionMatrixStore {
    matrices: Vec<ConfusionMatrix>,
}

impl ConfusionMatrixStore {
    pub fn initialize<L: Label>(
        initialization: Initialization,
        sources: &[Volume<L>],
        mask: Option<&Volume<bool>>,
        class_count: usize,
    ) -> Self {
        match initialization {
            Initialization::Identity { diagonal } => {
                Self::identity_like(sources.len(), class_count, diagonal)
            }
            Initialization::MajorityVote => Self::from_majority_vote(sources, mask, class_count),
        }
    }

    pub fn identity_like(source_count: usize, class_count: usize, diagonal: f64) -> Self {
        Self {
            matrices: vec![ConfusionMatrix::identity_like(class_count, diagonal); source_count],
        }
    }

    /// Seed each source's matrix with the empirical joint distribution of
    /// (pixelwise majority vote, source label).
    ///
    /// Pixels where the vote is tied carry no majority and are skipped. Rows
    /// of classes that never win a vote use the identity-like default row.
    pub fn from_majority_vote<L: Label>(
        sources: &[Volume<L>],
        mask: Option<&Volume<bool>>,
        class_count: usize,
    ) -> Self {
        let pixel_count = sources.first().map_or(0, |s| s.len());

        let tally = par_fold_ranges(
            pixel_count,
            || VoteTally::new(sources.len(), class_count),
            |mut tally, range| {
                for pixel in range {
                    if mask.is_some_and(|m| !m[pixel]) {
                        continue;
                    }
                    tally.add_pixel(sources, pixel);
                }
                tally
            },
            VoteTally::merge,
        );

        if tally.tied_pixels > 0 {
            tracing::debug!(
                tied_pixels = tally.tied_pixels,
                "Majority vote ties excluded from the warm start"
            );
        }

        let fallback = ConfusionMatrix::identity_like(class_count, DEFAULT_IDENTITY_DIAGONAL);
        let mut matrices = tally.counts;
        for matrix in &mut matrices {
            matrix.normalize_rows(&fallback);
        }
        Self { matrices }
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn get(&self, source: usize) -> &ConfusionMatrix {
        &self.matrices[source]
    }

    pub fn matrices(&self) -> &[ConfusionMatrix] {
        &self.matrices
    }

    /// Replace every matrix with its re-estimate and return the largest
    /// absolute entry change.
    pub fn replace(&mut self, updated: Vec<ConfusionMatrix>) -> f64 {
        assert_eq!(updated.len(), self.matrices.len(), "source count changed");
        let max_update = self
            .matrices
            .iter()
            .zip(&updated)
            .map(|(old, new)| old.max_abs_difference(new))
            .fold(0.0, f64::max);
        self.matrices = updated;
        max_update
    }

    pub fn into_matrices(self) -> Vec<ConfusionMatrix> {
        self.matrices
    }
}

/// Partial majority-vote statistics over a subset of pixels.
struct VoteTally {
    counts: Vec<ConfusionMatrix>,
    votes: Vec<u32>,
    tied_pixels: usize,
}

impl VoteTally {
    fn new(source_count: usize, class_count: usize) -> Self {
        Self {
            counts: vec![ConfusionMatrix::zeros(class_count); source_count],
            votes: vec![0; class_count],
            tied_pixels: 0,
        }
    }

    fn add_pixel<L: Label>(&mut self, sources: &[Volume<L>], pixel: usize) {
        for source in sources {
            self.votes[source[pixel].class_index()] += 1;
        }

        let mut winner = None;
        let mut best = 0;
        let mut tied = false;
        for source in sources {
            let label = source[pixel].class_index();
            let count = self.votes[label];
            if count > best {
                best = count;
                winner = Some(label);
                tied = false;
            } else if count == best && winner != Some(label) {
                tied = true;
            }
        }

        for source in sources {
            self.votes[source[pixel].class_index()] = 0;
        }

        match winner {
            Some(truth) if !tied => {
                for (matrix, source) in self.counts.iter_mut().zip(sources) {
                    matrix.add(truth, source[pixel].class_index(), 1.0);
                }
            }
            _ => self.tied_pixels += 1,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            a.merge(b);
        }
        self.tied_pixels += other.tied_pixels;
        self
    }
}
