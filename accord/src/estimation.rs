//! Confusion matrix re-estimation (M-step).
//!
//! For each source s the new matrix is
//!
//! ```text
//! C_s[k][j] = Σ_p W_k(p) [l_s(p) == j]  /  Σ_p W_k(p)
//! ```
//!
//! over in-mask pixels. The sums are a parallel reduction: each worker
//! accumulates partial count matrices over its pixel range and the partials
//! are added together before the row normalization.

use common::parallel::par_fold_ranges;

use crate::confusion::ConfusionMatrix;
use crate::image::Volume;
use crate::label::Label;
use crate::posterior::PosteriorStore;

#[derive(Debug, Clone)]
pub struct Reestimate {
    pub matrices: Vec<ConfusionMatrix>,
    /// Rows (over all sources) that received no posterior mass and kept
    /// their previous values.
    pub empty_rows: usize,
}

/// Recompute every source's confusion matrix from the current posteriors.
pub fn reestimate_confusion<L: Label>(
    sources: &[Volume<L>],
    mask: Option<&Volume<bool>>,
    posteriors: &PosteriorStore,
    previous: &[ConfusionMatrix],
) -> Reestimate {
    let class_count = posteriors.class_count();
    assert_eq!(previous.len(), sources.len(), "one matrix per source");

    let mut matrices = accumulate_counts(sources, mask, posteriors, class_count);

    let empty_rows = matrices
        .iter_mut()
        .zip(previous)
        .map(|(matrix, old)| matrix.normalize_rows(old))
        .sum();

    Reestimate {
        matrices,
        empty_rows,
    }
}

fn accumulate_counts<L: Label>(
    sources: &[Volume<L>],
    mask: Option<&Volume<bool>>,
    posteriors: &PosteriorStore,
    class_count: usize,
) -> Vec<ConfusionMatrix> {
    par_fold_ranges(
        posteriors.pixel_count(),
        || vec![ConfusionMatrix::zeros(class_count); sources.len()],
        |mut counts, range| {
            for pixel in range {
                if mask.is_some_and(|m| !m[pixel]) {
                    continue;
                }
                let weights = posteriors.pixel(pixel);
                for (matrix, source) in counts.iter_mut().zip(sources) {
                    let observed = source[pixel].class_index();
                    for (truth, &w) in weights.iter().enumerate() {
                        matrix.add(truth, observed, w);
                    }
                }
            }
            counts
        },
        |mut a, b| {
            for (x, y) in a.iter_mut().zip(&b) {
                x.merge(y);
            }
            a
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Dimensions;

    fn volume(labels: &[u8]) -> Volume<u8> {
        Volume::new(Dimensions::new_2d(labels.len(), 1), labels.to_vec())
    }

    #[test]
    fn test_rows_sum_to_one() {
        let sources = [volume(&[0, 1, 1, 0]), volume(&[1, 1, 0, 0])];
        let posteriors = PosteriorStore::from_weights(
            2,
            vec![0.9, 0.1, 0.2, 0.8, 0.5, 0.5, 0.7, 0.3],
        );
        let previous = vec![ConfusionMatrix::identity_like(2, 0.9); 2];
        let result = reestimate_confusion(&sources, None, &posteriors, &previous);
        assert_eq!(result.empty_rows, 0);
        for matrix in &result.matrices {
            assert!(matrix.max_row_sum_error() < 1e-12);
        }
    }

    #[test]
    fn test_hand_computed_counts() {
        // Source 0 reports [0, 1]; posteriors are one-hot on [0, 0].
        let sources = [volume(&[0, 1])];
        let posteriors = PosteriorStore::from_weights(2, vec![1.0, 0.0, 1.0, 0.0]);
        let previous = vec![ConfusionMatrix::identity_like(2, 0.9)];
        let result = reestimate_confusion(&sources, None, &posteriors, &previous);
        let m = &result.matrices[0];
        assert_eq!(m.row(0), &[0.5, 0.5]);
        // No pixel is believed to be class 1: previous row is kept.
        assert_eq!(m.row(1), previous[0].row(1));
        assert_eq!(result.empty_rows, 1);
    }

    #[test]
    fn test_masked_pixels_do_not_contribute() {
        let sources = [volume(&[0, 1])];
        let mask = Volume::new(Dimensions::new_2d(2, 1), vec![true, false]);
        let posteriors = PosteriorStore::from_weights(2, vec![1.0, 0.0, 0.0, 0.0]);
        let previous = vec![ConfusionMatrix::identity_like(2, 0.9)];
        let result = reestimate_confusion(&sources, Some(&mask), &posteriors, &previous);
        assert_eq!(result.matrices[0].row(0), &[1.0, 0.0]);
    }

    #[test]
    fn test_parallel_reduction_matches_serial_sum() {
        let n = 10_000;
        let labels: Vec<u8> = (0..n).map(|i| ((i * 7 + i / 3) % 3) as u8).collect();
        let sources = [volume(&labels)];
        let weights: Vec<f64> = (0..n)
            .flat_map(|i| {
                let a = (i % 5) as f64 / 10.0;
                let b = (i % 3) as f64 / 10.0;
                [a, b, 1.0 - a - b]
            })
            .collect();
        let posteriors = PosteriorStore::from_weights(3, weights);
        let previous = vec![ConfusionMatrix::identity_like(3, 0.9)];
        let result = reestimate_confusion(&sources, None, &posteriors, &previous);

        let mut serial = ConfusionMatrix::zeros(3);
        for (pixel, &label) in labels.iter().enumerate() {
            for truth in 0..3 {
                serial.add(truth, label as usize, posteriors.pixel(pixel)[truth]);
            }
        }
        serial.normalize_rows(&previous[0]);
        assert!(result.matrices[0].max_abs_difference(&serial) < 1e-12);
    }
}
