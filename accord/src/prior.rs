//! Class prior probabilities.
//!
//! Priors are either supplied by the caller (a global vector, per-pixel
//! volumes, or both) or estimated once from label frequencies. They are
//! read-only for the rest of the run.

use common::parallel::par_fold_ranges;

use crate::image::Volume;
use crate::label::Label;

/// Smallest prior an estimated class may receive. Classes that never occur
/// in the inputs would otherwise get a zero prior and could never win the
/// posterior, whatever the sources report.
pub const PRIOR_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct PriorModel<'a> {
    global: Vec<f64>,
    images: Option<&'a [Volume<f32>]>,
}

impl<'a> PriorModel<'a> {
    /// Use the caller's global vector verbatim, or estimate one from the
    /// sources. Per-pixel volumes, when given, override the global vector at
    /// every pixel.
    pub fn new<L: Label>(
        supplied: Option<&[f64]>,
        images: Option<&'a [Volume<f32>]>,
        sources: &[Volume<L>],
        mask: Option<&Volume<bool>>,
        class_count: usize,
    ) -> Self {
        let global = match supplied {
            Some(priors) => priors.to_vec(),
            None => estimate_priors(sources, mask, class_count),
        };
        debug_assert_eq!(global.len(), class_count);
        Self { global, images }
    }

    pub fn class_count(&self) -> usize {
        self.global.len()
    }

    pub fn global(&self) -> &[f64] {
        &self.global
    }

    pub fn has_pixel_priors(&self) -> bool {
        self.images.is_some()
    }

    /// Prior of `class` at `pixel`.
    #[inline]
    pub fn prior(&self, pixel: usize, class: usize) -> f64 {
        match self.images {
            Some(images) => images[class][pixel] as f64,
            None => self.global[class],
        }
    }
}

/// Relative label frequencies over all sources and all in-mask pixels,
/// floored at [`PRIOR_FLOOR`] and renormalized.
pub fn estimate_priors<L: Label>(
    sources: &[Volume<L>],
    mask: Option<&Volume<bool>>,
    class_count: usize,
) -> Vec<f64> {
    let pixel_count = sources.first().map_or(0, |s| s.len());

    let counts = par_fold_ranges(
        pixel_count,
        || vec![0u64; class_count],
        |mut counts, range| {
            for pixel in range {
                if mask.is_some_and(|m| !m[pixel]) {
                    continue;
                }
                for source in sources {
                    counts[source[pixel].class_index()] += 1;
                }
            }
            counts
        },
        |mut a, b| {
            a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
            a
        },
    );

    let total: u64 = counts.iter().sum();
    if total == 0 {
        return vec![1.0 / class_count as f64; class_count];
    }

    let mut priors: Vec<f64> = counts
        .iter()
        .map(|&c| (c as f64 / total as f64).max(PRIOR_FLOOR))
        .collect();
    let floored = counts.iter().filter(|&&c| (c as f64 / total as f64) < PRIOR_FLOOR).count();
    if floored > 0 {
        tracing::debug!(floored, "Raised rare or absent classes to the prior floor");
    }

    let sum: f64 = priors.iter().sum();
    priors.iter_mut().for_each(|p| *p /= sum);
    priors
}
