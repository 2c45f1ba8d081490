//! Decision and output stage: hard labels and probability volumes.

use rayon::prelude::*;

use crate::config::TieBreak;
use crate::error::{Error, Result};
use crate::image::{Dimensions, Volume};
use crate::label::Label;
use crate::posterior::PosteriorStore;

/// Classes whose posterior lies within this distance of the maximum count as
/// tied with it.
pub const TIE_TOLERANCE: f64 = 1e-10;

/// Outcome of the argmax at one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    Class(usize),
    Undecided,
}

/// Maps posteriors to output labels of type `O`.
#[derive(Debug, Clone)]
pub struct DecisionRule<O: Label> {
    tie_break: TieBreak,
    /// Tie-break rank per class; lower wins.
    preference: Vec<usize>,
    class_labels: Vec<O>,
    /// Present only with [`TieBreak::Undecided`].
    undecided: Option<O>,
}

impl<O: Label> DecisionRule<O> {
    /// Check that every class and every source label that may be copied
    /// verbatim (up to `max_input_label`) fit `O`. The undecided label must
    /// fit as well when ties resolve to it.
    pub fn new(
        class_count: usize,
        tie_break: TieBreak,
        preference: Option<&[usize]>,
        undecided_label: u32,
        max_input_label: u32,
    ) -> Result<Self> {
        let class_labels = (0..class_count)
            .map(|k| {
                u32::try_from(k)
                    .ok()
                    .and_then(O::from_value)
                    .ok_or(Error::UnrepresentableLabel {
                        value: k as u64,
                        max: O::MAX_VALUE,
                    })
            })
            .collect::<Result<Vec<O>>>()?;
        let undecided = match tie_break {
            TieBreak::Preference => None,
            TieBreak::Undecided => Some(O::from_value(undecided_label).ok_or(
                Error::UnrepresentableLabel {
                    value: undecided_label as u64,
                    max: O::MAX_VALUE,
                },
            )?),
        };
        if max_input_label > O::MAX_VALUE {
            return Err(Error::UnrepresentableLabel {
                value: max_input_label as u64,
                max: O::MAX_VALUE,
            });
        }

        let preference = match preference {
            Some(p) => p.to_vec(),
            None => (0..class_count).collect(),
        };
        debug_assert_eq!(preference.len(), class_count);

        Ok(Self {
            tie_break,
            preference,
            class_labels,
            undecided,
        })
    }

    /// Argmax over `weights` with the configured tie handling.
    pub fn pick(&self, weights: &[f64]) -> Pick {
        let max_w = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut tied = 0;
        let mut preferred = 0;
        for (class, &w) in weights.iter().enumerate() {
            if w >= max_w - TIE_TOLERANCE {
                if tied == 0 || self.preference[class] < self.preference[preferred] {
                    preferred = class;
                }
                tied += 1;
            }
        }

        match (tied, self.tie_break) {
            (1, _) | (_, TieBreak::Preference) => Pick::Class(preferred),
            (_, TieBreak::Undecided) => Pick::Undecided,
        }
    }

    fn output(&self, pick: Pick) -> O {
        match pick {
            Pick::Class(k) => self.class_labels[k],
            // `pick` yields `Undecided` only under `TieBreak::Undecided`.
            Pick::Undecided => self.undecided.unwrap_or(self.class_labels[0]),
        }
    }

    /// Hard label for every pixel. Masked-out pixels copy `first_source`.
    pub fn decide<I: Label>(
        &self,
        posteriors: &PosteriorStore,
        first_source: &Volume<I>,
        mask: Option<&Volume<bool>>,
    ) -> Volume<O> {
        let pixels: Vec<O> = (0..posteriors.pixel_count())
            .into_par_iter()
            .map(|pixel| {
                if mask.is_some_and(|m| !m[pixel]) {
                    // Bounded by `max_input_label`, checked in `new`.
                    O::from_value(first_source[pixel].value()).unwrap_or(self.class_labels[0])
                } else {
                    self.output(self.pick(posteriors.pixel(pixel)))
                }
            })
            .collect();
        Volume::new(first_source.dimensions(), pixels)
    }
}

/// One `f32` volume per class holding that class's posterior.
pub fn probability_volumes(
    posteriors: &PosteriorStore,
    dimensions: Dimensions,
) -> Vec<Volume<f32>> {
    debug_assert_eq!(posteriors.pixel_count(), dimensions.pixel_count());
    (0..posteriors.class_count())
        .into_par_iter()
        .map(|class| Volume::from_fn(dimensions, |pixel| posteriors.pixel(pixel)[class] as f32))
        .collect()
}
