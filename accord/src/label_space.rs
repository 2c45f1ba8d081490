//! Label space discovery: number of classes and the undecided label.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::image::Volume;
use crate::label::Label;

/// Largest supported class count. Each source holds a K×K matrix of `f64`,
/// so sparse label values (e.g. instance IDs) must be remapped to a compact
/// range first.
pub const MAX_CLASS_COUNT: usize = 4096;

/// The label space of one fusion run. Fixed once discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSpace {
    /// Number of classes K; classes are `0..K`.
    pub class_count: usize,
    /// Largest label value found in any source.
    pub max_label: u32,
    /// Value written for unresolved ties.
    pub undecided_label: u32,
}

impl LabelSpace {
    /// Determine K from the sources, or check the sources against a declared K.
    ///
    /// The undecided label defaults to K, which is the maximum observed label
    /// plus one when K is discovered.
    pub fn discover<L: Label>(
        sources: &[Volume<L>],
        declared_class_count: Option<usize>,
        undecided_label: Option<u32>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::NoSources);
        }

        let source_maxima: Vec<u32> = sources
            .par_iter()
            .map(|source| {
                source
                    .pixels()
                    .par_iter()
                    .map(|label| label.value())
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let max_label = source_maxima.iter().copied().max().unwrap_or(0);

        let class_count = match declared_class_count {
            Some(0) => return Err(Error::InvalidClassCount(0)),
            Some(declared) => {
                if let Some((source_index, &label)) = source_maxima
                    .iter()
                    .enumerate()
                    .find(|&(_, &max)| max as usize >= declared)
                {
                    return Err(Error::LabelOutOfRange {
                        source_index,
                        label,
                        class_count: declared,
                    });
                }
                declared
            }
            None => max_label as usize + 1,
        };
        if class_count > MAX_CLASS_COUNT {
            return Err(Error::TooManyClasses {
                class_count,
                max: MAX_CLASS_COUNT,
            });
        }

        let undecided_label = match undecided_label {
            Some(label) => label,
            None => u32::try_from(class_count).map_err(|_| Error::UnrepresentableLabel {
                value: class_count as u64,
                max: u32::MAX,
            })?,
        };

        tracing::debug!(class_count, max_label, undecided_label, "Label space discovered");

        Ok(Self {
            class_count,
            max_label,
            undecided_label,
        })
    }
}
