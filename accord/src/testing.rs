//! Synthetic fixtures for fusion tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::image::{Dimensions, Volume};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Ground truth made of axis-aligned bands, so every class covers a
/// contiguous share of the volume.
pub fn banded_truth(dimensions: Dimensions, class_count: usize) -> Volume<u8> {
    let width = dimensions.width;
    Volume::from_fn(dimensions, |pixel| {
        let x = pixel % width;
        ((x * class_count) / width) as u8
    })
}

/// Copy of `truth` where each pixel is replaced by a different random label
/// with probability `error_rate`.
pub fn noisy_observer(
    truth: &Volume<u8>,
    class_count: usize,
    error_rate: f64,
    seed: u64,
) -> Volume<u8> {
    assert!(class_count >= 2, "noise needs at least two classes");
    let mut rng = StdRng::seed_from_u64(seed);
    Volume::from_fn(truth.dimensions(), |pixel| {
        let label = truth[pixel];
        if rng.random_bool(error_rate) {
            let shift = rng.random_range(1..class_count) as u8;
            ((label as usize + shift as usize) % class_count) as u8
        } else {
            label
        }
    })
}

/// Fraction of pixels where `a` and `b` agree.
pub fn agreement<T: PartialEq>(a: &Volume<T>, b: &Volume<T>) -> f64 {
    assert_eq!(a.len(), b.len());
    let matching = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matching as f64 / a.len() as f64
}
