//! Parallel processing utilities.
//!
//! Thin helpers over rayon for per-pixel workloads: record-aligned mutable
//! chunks for pixel-local writes, and a chunked fold/reduce for accumulations
//! whose partial results can be merged in any order.

use std::ops::Range;

use rayon::prelude::*;

/// Multiplier for number of chunks relative to worker threads.
/// 3x threads keeps workers busy when some chunks finish early.
const CHUNKS_PER_THREAD: usize = 3;

/// Compute a chunk size that splits `len` items into a few chunks per thread.
#[inline]
pub fn auto_chunk_size(len: usize) -> usize {
    let num_chunks = rayon::current_num_threads() * CHUNKS_PER_THREAD;
    (len / num_chunks).max(1)
}

/// Extension trait for slices made of fixed-size records (e.g. one
/// probability vector per pixel).
pub trait ParRecordsMut<'a, T: Send + 'a> {
    /// Split into mutable parallel chunks that contain whole records only.
    ///
    /// Yields `(first_record, chunk)` pairs, where `first_record` is the index
    /// of the first record stored in `chunk`.
    fn par_records_mut_auto(
        &'a mut self,
        record_len: usize,
    ) -> impl IndexedParallelIterator<Item = (usize, &'a mut [T])>;
}

impl<'a, T: Send + 'a> ParRecordsMut<'a, T> for [T] {
    fn par_records_mut_auto(
        &'a mut self,
        record_len: usize,
    ) -> impl IndexedParallelIterator<Item = (usize, &'a mut [T])> {
        assert!(record_len > 0, "record_len must be > 0");
        assert_eq!(
            self.len() % record_len,
            0,
            "slice length must be a multiple of record_len"
        );
        let records = self.len() / record_len;
        let chunk_records = auto_chunk_size(records);
        self.par_chunks_mut(record_len * chunk_records)
            .enumerate()
            .map(move |(idx, chunk)| (idx * chunk_records, chunk))
    }
}

/// Fold the index range `0..len` in parallel and merge the partial results.
///
/// The range is cut into contiguous sub-ranges; each one is folded into a
/// fresh accumulator from `identity` in parallel. The accumulators are then
/// combined with `reduce` in range order, so floating-point sums are
/// reproducible for a given thread count.
pub fn par_fold_ranges<A, Id, F, R>(len: usize, identity: Id, fold: F, reduce: R) -> A
where
    A: Send,
    Id: Fn() -> A + Sync + Send,
    F: Fn(A, Range<usize>) -> A + Sync + Send,
    R: Fn(A, A) -> A,
{
    let chunk = auto_chunk_size(len);
    let chunks = len.div_ceil(chunk);
    let partials: Vec<A> = (0..chunks)
        .into_par_iter()
        .map(|i| {
            let start = i * chunk;
            fold(identity(), start..(start + chunk).min(len))
        })
        .collect();
    partials.into_iter().reduce(reduce).unwrap_or_else(identity)
}
