//! Memory-bounded negative sampling loss.
//!
//! A batch is cut into contiguous chunks of at most `max_chunk_size` triples.
//! For every chunk and every slot with negatives the scorer builds the score
//! matrix, computes the loss and runs backward before moving on, so only one
//! chunk's scores are alive at a time.

use crate::aggregate::{BatchResult, Bucket, LossAccumulator, Timings};
use crate::error::Result;
use crate::loss::Loss;
use crate::model::KgeModel;
use crate::query::Slot;
use crate::sampler::NegativeSampleSet;
use crate::strategy::{ScoringStrategy, StrategyChoice};
use ndarray::{s, Array2, ArrayView2};
use std::ops::Range;

/// Split `0..batch_size` into contiguous ranges of at most `max_chunk_size`.
///
/// `max_chunk_size == 0` means no limit.
pub fn chunk_ranges(batch_size: usize, max_chunk_size: usize) -> Vec<Range<usize>> {
    if batch_size == 0 {
        return Vec::new();
    }
    let chunk = if max_chunk_size == 0 { batch_size } else { max_chunk_size };
    (0..batch_size.div_ceil(chunk))
        .map(|i| i * chunk..((i + 1) * chunk).min(batch_size))
        .collect()
}

/// `[n, 1 + k]` labels with the positive in column 0.
fn positive_first_labels(n: usize, k: usize) -> Array2<f32> {
    let mut labels = Array2::zeros((n, 1 + k));
    labels.column_mut(0).fill(1.0);
    labels
}

/// Scores and backpropagates a batch of positives against their negatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeSamplingScorer {
    strategy: ScoringStrategy,
    max_chunk_size: usize,
}

impl NegativeSamplingScorer {
    pub fn new(strategy: ScoringStrategy, max_chunk_size: usize) -> Self {
        Self { strategy, max_chunk_size }
    }

    /// Resolve `choice` for the given sampler setup and check the model supports it.
    pub fn for_model<M: KgeModel + ?Sized>(
        choice: StrategyChoice,
        num_samples: [usize; 3],
        shared: bool,
        max_chunk_size: usize,
        model: &M,
    ) -> Result<Self> {
        let strategy = choice.resolve(num_samples, shared);
        strategy.ensure_supported(model)?;
        tracing::info!(
            implementation = %strategy,
            chunk_size = max_chunk_size,
            "initialized negative sampling scorer"
        );
        Ok(Self::new(strategy, max_chunk_size))
    }

    pub fn strategy(&self) -> ScoringStrategy {
        self.strategy
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Process one batch of true `triples` with their `negatives`.
    ///
    /// Gradients are accumulated into the model; nothing is zeroed here.
    pub fn process<M: KgeModel + ?Sized>(
        &self,
        model: &mut M,
        loss: &dyn Loss,
        triples: ArrayView2<'_, usize>,
        negatives: &NegativeSampleSet,
        timings: &mut Timings,
    ) -> Result<BatchResult> {
        let batch_size = triples.nrows();
        let mut acc = LossAccumulator::new(batch_size);

        for range in chunk_ranges(batch_size, self.max_chunk_size) {
            let chunk = triples.slice(s![range.clone(), ..]);
            for slot in Slot::SPO {
                let k = negatives.num_samples(slot);
                if k == 0 {
                    continue;
                }
                let negs = negatives.slot(slot).slice_move(s![range.clone(), ..]);
                let labels =
                    timings.time(Bucket::Prepare, || positive_first_labels(range.len(), k));
                let matrix = timings.time(Bucket::Forward, || {
                    self.strategy.score_chunk(&*model, chunk, negs, slot)
                })?;
                acc.accumulate(
                    model,
                    loss,
                    matrix.scores.view(),
                    labels.view(),
                    Some(k),
                    chunk,
                    slot,
                    matrix.targets.view(),
                    timings,
                )?;
            }
        }
        Ok(acc.finish(timings))
    }
}
