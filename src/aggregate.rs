//! Loss aggregation, timing and the gradient accumulation schedule.

use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::model::KgeModel;
use crate::query::Slot;
use ndarray::ArrayView2;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Timing bucket of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Prepare,
    Forward,
    Backward,
    Optimizer,
}

/// Wall-clock time spent per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub prepare: Duration,
    pub forward: Duration,
    pub backward: Duration,
    pub optimizer: Duration,
}

impl Timings {
    /// Run `f`, charging its duration to `bucket`.
    pub fn time<T>(&mut self, bucket: Bucket, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        *self.bucket_mut(bucket) += start.elapsed();
        out
    }

    pub fn get(&self, bucket: Bucket) -> Duration {
        match bucket {
            Bucket::Prepare => self.prepare,
            Bucket::Forward => self.forward,
            Bucket::Backward => self.backward,
            Bucket::Optimizer => self.optimizer,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Duration {
        match bucket {
            Bucket::Prepare => &mut self.prepare,
            Bucket::Forward => &mut self.forward,
            Bucket::Backward => &mut self.backward,
            Bucket::Optimizer => &mut self.optimizer,
        }
    }

    pub fn total(&self) -> Duration {
        self.prepare + self.forward + self.backward + self.optimizer
    }

    pub fn add(&mut self, other: &Timings) {
        self.prepare += other.prepare;
        self.forward += other.forward;
        self.backward += other.backward;
        self.optimizer += other.optimizer;
    }
}

/// Outcome of processing one batch, before penalties and the optimizer step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchResult {
    /// Sum of the batch-size-normalized chunk losses.
    pub avg_loss: f32,
    pub size: usize,
    pub prepare_time: Duration,
    pub forward_time: Duration,
    pub backward_time: Duration,
}

impl BatchResult {
    pub fn new(avg_loss: f32, size: usize, timings: &Timings) -> Self {
        Self {
            avg_loss,
            size,
            prepare_time: timings.prepare,
            forward_time: timings.forward,
            backward_time: timings.backward,
        }
    }
}

/// Sums per-chunk losses and pushes their gradients into the model as they come.
///
/// Each contribution is divided by the full batch size, so splitting a batch
/// into chunks (or slots) leaves the summed loss and gradients unchanged.
#[derive(Debug, Clone)]
pub struct LossAccumulator {
    batch_size: usize,
    total: f32,
}

impl LossAccumulator {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size, total: 0.0 }
    }

    /// Compute the loss of one score block and run its backward pass.
    ///
    /// `scores[[r, j]]` must be the score of `triples` row `r` with `slot`
    /// replaced by `targets[[r, j]]`. `num_negatives` is passed on to the loss.
    #[allow(clippy::too_many_arguments)]
    pub fn accumulate<M: KgeModel + ?Sized>(
        &mut self,
        model: &mut M,
        loss: &dyn Loss,
        scores: ArrayView2<'_, f32>,
        labels: ArrayView2<'_, f32>,
        num_negatives: Option<usize>,
        triples: ArrayView2<'_, usize>,
        slot: Slot,
        targets: ArrayView2<'_, usize>,
        timings: &mut Timings,
    ) -> Result<f32> {
        if self.batch_size == 0 {
            return Ok(0.0);
        }
        let scale = 1.0 / self.batch_size as f32;
        let out = timings
            .time(Bucket::Forward, || loss.compute(scores, labels, num_negatives))?
            .scaled(scale);
        timings.time(Bucket::Backward, || {
            model.backward(triples, slot, targets, out.grad.view())
        })?;
        self.total += out.value;
        Ok(out.value)
    }

    /// Summed, normalized loss so far.
    pub fn total(&self) -> f32 {
        self.total
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn finish(self, timings: &Timings) -> BatchResult {
        BatchResult::new(self.total, self.batch_size, timings)
    }
}

/// Gradient accumulation over `update_freq` batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSchedule {
    update_freq: usize,
}

impl UpdateSchedule {
    pub fn new(update_freq: usize) -> Result<Self> {
        if update_freq == 0 {
            return Err(Error::Config("update_freq must be at least 1".into()));
        }
        Ok(Self { update_freq })
    }

    pub fn update_freq(&self) -> usize {
        self.update_freq
    }

    /// Gradients are cleared before batch `i` (counted from the epoch start).
    pub fn zero_grad_due(&self, batch_index: usize) -> bool {
        batch_index % self.update_freq == 0
    }

    /// The optimizer steps after batch `i`.
    pub fn step_due(&self, batch_index: usize) -> bool {
        batch_index % self.update_freq == self.update_freq - 1
    }
}

impl Default for UpdateSchedule {
    fn default() -> Self {
        Self { update_freq: 1 }
    }
}

/// Reject a non-finite cost when `abort_on_nan` is set.
pub fn check_finite(cost: f32, abort_on_nan: bool, epoch: usize, batch: usize) -> Result<()> {
    if cost.is_finite() {
        return Ok(());
    }
    if abort_on_nan {
        return Err(Error::NumericalDivergence { epoch, batch, cost });
    }
    tracing::warn!(epoch, batch, cost, "cost is not finite, continuing");
    Ok(())
}
