//! The scoring collaborator consumed by the training core.
//!
//! Models are abstracted at the model level, not the tensor level: each
//! implementation keeps its parameters however it likes and exposes three
//! call shapes plus an explicit gradient entry point.
//!
//! | Call | Shape | Used by |
//! |------|-------|---------|
//! | [`KgeModel::score_triples`] | `[n]` | `triple` strategy |
//! | [`KgeModel::score_all`] | `[n, vocab(slot)]` | `all` strategy, KvsAll, 1vsAll |
//! | [`KgeModel::score_subset`] | `[n, targets.len()]` | `batch` strategy |
//!
//! Every score the trainer uses is the score of a triple whose `slot` column
//! was replaced by some target. Gradients therefore come back in one format,
//! `backward(triples, slot, targets, grad)`, whichever call produced them.

use crate::error::{Error, Result};
use crate::query::Slot;
use ndarray::{Array1, Array2, ArrayView2};

/// A named parameter matrix and its accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: &'static str,
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Parameter {
    pub fn new(name: &'static str, value: Array2<f32>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self { name, value, grad }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// What a penalty term may depend on.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyContext<'a> {
    pub epoch: usize,
    pub batch_index: usize,
    pub num_batches: usize,
    /// True triples of the current batch.
    pub triples: ArrayView2<'a, usize>,
}

/// A named regularization value.
#[derive(Debug, Clone, PartialEq)]
pub struct Penalty {
    pub name: String,
    pub value: f32,
}

/// Knowledge graph embedding model as seen by the training core.
pub trait KgeModel {
    fn num_entities(&self) -> usize;

    fn num_relations(&self) -> usize;

    /// Number of values a slot can take.
    fn vocab_size(&self, slot: Slot) -> usize {
        match slot {
            Slot::Predicate => self.num_relations(),
            _ => self.num_entities(),
        }
    }

    /// Score each row of `[n, 3]` (or wider) triples.
    fn score_triples(&self, triples: ArrayView2<'_, usize>) -> Result<Array1<f32>>;

    /// Whether [`score_all`](Self::score_all) is implemented.
    fn supports_score_all(&self) -> bool {
        false
    }

    /// Whether [`score_subset`](Self::score_subset) is implemented and scales with
    /// the subset size rather than the vocabulary.
    fn supports_score_subset(&self) -> bool {
        false
    }

    /// Score every row against the whole vocabulary of `slot`: `[n, vocab_size(slot)]`.
    ///
    /// The value stored in the `slot` column of `triples` is ignored.
    fn score_all(&self, _triples: ArrayView2<'_, usize>, slot: Slot) -> Result<Array2<f32>> {
        Err(Error::UnsupportedOperation(format!(
            "score against all targets of slot {}",
            slot
        )))
    }

    /// Score every row against `targets` in `slot`: `[n, targets.len()]`.
    fn score_subset(
        &self,
        _triples: ArrayView2<'_, usize>,
        slot: Slot,
        _targets: &[usize],
    ) -> Result<Array2<f32>> {
        Err(Error::UnsupportedOperation(format!(
            "score against a target subset of slot {}",
            slot
        )))
    }

    /// Accumulate `dL/dscore` into the parameter gradients.
    ///
    /// `grad[[r, j]]` is the gradient for the score of row `r` of `triples` with
    /// its `slot` column replaced by `targets[[r, j]]`.
    fn backward(
        &mut self,
        triples: ArrayView2<'_, usize>,
        slot: Slot,
        targets: ArrayView2<'_, usize>,
        grad: ArrayView2<'_, f32>,
    ) -> Result<()>;

    /// Regularization terms for the current batch.
    fn penalty(&self, _ctx: &PenaltyContext<'_>) -> Vec<Penalty> {
        Vec::new()
    }

    /// Accumulate the gradients of [`penalty`](Self::penalty).
    fn backward_penalty(&mut self, _ctx: &PenaltyContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Trainable parameters.
    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn zero_grad(&mut self) {
        for param in self.parameters_mut() {
            param.zero_grad();
        }
    }
}
