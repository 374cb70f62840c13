//! 1vsAll training: each fact scored against all subjects and all objects.

use super::{check_vocabulary, vocabulary_targets, BatchProcessor};
use crate::aggregate::{BatchResult, Bucket, LossAccumulator, Timings};
use crate::config::TrainConfig;
use crate::dataset::{select_rows, Dataset};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::model::KgeModel;
use crate::query::Slot;
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;

/// One example per fact; the true subject and object are the only positives.
#[derive(Debug, Clone)]
pub struct OneVsAllProcessor {
    facts: Arc<Array2<usize>>,
}

impl OneVsAllProcessor {
    pub fn new<M: KgeModel + ?Sized>(
        config: &TrainConfig,
        dataset: &Dataset,
        model: &M,
    ) -> Result<Self> {
        if !model.supports_score_all() {
            return Err(Error::UnsupportedOperation(
                "1vsAll training needs a model that scores against all targets".into(),
            ));
        }
        check_vocabulary(dataset, model)?;
        let facts = Arc::clone(dataset.split(&config.split)?);
        tracing::info!(facts = facts.nrows(), "initialized 1vsAll processor");
        Ok(Self { facts })
    }
}

/// `[n, vocab]` with a single 1 per row at `triples[r, slot]`.
fn one_hot(triples: ArrayView2<'_, usize>, slot: Slot, vocab: usize) -> Array2<f32> {
    let mut labels = Array2::zeros((triples.nrows(), vocab));
    for (r, triple) in triples.outer_iter().enumerate() {
        labels[[r, triple[slot.column()]]] = 1.0;
    }
    labels
}

impl<M: KgeModel + ?Sized> BatchProcessor<M> for OneVsAllProcessor {
    type Batch = Array2<usize>;

    fn name(&self) -> &'static str {
        "1vsAll"
    }

    fn num_examples(&self) -> usize {
        self.facts.nrows()
    }

    fn collate(&mut self, examples: &[usize]) -> Result<Array2<usize>> {
        if let Some(&bad) = examples.iter().find(|&&e| e >= self.facts.nrows()) {
            return Err(Error::Validation(format!(
                "example index {} out of range ({} facts)",
                bad,
                self.facts.nrows()
            )));
        }
        Ok(select_rows(self.facts.view(), examples))
    }

    fn process_batch(
        &mut self,
        _batch_index: usize,
        batch: &Array2<usize>,
        model: &mut M,
        loss: &dyn Loss,
        timings: &mut Timings,
    ) -> Result<BatchResult> {
        let mut acc = LossAccumulator::new(batch.nrows());
        for slot in [Slot::Object, Slot::Subject] {
            let vocab = model.vocab_size(slot);
            let (labels, targets) = timings.time(Bucket::Prepare, || {
                (one_hot(batch.view(), slot, vocab), vocabulary_targets(batch.nrows(), vocab))
            });
            let scores = timings.time(Bucket::Forward, || model.score_all(batch.view(), slot))?;
            acc.accumulate(
                model,
                loss,
                scores.view(),
                labels.view(),
                None,
                batch.view(),
                slot,
                targets.view(),
                timings,
            )?;
        }
        Ok(acc.finish(timings))
    }

    fn batch_triples<'b>(&self, batch: &'b Array2<usize>) -> ArrayView2<'b, usize> {
        batch.view()
    }
}
