//! Negative sampling training.

use super::{check_vocabulary, BatchProcessor};
use crate::aggregate::{BatchResult, Timings};
use crate::config::TrainConfig;
use crate::dataset::{select_rows, Dataset};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::model::KgeModel;
use crate::sampler::{NegativeSampleSet, NegativeSampler};
use crate::scorer::NegativeSamplingScorer;
use ndarray::{Array2, ArrayView2};
use std::sync::Arc;

/// True triples of a batch and the negatives drawn for them.
#[derive(Debug, Clone, PartialEq)]
pub struct NegativeSamplingBatch {
    pub triples: Array2<usize>,
    pub negatives: NegativeSampleSet,
}

/// One example per fact of the training split.
#[derive(Debug, Clone)]
pub struct NegativeSamplingProcessor<S: NegativeSampler> {
    facts: Arc<Array2<usize>>,
    sampler: S,
    scorer: NegativeSamplingScorer,
}

impl<S: NegativeSampler> NegativeSamplingProcessor<S> {
    pub fn new<M: KgeModel + ?Sized>(
        config: &TrainConfig,
        dataset: &Dataset,
        sampler: S,
        model: &M,
    ) -> Result<Self> {
        let num_samples = sampler.num_samples_spo();
        if num_samples.iter().all(|&k| k == 0) {
            return Err(Error::Config("sampler draws no negatives for any slot".into()));
        }
        check_vocabulary(dataset, model)?;
        let facts = Arc::clone(dataset.split(&config.split)?);
        let scorer = NegativeSamplingScorer::for_model(
            config.negative_sampling.implementation,
            num_samples,
            sampler.shared(),
            config.negative_sampling.chunk_size,
            model,
        )?;
        Ok(Self { facts, sampler, scorer })
    }

    pub fn scorer(&self) -> &NegativeSamplingScorer {
        &self.scorer
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }
}

impl<M: KgeModel + ?Sized, S: NegativeSampler> BatchProcessor<M> for NegativeSamplingProcessor<S> {
    type Batch = NegativeSamplingBatch;

    fn name(&self) -> &'static str {
        "negative_sampling"
    }

    fn num_examples(&self) -> usize {
        self.facts.nrows()
    }

    fn collate(&mut self, examples: &[usize]) -> Result<NegativeSamplingBatch> {
        if let Some(&bad) = examples.iter().find(|&&e| e >= self.facts.nrows()) {
            return Err(Error::Validation(format!(
                "example index {} out of range ({} facts)",
                bad,
                self.facts.nrows()
            )));
        }
        let triples = select_rows(self.facts.view(), examples);
        let negatives = NegativeSampleSet::draw(&mut self.sampler, triples.view());
        Ok(NegativeSamplingBatch { triples, negatives })
    }

    fn process_batch(
        &mut self,
        _batch_index: usize,
        batch: &NegativeSamplingBatch,
        model: &mut M,
        loss: &dyn Loss,
        timings: &mut Timings,
    ) -> Result<BatchResult> {
        self.scorer
            .process(model, loss, batch.triples.view(), &batch.negatives, timings)
    }

    fn batch_triples<'b>(&self, batch: &'b NegativeSamplingBatch) -> ArrayView2<'b, usize> {
        batch.triples.view()
    }
}
