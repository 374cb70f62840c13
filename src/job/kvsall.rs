//! KvsAll training: every query key against every possible target.

use super::{check_vocabulary, vocabulary_targets, BatchProcessor};
use crate::aggregate::{BatchResult, Bucket, LossAccumulator, Timings};
use crate::collate::{KvsAllBatch, KvsAllExamples, LabelSmoothing};
use crate::config::TrainConfig;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::index::KvsAllIndex;
use crate::loss::Loss;
use crate::model::KgeModel;
use crate::query::QueryType;
use ndarray::{ArrayView2, Axis};
use std::sync::Arc;

/// Multi-label batches over the enabled query types.
#[derive(Debug, Clone)]
pub struct KvsAllProcessor {
    examples: KvsAllExamples,
    query_types: Vec<QueryType>,
    smoothing: LabelSmoothing,
}

impl KvsAllProcessor {
    pub fn new<M: KgeModel + ?Sized>(
        config: &TrainConfig,
        dataset: &Dataset,
        model: &M,
    ) -> Result<Self> {
        if !model.supports_score_all() {
            return Err(Error::UnsupportedOperation(
                "KvsAll training needs a model that scores against all targets".into(),
            ));
        }
        check_vocabulary(dataset, model)?;
        let query_types = config.kvsall.query_types.clone();
        if query_types.is_empty() {
            return Err(Error::Config("KvsAll needs at least one query type".into()));
        }

        let mut indexes = Vec::with_capacity(query_types.len());
        for &query_type in &query_types {
            let index = dataset.index(&config.split, query_type)?;
            indexes.push(Arc::new(KvsAllIndex::from_fact_index(index)));
        }
        let examples = KvsAllExamples::new(indexes);

        let smoothing = LabelSmoothing::resolve(
            config.kvsall.label_smoothing,
            dataset.num_entities(),
            config.auto_correct,
        )?;

        for (query_type, end) in query_types.iter().zip(examples.query_end_index()) {
            tracing::info!(
                query_type = %query_type,
                query_end_index = end,
                "KvsAll query type enabled"
            );
        }
        Ok(Self { examples, query_types, smoothing })
    }

    pub fn examples(&self) -> &KvsAllExamples {
        &self.examples
    }

    pub fn label_smoothing(&self) -> LabelSmoothing {
        self.smoothing
    }
}

impl<M: KgeModel + ?Sized> BatchProcessor<M> for KvsAllProcessor {
    type Batch = KvsAllBatch;

    fn name(&self) -> &'static str {
        "KvsAll"
    }

    fn num_examples(&self) -> usize {
        self.examples.num_examples()
    }

    fn collate(&mut self, examples: &[usize]) -> Result<KvsAllBatch> {
        self.examples.collate(examples)
    }

    fn process_batch(
        &mut self,
        _batch_index: usize,
        batch: &KvsAllBatch,
        model: &mut M,
        loss: &dyn Loss,
        timings: &mut Timings,
    ) -> Result<BatchResult> {
        let mut acc = LossAccumulator::new(batch.len());

        for (t, &query_type) in self.query_types.iter().enumerate() {
            let rows = timings.time(Bucket::Prepare, || batch.rows_of_type(t));
            if rows.is_empty() {
                continue;
            }
            let slot = query_type.target_slot();
            let vocab = model.vocab_size(slot);

            let (triples, labels, targets) = timings.time(Bucket::Prepare, || {
                let queries = batch.queries.select(Axis(0), &rows);
                let triples = query_type.query_triples(queries.view());
                let mut labels = batch.dense_labels(&rows, vocab);
                if slot.is_entity() {
                    self.smoothing.apply(&mut labels);
                }
                (triples, labels, vocabulary_targets(rows.len(), vocab))
            });

            let scores = timings.time(Bucket::Forward, || model.score_all(triples.view(), slot))?;
            acc.accumulate(
                model,
                loss,
                scores.view(),
                labels.view(),
                None,
                triples.view(),
                slot,
                targets.view(),
                timings,
            )?;
        }
        Ok(acc.finish(timings))
    }

    fn batch_triples<'b>(&self, batch: &'b KvsAllBatch) -> ArrayView2<'b, usize> {
        batch.triples.view()
    }
}
