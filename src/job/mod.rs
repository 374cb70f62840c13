//! Training job driver.
//!
//! A [`TrainingJob`] owns the model and delegates everything that depends on
//! the training type to a [`BatchProcessor`]:
//!
//! ```text
//! epoch:  shuffle example indices, cut into batches of batch_size
//! batch:  pre_batch hooks
//!         collate                         (prepare)
//!         zero_grad if i % update_freq == 0
//!         process_batch                   (prepare / forward / backward)
//!         penalty + backward_penalty      (forward / backward)
//!         cost = avg_loss + penalty, abort if not finite
//!         optimizer step if i % update_freq == update_freq - 1
//!         post_batch_trace hooks
//! end:    post_epoch_trace hooks, post_epoch hooks
//! ```
//!
//! Batches left over at the end of an epoch whose accumulated gradients did
//! not reach an optimizer step are cleared by the first batch of the next epoch.

pub mod kvsall;
pub mod negative_sampling;
pub mod observer;
pub mod one_vs_all;

pub use kvsall::KvsAllProcessor;
pub use negative_sampling::{NegativeSamplingBatch, NegativeSamplingProcessor};
pub use observer::{BatchTrace, EpochTrace, JsonLinesTrace, TraceLogger, TrainingObserver};
pub use one_vs_all::OneVsAllProcessor;

use crate::aggregate::{check_finite, BatchResult, Bucket, Timings, UpdateSchedule};
use crate::config::{TraceLevel, TrainConfig, TrainType};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::model::{KgeModel, PenaltyContext};
use crate::optimizer::Optimizer;
use crate::query::QueryType;
use crate::sampler::UniformSampler;
use ndarray::{Array2, ArrayView2};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Training-type specific batch construction and loss computation.
pub trait BatchProcessor<M: KgeModel + ?Sized> {
    type Batch;

    /// Name used in traces.
    fn name(&self) -> &'static str;

    /// Size of the example space of one epoch.
    fn num_examples(&self) -> usize;

    /// Build a batch from example indices.
    fn collate(&mut self, examples: &[usize]) -> Result<Self::Batch>;

    /// Compute the batch loss and accumulate its gradients into `model`.
    fn process_batch(
        &mut self,
        batch_index: usize,
        batch: &Self::Batch,
        model: &mut M,
        loss: &dyn Loss,
        timings: &mut Timings,
    ) -> Result<BatchResult>;

    /// True triples of a batch, handed to penalty terms.
    fn batch_triples<'b>(&self, batch: &'b Self::Batch) -> ArrayView2<'b, usize>;
}

/// Fails unless the model scores exactly the dataset's vocabulary in every slot.
pub(crate) fn check_vocabulary<M: KgeModel + ?Sized>(dataset: &Dataset, model: &M) -> Result<()> {
    for query_type in QueryType::ALL {
        let slot = query_type.target_slot();
        let (expected, actual) = (dataset.num_targets(query_type), model.vocab_size(slot));
        if expected != actual {
            return Err(Error::Config(format!(
                "model has {} {} targets, dataset has {}",
                actual, slot, expected
            )));
        }
    }
    Ok(())
}

/// `[n, vocab]` targets `0..vocab` on every row.
pub(crate) fn vocabulary_targets(n: usize, vocab: usize) -> Array2<usize> {
    Array2::from_shape_fn((n, vocab), |(_, j)| j)
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// Epoch loop over a model and a batch processor.
pub struct TrainingJob<M: KgeModel, P: BatchProcessor<M>> {
    config: TrainConfig,
    model: M,
    processor: P,
    loss: Box<dyn Loss>,
    optimizer: Box<dyn Optimizer>,
    observers: Vec<Box<dyn TrainingObserver>>,
    schedule: UpdateSchedule,
    epoch: usize,
    rng: XorShiftRng,
}

impl<M: KgeModel, P: BatchProcessor<M>> TrainingJob<M, P> {
    /// Loss and optimizer come from `config`; override with the `with_*` methods.
    pub fn new(config: TrainConfig, model: M, processor: P) -> Result<Self> {
        config.validate()?;
        let schedule = UpdateSchedule::new(config.update_freq)?;
        let loss: Box<dyn Loss> = Box::new(config.loss);
        let optimizer = config.optimizer.kind.build(config.optimizer.lr);
        let rng = XorShiftRng::seed_from_u64(config.seed);
        tracing::info!(
            job = processor.name(),
            examples = processor.num_examples(),
            batch_size = config.batch_size,
            update_freq = config.update_freq,
            loss = loss.name(),
            "initialized training job"
        );
        Ok(Self {
            config,
            model,
            processor,
            loss,
            optimizer,
            observers: Vec::new(),
            schedule,
            epoch: 0,
            rng,
        })
    }

    pub fn with_loss(mut self, loss: Box<dyn Loss>) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Register an observer. Observers run in registration order.
    pub fn with_observer(mut self, observer: Box<dyn TrainingObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Number of completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Train until `max_epochs` is reached.
    pub fn run(&mut self) -> Result<Vec<EpochTrace>> {
        let mut traces = Vec::new();
        while self.epoch < self.config.max_epochs {
            traces.push(self.run_epoch()?);
        }
        tracing::info!(epochs = self.epoch, "maximum number of epochs reached");
        Ok(traces)
    }

    /// Run one epoch over a freshly shuffled example order.
    pub fn run_epoch(&mut self) -> Result<EpochTrace> {
        self.epoch += 1;
        let epoch = self.epoch;
        let epoch_start = Instant::now();

        let num_examples = self.processor.num_examples();
        let mut order: Vec<usize> = (0..num_examples).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }
        let batch_size = self.config.batch_size;
        let num_batches = num_examples.div_ceil(batch_size);

        let mut epoch_timings = Timings::default();
        let mut sum_loss = 0.0f32;
        let mut sum_penalty = 0.0f32;
        let mut sum_penalties: BTreeMap<String, f32> = BTreeMap::new();

        for (batch_index, examples) in order.chunks(batch_size).enumerate() {
            for observer in &mut self.observers {
                observer.pre_batch(epoch, batch_index)?;
            }
            let mut timings = Timings::default();
            let batch = timings.time(Bucket::Prepare, || self.processor.collate(examples))?;

            if self.schedule.zero_grad_due(batch_index) {
                self.model.zero_grad();
            }
            let result = self.processor.process_batch(
                batch_index,
                &batch,
                &mut self.model,
                self.loss.as_ref(),
                &mut timings,
            )?;

            let ctx = PenaltyContext {
                epoch,
                batch_index,
                num_batches,
                triples: self.processor.batch_triples(&batch),
            };
            let penalties = timings.time(Bucket::Forward, || self.model.penalty(&ctx));
            timings.time(Bucket::Backward, || self.model.backward_penalty(&ctx))?;
            let penalty: f32 = penalties.iter().map(|p| p.value).sum();

            let cost = result.avg_loss + penalty;
            check_finite(cost, self.config.abort_on_nan, epoch, batch_index)?;

            if self.schedule.step_due(batch_index) {
                timings.time(Bucket::Optimizer, || {
                    self.optimizer.step(self.model.parameters_mut())
                })?;
            }

            sum_loss += result.avg_loss * result.size as f32;
            sum_penalty += penalty;
            for p in &penalties {
                *sum_penalties.entry(p.name.clone()).or_insert(0.0) += p.value;
            }
            epoch_timings.add(&timings);

            if self.config.trace_level == TraceLevel::Batch {
                let mut trace = BatchTrace {
                    kind: "batch",
                    job: self.processor.name(),
                    epoch,
                    batch: batch_index,
                    size: result.size,
                    batches: num_batches,
                    lr: self.optimizer.learning_rate(),
                    avg_loss: result.avg_loss,
                    penalties: penalties.into_iter().map(|p| (p.name, p.value)).collect(),
                    penalty,
                    cost,
                    prepare_time: secs(timings.prepare),
                    forward_time: secs(timings.forward),
                    backward_time: secs(timings.backward),
                    optimizer_time: secs(timings.optimizer),
                };
                for observer in &mut self.observers {
                    observer.post_batch_trace(&mut trace)?;
                }
            }
        }

        let epoch_time = epoch_start.elapsed();
        let batches = num_batches.max(1) as f32;
        let avg_loss = if num_examples == 0 { 0.0 } else { sum_loss / num_examples as f32 };
        let avg_penalty = sum_penalty / batches;
        let mut trace = EpochTrace {
            kind: "epoch",
            job: self.processor.name(),
            epoch,
            batches: num_batches,
            size: num_examples,
            lr: self.optimizer.learning_rate(),
            avg_loss,
            avg_penalty,
            avg_penalties: sum_penalties
                .into_iter()
                .map(|(name, total)| (name, total / batches))
                .collect(),
            avg_cost: avg_loss + avg_penalty,
            epoch_time: secs(epoch_time),
            prepare_time: secs(epoch_timings.prepare),
            forward_time: secs(epoch_timings.forward),
            backward_time: secs(epoch_timings.backward),
            optimizer_time: secs(epoch_timings.optimizer),
            other_time: secs(epoch_time.saturating_sub(epoch_timings.total())),
        };
        for observer in &mut self.observers {
            observer.post_epoch_trace(&mut trace)?;
        }
        for observer in &mut self.observers {
            observer.post_epoch(&trace)?;
        }
        Ok(trace)
    }
}

/// Build the job selected by `config.train_type` and run it to `max_epochs`.
///
/// Negative sampling uses a [`UniformSampler`] seeded from `config.seed`.
/// Returns the trained model with one trace per epoch.
pub fn train<M: KgeModel>(
    config: TrainConfig,
    dataset: &Dataset,
    model: M,
    observers: Vec<Box<dyn TrainingObserver>>,
) -> Result<(M, Vec<EpochTrace>)> {
    config.validate()?;
    match config.train_type {
        TrainType::KvsAll => {
            let processor = KvsAllProcessor::new(&config, dataset, &model)?;
            run_job(config, model, processor, observers)
        }
        TrainType::NegativeSampling => {
            let ns = &config.negative_sampling;
            let sampler = UniformSampler::new(
                ns.num_samples,
                dataset.num_entities(),
                dataset.num_relations(),
                config.seed,
            )?
            .with_shared(ns.shared);
            let processor = NegativeSamplingProcessor::new(&config, dataset, sampler, &model)?;
            run_job(config, model, processor, observers)
        }
        TrainType::OneVsAll => {
            let processor = OneVsAllProcessor::new(&config, dataset, &model)?;
            run_job(config, model, processor, observers)
        }
    }
}

fn run_job<M: KgeModel, P: BatchProcessor<M>>(
    config: TrainConfig,
    model: M,
    processor: P,
    observers: Vec<Box<dyn TrainingObserver>>,
) -> Result<(M, Vec<EpochTrace>)> {
    let mut job = observers
        .into_iter()
        .fold(TrainingJob::new(config, model, processor)?, |job, observer| {
            job.with_observer(observer)
        });
    let traces = job.run()?;
    Ok((job.into_model(), traces))
}
