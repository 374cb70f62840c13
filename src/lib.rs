//! Batch construction and loss computation for knowledge graph embedding training.
//!
//! Facts are `(subject, predicate, object[, time])` rows of dense indices.
//! Training turns them into examples in one of three ways:
//!
//! | Train type | Example | Scored against |
//! |------------|---------|----------------|
//! | `KvsAll` | a query key `(s, p)`, `(s, o)` or `(p, o)` | every target, multi-label |
//! | `negative_sampling` | a fact | its own slot value plus `k` sampled negatives |
//! | `1vsAll` | a fact | every subject and every object |
//!
//! ## KvsAll
//!
//! Each query type gets a compact index of three parallel arrays
//! ([`KvsAllIndex`]): the distinct keys, their concatenated labels, and label
//! offsets. Batches draw from one example space that concatenates all enabled
//! query types, and carry their labels as sparse `[row, label]` coordinates.
//!
//! ## Negative sampling
//!
//! Positives and negatives for one slot form a `[n, 1 + k]` score matrix with
//! the positive in column 0. Three strategies compute the same matrix:
//!
//! | Strategy | Computes |
//! |----------|----------|
//! | `triple` | each of the `n·(1+k)` triples |
//! | `all` | scores against the whole vocabulary, then gathers |
//! | `batch` | scores against the unique targets of the chunk, then gathers |
//!
//! `auto` picks `batch` for shared negatives or more than 30 samples per slot,
//! `triple` otherwise. Batches are processed in chunks; each chunk's loss is
//! divided by the full batch size and backpropagated immediately, so results
//! do not depend on the chunk size.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lattix_train::{
//!     train, Dataset, EmbeddingModel, Fact, ScoringFunction, TrainConfig, TrainType,
//! };
//!
//! let mut dataset = Dataset::new(3, 1);
//! dataset.add_split("train", &[Fact::new(0, 0, 1), Fact::new(0, 0, 2), Fact::new(1, 0, 2)])?;
//!
//! let model = EmbeddingModel::new(3, 1, 16, ScoringFunction::ComplEx, 42)?;
//! let config = TrainConfig::default()
//!     .with_train_type(TrainType::KvsAll)
//!     .with_batch_size(2)
//!     .with_max_epochs(5);
//!
//! let (model, traces) = train(config, &dataset, model, vec![])?;
//! ```

pub mod aggregate;
pub mod collate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod index;
pub mod job;
pub mod loss;
pub mod model;
pub mod models;
pub mod optimizer;
pub mod query;
pub mod sampler;
pub mod scorer;
pub mod scoring;
pub mod strategy;

pub use aggregate::{check_finite, BatchResult, Bucket, LossAccumulator, Timings, UpdateSchedule};
pub use collate::{KvsAllBatch, KvsAllExamples, LabelSmoothing};
pub use config::{
    KvsAllConfig, NegativeSamplingConfig, OptimizerConfig, TraceLevel, TrainConfig, TrainType,
};
pub use dataset::{Dataset, Fact};
pub use error::{Error, Result};
pub use index::{FactIndex, KvsAllIndex};
pub use job::{
    train, BatchProcessor, BatchTrace, EpochTrace, JsonLinesTrace, KvsAllProcessor,
    NegativeSamplingProcessor, OneVsAllProcessor, TraceLogger, TrainingJob, TrainingObserver,
};
pub use loss::{KgeLoss, Loss, LossOutput};
pub use model::{KgeModel, Parameter, Penalty, PenaltyContext};
pub use models::{EmbeddingModel, LpRegularizer};
pub use optimizer::{Adagrad, Optimizer, OptimizerKind, Sgd};
pub use query::{QueryType, Slot};
pub use sampler::{NegativeSampleSet, NegativeSampler, UniformSampler};
pub use scorer::{chunk_ranges, NegativeSamplingScorer};
pub use scoring::ScoringFunction;
pub use strategy::{ScoreMatrix, ScoringStrategy, StrategyChoice};
