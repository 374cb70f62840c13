//! Training configuration.
//!
//! All fields have defaults, so a JSON config only needs the values it changes:
//!
//! ```json
//! {
//!   "train_type": "negative_sampling",
//!   "batch_size": 256,
//!   "negative_sampling": {
//!     "implementation": "batch",
//!     "num_samples": [10, 0, 10],
//!     "shared": true
//!   },
//!   "loss": { "type": "margin_ranking", "margin": 1.0 }
//! }
//! ```

use crate::error::{Error, Result};
use crate::loss::KgeLoss;
use crate::optimizer::OptimizerKind;
use crate::query::QueryType;
use crate::strategy::StrategyChoice;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use std::path::Path;
use std::str::FromStr;

/// How training examples are formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainType {
    /// One example per query key, labeled with all its known targets.
    #[serde(rename = "KvsAll")]
    KvsAll,
    /// One example per fact, scored against sampled negatives.
    #[default]
    #[serde(rename = "negative_sampling")]
    NegativeSampling,
    /// One example per fact, scored against every entity as subject and object.
    #[serde(rename = "1vsAll")]
    OneVsAll,
}

impl FromStr for TrainType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "KvsAll" => Ok(TrainType::KvsAll),
            "negative_sampling" => Ok(TrainType::NegativeSampling),
            "1vsAll" => Ok(TrainType::OneVsAll),
            other => Err(Error::Config(format!("unknown train.type '{}'", other))),
        }
    }
}

/// How much of each batch is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    /// One record per batch and one per epoch.
    Batch,
    /// One record per epoch.
    #[default]
    Epoch,
}

/// KvsAll options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvsAllConfig {
    /// Enabled query types, in example-space order.
    pub query_types: Vec<QueryType>,
    /// Label smoothing factor, valid in `[0, 1/num_targets)`.
    pub label_smoothing: f32,
}

impl Default for KvsAllConfig {
    fn default() -> Self {
        Self {
            query_types: vec![QueryType::Sp, QueryType::Po],
            label_smoothing: 0.0,
        }
    }
}

/// Negative sampling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegativeSamplingConfig {
    pub implementation: StrategyChoice,
    /// Maximum triples scored at once (0 = whole batch).
    pub chunk_size: usize,
    /// Negatives per positive for S, P, O.
    pub num_samples: [usize; 3],
    /// Share one set of negatives across the batch.
    pub shared: bool,
}

impl Default for NegativeSamplingConfig {
    fn default() -> Self {
        Self {
            implementation: StrategyChoice::Auto,
            chunk_size: 0,
            num_samples: [3, 0, 3],
            shared: false,
        }
    }
}

/// Optimizer choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub lr: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { kind: OptimizerKind::Adagrad, lr: 0.1 }
    }
}

/// Training job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub train_type: TrainType,
    /// Split to train on (default: "train").
    pub split: String,
    /// Examples per batch (default: 100).
    pub batch_size: usize,
    /// Number of training epochs (default: 20).
    pub max_epochs: usize,
    /// Batches per optimizer step (default: 1).
    pub update_freq: usize,
    /// Fail the job on a NaN or infinite cost (default: true).
    pub abort_on_nan: bool,
    /// Clamp out-of-range values instead of failing (default: false).
    pub auto_correct: bool,
    /// Shuffle examples every epoch (default: true).
    pub shuffle: bool,
    /// Random seed (default: 42).
    pub seed: u64,
    pub trace_level: TraceLevel,
    pub kvsall: KvsAllConfig,
    pub negative_sampling: NegativeSamplingConfig,
    pub loss: KgeLoss,
    pub optimizer: OptimizerConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_type: TrainType::default(),
            split: "train".to_string(),
            batch_size: 100,
            max_epochs: 20,
            update_freq: 1,
            abort_on_nan: true,
            auto_correct: false,
            shuffle: true,
            seed: 42,
            trace_level: TraceLevel::default(),
            kvsall: KvsAllConfig::default(),
            negative_sampling: NegativeSamplingConfig::default(),
            loss: KgeLoss::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Parse and validate. Well-formed JSON holding invalid values is a
    /// [`Error::Config`]; malformed JSON is a [`Error::Serialization`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| match e.classify() {
            Category::Data => Error::Config(e.to_string()),
            _ => Error::Serialization(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check values that do not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.update_freq == 0 {
            return Err(Error::Config("update_freq must be at least 1".into()));
        }
        if !(self.optimizer.lr.is_finite() && self.optimizer.lr > 0.0) {
            return Err(Error::Config(format!(
                "optimizer lr must be positive, got {}",
                self.optimizer.lr
            )));
        }
        match self.train_type {
            TrainType::KvsAll => {
                if self.kvsall.query_types.is_empty() {
                    return Err(Error::Config("KvsAll needs at least one query type".into()));
                }
                let mut seen = self.kvsall.query_types.clone();
                seen.sort();
                seen.dedup();
                if seen.len() != self.kvsall.query_types.len() {
                    return Err(Error::Config("KvsAll query types must be distinct".into()));
                }
            }
            TrainType::NegativeSampling => {
                if self.negative_sampling.num_samples.iter().all(|&k| k == 0) {
                    return Err(Error::Config(
                        "negative_sampling.num_samples is zero for every slot".into(),
                    ));
                }
            }
            TrainType::OneVsAll => {}
        }
        if matches!(self.loss, KgeLoss::MarginRanking { .. })
            && self.train_type != TrainType::NegativeSampling
        {
            return Err(Error::Config(
                "margin_ranking loss requires negative_sampling training".into(),
            ));
        }
        Ok(())
    }

    pub fn with_train_type(mut self, train_type: TrainType) -> Self {
        self.train_type = train_type;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn with_update_freq(mut self, update_freq: usize) -> Self {
        self.update_freq = update_freq;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_auto_correct(mut self, auto_correct: bool) -> Self {
        self.auto_correct = auto_correct;
        self
    }

    pub fn with_abort_on_nan(mut self, abort_on_nan: bool) -> Self {
        self.abort_on_nan = abort_on_nan;
        self
    }

    pub fn with_trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    pub fn with_loss(mut self, loss: KgeLoss) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_optimizer(mut self, kind: OptimizerKind, lr: f32) -> Self {
        self.optimizer = OptimizerConfig { kind, lr };
        self
    }

    pub fn with_query_types(mut self, query_types: Vec<QueryType>) -> Self {
        self.kvsall.query_types = query_types;
        self
    }

    pub fn with_label_smoothing(mut self, epsilon: f32) -> Self {
        self.kvsall.label_smoothing = epsilon;
        self
    }

    pub fn with_num_samples(mut self, num_samples: [usize; 3]) -> Self {
        self.negative_sampling.num_samples = num_samples;
        self
    }

    pub fn with_implementation(mut self, implementation: StrategyChoice) -> Self {
        self.negative_sampling.implementation = implementation;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.negative_sampling.chunk_size = chunk_size;
        self
    }

    pub fn with_shared_negatives(mut self, shared: bool) -> Self {
        self.negative_sampling.shared = shared;
        self
    }
}
