//! Strategies for scoring positives against their negatives.
//!
//! For a chunk of `n` triples and `k` negatives in one slot, every strategy
//! produces the same `[n, 1 + k]` [`ScoreMatrix`]; they differ only in how
//! many scores the model computes to get there.
//!
//! | Strategy | Model call | Scores computed |
//! |----------|------------|-----------------|
//! | `triple` | `score_triples` | `n·(1+k)` |
//! | `all` | `score_all` | `n·vocab` |
//! | `batch` | `score_subset` | `n·unique(targets)` |
//!
//! With shared negatives the unique set is at most `n + k`, which is why
//! `auto` picks `batch` whenever the sampler shares.

use crate::error::{Error, Result};
use crate::model::KgeModel;
use crate::query::Slot;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Largest per-slot sample count for which `auto` still picks `triple`.
pub const AUTO_TRIPLE_MAX_SAMPLES: usize = 30;

/// Configured strategy, possibly `auto`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum StrategyChoice {
    Triple,
    All,
    Batch,
    #[default]
    Auto,
}

impl StrategyChoice {
    /// Resolve `auto` from the sampler setup; concrete choices pass through.
    pub fn resolve(self, num_samples: [usize; 3], shared: bool) -> ScoringStrategy {
        match self {
            StrategyChoice::Triple => ScoringStrategy::Triple,
            StrategyChoice::All => ScoringStrategy::All,
            StrategyChoice::Batch => ScoringStrategy::Batch,
            StrategyChoice::Auto => {
                let max_samples = num_samples.iter().copied().max().unwrap_or(0);
                if shared || max_samples > AUTO_TRIPLE_MAX_SAMPLES {
                    ScoringStrategy::Batch
                } else {
                    ScoringStrategy::Triple
                }
            }
        }
    }
}

impl TryFrom<String> for StrategyChoice {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for StrategyChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "triple" => Ok(StrategyChoice::Triple),
            "all" => Ok(StrategyChoice::All),
            "batch" => Ok(StrategyChoice::Batch),
            "auto" => Ok(StrategyChoice::Auto),
            other => Err(Error::Config(format!(
                "negative_sampling.implementation '{}' is not one of triple, all, batch, auto",
                other
            ))),
        }
    }
}

/// Concrete scoring strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringStrategy {
    Triple,
    All,
    Batch,
}

impl fmt::Display for ScoringStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScoringStrategy::Triple => "triple",
            ScoringStrategy::All => "all",
            ScoringStrategy::Batch => "batch",
        })
    }
}

/// Scores of positives (column 0) and negatives for one chunk and slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    /// `[n, 1 + k]`
    pub scores: Array2<f32>,
    /// `[n, 1 + k]` slot value each score was computed for.
    pub targets: Array2<usize>,
}

impl ScoringStrategy {
    /// Fail early if the model lacks the call this strategy relies on.
    pub fn ensure_supported<M: KgeModel + ?Sized>(self, model: &M) -> Result<()> {
        let supported = match self {
            ScoringStrategy::Triple => true,
            ScoringStrategy::All => model.supports_score_all(),
            ScoringStrategy::Batch => model.supports_score_subset(),
        };
        if supported {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation(format!(
                "model cannot be trained with the '{}' negative sampling implementation",
                self
            )))
        }
    }

    /// Score `triples` against their own `slot` value and `negatives`.
    pub fn score_chunk<M: KgeModel + ?Sized>(
        self,
        model: &M,
        triples: ArrayView2<'_, usize>,
        negatives: ArrayView2<'_, usize>,
        slot: Slot,
    ) -> Result<ScoreMatrix> {
        if negatives.nrows() != triples.nrows() {
            return Err(Error::Validation(format!(
                "{} triples but {} rows of negatives",
                triples.nrows(),
                negatives.nrows()
            )));
        }
        let targets = chunk_targets(triples, negatives, slot);
        let scores = match self {
            ScoringStrategy::Triple => score_expanded(model, triples, &targets, slot)?,
            ScoringStrategy::All => {
                let all = model.score_all(triples, slot)?;
                gather(&all, &targets, |target| Some(target))?
            }
            ScoringStrategy::Batch => {
                let unique: Vec<usize> = targets
                    .iter()
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let column: HashMap<usize, usize> =
                    unique.iter().enumerate().map(|(i, &v)| (v, i)).collect();
                let subset = model.score_subset(triples, slot, &unique)?;
                gather(&subset, &targets, |target| column.get(&target).copied())?
            }
        };
        Ok(ScoreMatrix { scores, targets })
    }
}

/// `[n, 1 + k]`: the true slot value followed by the negatives.
fn chunk_targets(
    triples: ArrayView2<'_, usize>,
    negatives: ArrayView2<'_, usize>,
    slot: Slot,
) -> Array2<usize> {
    let k = negatives.ncols();
    let col = slot.column();
    Array2::from_shape_fn((triples.nrows(), 1 + k), |(r, j)| {
        if j == 0 {
            triples[[r, col]]
        } else {
            negatives[[r, j - 1]]
        }
    })
}

/// Build one triple per target and score them all at once.
fn score_expanded<M: KgeModel + ?Sized>(
    model: &M,
    triples: ArrayView2<'_, usize>,
    targets: &Array2<usize>,
    slot: Slot,
) -> Result<Array2<f32>> {
    let (n, width) = targets.dim();
    let mut expanded = Array2::zeros((n * width, triples.ncols()));
    for (r, triple) in triples.outer_iter().enumerate() {
        for j in 0..width {
            let mut row = expanded.row_mut(r * width + j);
            row.assign(&triple);
            row[slot.column()] = targets[[r, j]];
        }
    }
    let flat = model.score_triples(expanded.view())?;
    flat.into_shape_with_order((n, width))
        .map_err(|e| Error::Validation(format!("score_triples returned wrong length: {}", e)))
}

/// `out[r, j] = scores[r, column(targets[r, j])]`
fn gather(
    scores: &Array2<f32>,
    targets: &Array2<usize>,
    column: impl Fn(usize) -> Option<usize>,
) -> Result<Array2<f32>> {
    if scores.nrows() != targets.nrows() {
        return Err(Error::Validation(format!(
            "model returned {} score rows for {} triples",
            scores.nrows(),
            targets.nrows()
        )));
    }
    let mut out = Array2::zeros(targets.raw_dim());
    for ((r, j), &target) in targets.indexed_iter() {
        let c = column(target)
            .filter(|&c| c < scores.ncols())
            .ok_or_else(|| Error::Validation(format!("target {} has no score column", target)))?;
        out[[r, j]] = scores[[r, c]];
    }
    Ok(out)
}
