//! Training losses.
//!
//! A loss sees a score matrix and a label matrix of the same shape and returns
//! its value together with `dL/dscores`. Both are summed over rows; callers
//! divide by the batch size. Negative sampling passes `num_negatives = Some(k)`
//! for `[n, 1 + k]` blocks with the positive in column 0; dense label blocks
//! pass `None`.
//!
//! | Loss | Labels | Value |
//! |------|--------|-------|
//! | `bce` | any 0..1 | Σ BCE-with-logits |
//! | `kl` | any ≥ 0, row-normalized | Σ KL(p ‖ softmax(x)) |
//! | `margin_ranking` | positive first, needs `num_negatives` | Σ max(0, γ - x₀ + xⱼ) |

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Loss value and gradient with respect to the scores.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    pub value: f32,
    pub grad: Array2<f32>,
}

impl LossOutput {
    /// Scale value and gradient.
    pub fn scaled(mut self, factor: f32) -> Self {
        self.value *= factor;
        self.grad *= factor;
        self
    }
}

/// A loss over `[n, m]` scores and labels.
pub trait Loss {
    fn name(&self) -> &str;

    fn compute(
        &self,
        scores: ArrayView2<'_, f32>,
        labels: ArrayView2<'_, f32>,
        num_negatives: Option<usize>,
    ) -> Result<LossOutput>;
}

/// Built-in losses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KgeLoss {
    /// Binary cross entropy on logits.
    #[default]
    Bce,
    /// KL divergence between normalized labels and the softmax of the scores.
    Kl,
    /// Pairwise hinge between the positive (column 0) and each negative.
    MarginRanking { margin: f32 },
}

impl fmt::Display for KgeLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KgeLoss {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bce" => Ok(KgeLoss::Bce),
            "kl" => Ok(KgeLoss::Kl),
            "margin_ranking" => Ok(KgeLoss::MarginRanking { margin: 1.0 }),
            other => Err(Error::Config(format!("unknown loss '{}'", other))),
        }
    }
}

impl Loss for KgeLoss {
    fn name(&self) -> &str {
        match self {
            KgeLoss::Bce => "bce",
            KgeLoss::Kl => "kl",
            KgeLoss::MarginRanking { .. } => "margin_ranking",
        }
    }

    fn compute(
        &self,
        scores: ArrayView2<'_, f32>,
        labels: ArrayView2<'_, f32>,
        num_negatives: Option<usize>,
    ) -> Result<LossOutput> {
        if scores.dim() != labels.dim() {
            return Err(Error::Validation(format!(
                "scores {:?} and labels {:?} differ in shape",
                scores.dim(),
                labels.dim()
            )));
        }
        if let Some(k) = num_negatives {
            if scores.ncols() != k + 1 {
                return Err(Error::Validation(format!(
                    "{} score columns for 1 positive and {} negatives",
                    scores.ncols(),
                    k
                )));
            }
        }
        match *self {
            KgeLoss::Bce => Ok(bce(scores, labels)),
            KgeLoss::Kl => Ok(kl(scores, labels)),
            KgeLoss::MarginRanking { margin } => margin_ranking(scores, num_negatives, margin),
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn bce(scores: ArrayView2<'_, f32>, labels: ArrayView2<'_, f32>) -> LossOutput {
    let mut value = 0.0;
    let mut grad = Array2::zeros(scores.raw_dim());
    ndarray::Zip::from(&mut grad)
        .and(&scores)
        .and(&labels)
        .for_each(|g, &x, &y| {
            // max(x, 0) - x*y + log(1 + exp(-|x|))
            value += x.max(0.0) - x * y + (-x.abs()).exp().ln_1p();
            *g = sigmoid(x) - y;
        });
    LossOutput { value, grad }
}

fn kl(scores: ArrayView2<'_, f32>, labels: ArrayView2<'_, f32>) -> LossOutput {
    let mut value = 0.0;
    let mut grad = Array2::zeros(scores.raw_dim());

    for ((x, y), mut g) in scores
        .axis_iter(Axis(0))
        .zip(labels.axis_iter(Axis(0)))
        .zip(grad.axis_iter_mut(Axis(0)))
    {
        let total: f32 = y.sum();
        if total <= 0.0 {
            continue;
        }
        let max = x.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let log_norm = max + x.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();

        for j in 0..x.len() {
            let p = y[j] / total;
            let log_q = x[j] - log_norm;
            if p > 0.0 {
                value += p * (p.ln() - log_q);
            }
            g[j] = log_q.exp() - p;
        }
    }
    LossOutput { value, grad }
}

fn margin_ranking(
    scores: ArrayView2<'_, f32>,
    num_negatives: Option<usize>,
    margin: f32,
) -> Result<LossOutput> {
    if num_negatives.is_none() {
        return Err(Error::UnsupportedOperation(
            "margin_ranking needs [positive, negatives..] rows from negative sampling".into(),
        ));
    }

    let mut value = 0.0;
    let mut grad = Array2::zeros(scores.raw_dim());
    for (x, mut g) in scores.axis_iter(Axis(0)).zip(grad.axis_iter_mut(Axis(0))) {
        for j in 1..x.len() {
            let hinge = margin - x[0] + x[j];
            if hinge > 0.0 {
                value += hinge;
                g[0] -= 1.0;
                g[j] += 1.0;
            }
        }
    }
    Ok(LossOutput { value, grad })
}
