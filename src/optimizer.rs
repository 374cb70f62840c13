//! Parameter updates from accumulated gradients.

use crate::error::{Error, Result};
use crate::model::Parameter;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Applies one update to every parameter using its current gradient.
pub trait Optimizer {
    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()>;

    fn learning_rate(&self) -> f32;
}

/// Plain gradient descent.
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()> {
        for param in params {
            param.value.scaled_add(-self.lr, &param.grad);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adagrad with per-parameter squared-gradient accumulators (Duchi et al. 2011).
#[derive(Debug, Clone)]
pub struct Adagrad {
    lr: f32,
    eps: f32,
    /// Accumulated squared gradients, keyed by parameter name.
    state: HashMap<&'static str, Array2<f32>>,
}

impl Adagrad {
    pub fn new(lr: f32) -> Self {
        Self { lr, eps: 1e-10, state: HashMap::new() }
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }
}

impl Optimizer for Adagrad {
    fn step(&mut self, params: Vec<&mut Parameter>) -> Result<()> {
        for param in params {
            let sum_sq = self
                .state
                .entry(param.name)
                .or_insert_with(|| Array2::zeros(param.value.raw_dim()));
            if sum_sq.dim() != param.value.dim() {
                return Err(Error::Validation(format!(
                    "parameter '{}' changed shape from {:?} to {:?}",
                    param.name,
                    sum_sq.dim(),
                    param.value.dim()
                )));
            }
            let (lr, eps) = (self.lr, self.eps);
            ndarray::Zip::from(&mut param.value)
                .and(sum_sq)
                .and(&param.grad)
                .for_each(|w, s, &g| {
                    *s += g * g;
                    *w -= lr * g / (s.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Optimizer choice and learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adagrad,
}

impl OptimizerKind {
    pub fn build(self, lr: f32) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(Sgd::new(lr)),
            OptimizerKind::Adagrad => Box::new(Adagrad::new(lr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sgd_step() {
        let mut p = Parameter::new("w", array![[1.0f32, 2.0]]);
        p.grad = array![[0.5, -1.0]];
        Sgd::new(0.1).step(vec![&mut p]).unwrap();
        assert!((p.value[[0, 0]] - 0.95).abs() < 1e-6);
        assert!((p.value[[0, 1]] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_adagrad_accumulates() {
        let mut p = Parameter::new("w", array![[0.0f32]]);
        let mut opt = Adagrad::new(1.0);

        p.grad = array![[2.0]];
        opt.step(vec![&mut p]).unwrap();
        // first step: g / sqrt(g^2) = 1
        assert!((p.value[[0, 0]] + 1.0).abs() < 1e-5);

        p.grad = array![[2.0]];
        opt.step(vec![&mut p]).unwrap();
        // second step: 2 / sqrt(8)
        assert!((p.value[[0, 0]] + 1.0 + 2.0 / 8f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_build_from_kind() {
        let opt = OptimizerKind::Adagrad.build(0.2);
        assert_eq!(opt.learning_rate(), 0.2);
    }
}
