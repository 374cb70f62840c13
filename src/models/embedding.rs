//! Lookup embedding model.
//!
//! One embedding row per entity and per relation, combined by a
//! [`ScoringFunction`]. Scores for a whole vocabulary are computed by looping
//! over candidate rows, which is slow but exact; it exists so that every call
//! shape of [`KgeModel`] can be exercised and compared.

use crate::error::{Error, Result};
use crate::model::{KgeModel, Parameter, Penalty, PenaltyContext};
use crate::query::Slot;
use crate::scoring::ScoringFunction;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lp regularization of the embedding tables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LpRegularizer {
    pub weight: f32,
    /// Norm degree, at least 1.
    pub p: i32,
    /// Penalize only rows used by the batch, weighted by how often they occur.
    pub weighted: bool,
}

impl Default for LpRegularizer {
    fn default() -> Self {
        Self { weight: 0.0, p: 2, weighted: false }
    }
}

/// Entity and relation lookup tables with an interaction function.
#[derive(Debug, Clone)]
pub struct EmbeddingModel {
    scoring: ScoringFunction,
    dim: usize,
    entities: Parameter,
    relations: Parameter,
    regularizer: Option<LpRegularizer>,
}

impl EmbeddingModel {
    /// Uniformly initialized tables in `[-0.5/dim, 0.5/dim]`.
    pub fn new(
        num_entities: usize,
        num_relations: usize,
        dim: usize,
        scoring: ScoringFunction,
        seed: u64,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }
        if scoring.is_complex() && dim % 2 != 0 {
            return Err(Error::Config(format!(
                "{:?} stores complex pairs and needs an even dimension, got {}",
                scoring, dim
            )));
        }
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let bound = 0.5 / dim as f32;
        let mut init = |rows: usize| {
            Array2::from_shape_simple_fn((rows, dim), || rng.gen_range(-bound..=bound))
        };
        let entities = init(num_entities);
        let relations = init(num_relations);
        Self::from_embeddings(entities, relations, scoring)
    }

    /// Wrap existing tables. Both must have the same number of columns.
    pub fn from_embeddings(
        entities: Array2<f32>,
        relations: Array2<f32>,
        scoring: ScoringFunction,
    ) -> Result<Self> {
        if entities.ncols() != relations.ncols() {
            return Err(Error::Validation(format!(
                "entity dim {} != relation dim {}",
                entities.ncols(),
                relations.ncols()
            )));
        }
        let dim = entities.ncols();
        Ok(Self {
            scoring,
            dim,
            entities: Parameter::new(
                "entity_embeddings",
                entities.as_standard_layout().into_owned(),
            ),
            relations: Parameter::new(
                "relation_embeddings",
                relations.as_standard_layout().into_owned(),
            ),
            regularizer: None,
        })
    }

    pub fn with_regularizer(mut self, regularizer: LpRegularizer) -> Self {
        self.regularizer = (regularizer.weight != 0.0).then_some(regularizer);
        self
    }

    pub fn scoring(&self) -> ScoringFunction {
        self.scoring
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn entity_embeddings(&self) -> &Parameter {
        &self.entities
    }

    pub fn relation_embeddings(&self) -> &Parameter {
        &self.relations
    }

    fn check_triple(&self, s: usize, p: usize, o: usize) -> Result<()> {
        let n = self.entities.value.nrows();
        if s >= n || o >= n || p >= self.relations.value.nrows() {
            return Err(Error::Validation(format!(
                "triple ({}, {}, {}) out of range for {} entities, {} relations",
                s,
                p,
                o,
                n,
                self.relations.value.nrows()
            )));
        }
        Ok(())
    }

    /// Score of `triple` with its `slot` column replaced by `target`.
    fn score_with(&self, triple: ArrayView1<'_, usize>, slot: Slot, target: usize) -> Result<f32> {
        let [s, p, o] = replaced(triple, slot, target);
        self.check_triple(s, p, o)?;
        Ok(self.scoring.score(
            row_slice(&self.entities.value, s)?,
            row_slice(&self.relations.value, p)?,
            row_slice(&self.entities.value, o)?,
        ))
    }

    fn score_targets<I>(
        &self,
        triples: ArrayView2<'_, usize>,
        slot: Slot,
        targets: I,
    ) -> Result<Array2<f32>>
    where
        I: Iterator<Item = usize> + Clone + ExactSizeIterator,
    {
        let mut scores = Array2::zeros((triples.nrows(), targets.len()));
        for (r, triple) in triples.outer_iter().enumerate() {
            for (j, target) in targets.clone().enumerate() {
                scores[[r, j]] = self.score_with(triple, slot, target)?;
            }
        }
        Ok(scores)
    }

    /// Rows of each table touched by the batch, with occurrence counts.
    fn batch_rows(ctx: &PenaltyContext<'_>) -> [(BTreeMap<usize, usize>, usize); 2] {
        let mut entities = BTreeMap::new();
        let mut relations = BTreeMap::new();
        for triple in ctx.triples.outer_iter() {
            *entities.entry(triple[0]).or_insert(0) += 1;
            *entities.entry(triple[2]).or_insert(0) += 1;
            *relations.entry(triple[1]).or_insert(0) += 1;
        }
        let n = ctx.triples.nrows();
        [(entities, 2 * n), (relations, n)]
    }
}

/// Triple with `slot` replaced; the time column is not used for scoring.
#[inline]
fn replaced(triple: ArrayView1<'_, usize>, slot: Slot, target: usize) -> [usize; 3] {
    let mut spo = [triple[0], triple[1], triple[2]];
    if slot != Slot::Time {
        spo[slot.column()] = target;
    }
    spo
}

fn row_slice(table: &Array2<f32>, i: usize) -> Result<&[f32]> {
    table
        .row(i)
        .to_slice()
        .ok_or_else(|| Error::Validation("embedding table is not contiguous".into()))
}

fn lp_value(x: f32, p: i32) -> f32 {
    x.abs().powi(p)
}

/// d/dx |x|^p / p
fn lp_grad(x: f32, p: i32) -> f32 {
    if x == 0.0 {
        return 0.0;
    }
    x.abs().powi(p - 1) * x.signum()
}

impl KgeModel for EmbeddingModel {
    fn num_entities(&self) -> usize {
        self.entities.value.nrows()
    }

    fn num_relations(&self) -> usize {
        self.relations.value.nrows()
    }

    fn score_triples(&self, triples: ArrayView2<'_, usize>) -> Result<Array1<f32>> {
        let mut scores = Array1::zeros(triples.nrows());
        for (r, triple) in triples.outer_iter().enumerate() {
            scores[r] = self.score_with(triple, Slot::Time, 0)?;
        }
        Ok(scores)
    }

    fn supports_score_all(&self) -> bool {
        true
    }

    fn supports_score_subset(&self) -> bool {
        true
    }

    fn score_all(&self, triples: ArrayView2<'_, usize>, slot: Slot) -> Result<Array2<f32>> {
        if slot == Slot::Time {
            return Err(Error::UnsupportedOperation("scoring against timestamps".into()));
        }
        self.score_targets(triples, slot, 0..self.vocab_size(slot))
    }

    fn score_subset(
        &self,
        triples: ArrayView2<'_, usize>,
        slot: Slot,
        targets: &[usize],
    ) -> Result<Array2<f32>> {
        if slot == Slot::Time {
            return Err(Error::UnsupportedOperation("scoring against timestamps".into()));
        }
        self.score_targets(triples, slot, targets.iter().copied())
    }

    fn backward(
        &mut self,
        triples: ArrayView2<'_, usize>,
        slot: Slot,
        targets: ArrayView2<'_, usize>,
        grad: ArrayView2<'_, f32>,
    ) -> Result<()> {
        assert_eq!(targets.dim(), grad.dim(), "targets and grad must have the same shape");
        assert_eq!(targets.nrows(), triples.nrows(), "one target row per triple");

        for ((triple, target_row), grad_row) in triples
            .outer_iter()
            .zip(targets.outer_iter())
            .zip(grad.outer_iter())
        {
            for (&target, &g) in target_row.iter().zip(grad_row.iter()) {
                if g == 0.0 {
                    continue;
                }
                let [s, p, o] = replaced(triple, slot, target);
                self.check_triple(s, p, o)?;
                let partials = self.scoring.gradient(
                    row_slice(&self.entities.value, s)?,
                    row_slice(&self.relations.value, p)?,
                    row_slice(&self.entities.value, o)?,
                );
                self.entities
                    .grad
                    .row_mut(s)
                    .scaled_add(g, &ArrayView1::from(&partials.head));
                self.relations
                    .grad
                    .row_mut(p)
                    .scaled_add(g, &ArrayView1::from(&partials.relation));
                self.entities
                    .grad
                    .row_mut(o)
                    .scaled_add(g, &ArrayView1::from(&partials.tail));
            }
        }
        Ok(())
    }

    fn penalty(&self, ctx: &PenaltyContext<'_>) -> Vec<Penalty> {
        let Some(reg) = self.regularizer else {
            return Vec::new();
        };
        let p = reg.p;
        let scale = reg.weight / p as f32;
        let tables = [&self.entities, &self.relations];

        if !reg.weighted {
            return tables
                .iter()
                .map(|param| Penalty {
                    name: format!("{}.L{}_penalty", param.name, p),
                    value: scale * param.value.iter().map(|&x| lp_value(x, p)).sum::<f32>(),
                })
                .collect();
        }

        tables
            .iter()
            .zip(Self::batch_rows(ctx))
            .map(|(param, (counts, total))| {
                let sum: f32 = counts
                    .iter()
                    .map(|(&row, &count)| {
                        let row_sum: f32 =
                            param.value.row(row).iter().map(|&x| lp_value(x, p)).sum();
                        count as f32 * row_sum
                    })
                    .sum();
                // Normalized by index count so the term is correct in expectation.
                let value = if total == 0 { 0.0 } else { scale * sum / total as f32 };
                Penalty {
                    name: format!("{}.L{}_penalty", param.name, p),
                    value,
                }
            })
            .collect()
    }

    fn backward_penalty(&mut self, ctx: &PenaltyContext<'_>) -> Result<()> {
        let Some(reg) = self.regularizer else {
            return Ok(());
        };
        let p = reg.p;
        if p < 1 {
            return Err(Error::Config(format!("Lp regularization needs p >= 1, got {}", p)));
        }

        if !reg.weighted {
            for param in [&mut self.entities, &mut self.relations] {
                let Parameter { value, grad, .. } = param;
                grad.zip_mut_with(value, |g, &x| *g += reg.weight * lp_grad(x, p));
            }
            return Ok(());
        }

        let rows = Self::batch_rows(ctx);
        let params = [&mut self.entities, &mut self.relations];
        for (param, (counts, total)) in params.into_iter().zip(rows) {
            if total == 0 {
                continue;
            }
            let Parameter { value, grad, .. } = param;
            for (&row, &count) in &counts {
                let factor = reg.weight * count as f32 / total as f32;
                grad.row_mut(row)
                    .zip_mut_with(&value.row(row), |g, &x| *g += factor * lp_grad(x, p));
            }
        }
        Ok(())
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.entities, &mut self.relations]
    }
}
