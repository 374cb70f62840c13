//! Multi-label (KvsAll) batch collation.
//!
//! The global example space concatenates the queries of all enabled query
//! types. `query_end_index[t]` is the exclusive end of type `t`, so an example
//! `e` belongs to type `t` iff `query_end_index[t-1] <= e < query_end_index[t]`.
//!
//! A collated batch stores its labels sparsely as `[row, label]` coordinates;
//! [`KvsAllBatch::dense_labels`] expands them for one query type when the loss
//! needs a dense matrix.

use crate::error::{Error, Result};
use crate::index::KvsAllIndex;
use crate::query::QueryType;
use ndarray::{Array1, Array2};
use std::sync::Arc;

/// Query-type indexes laid out in one contiguous example space.
#[derive(Debug, Clone)]
pub struct KvsAllExamples {
    indexes: Vec<Arc<KvsAllIndex>>,
    query_end_index: Vec<usize>,
}

impl KvsAllExamples {
    pub fn new(indexes: Vec<Arc<KvsAllIndex>>) -> Self {
        let mut query_end_index = Vec::with_capacity(indexes.len());
        let mut end = 0;
        for index in &indexes {
            end += index.len();
            query_end_index.push(end);
        }
        Self { indexes, query_end_index }
    }

    /// Total number of examples over all query types.
    pub fn num_examples(&self) -> usize {
        self.query_end_index.last().copied().unwrap_or(0)
    }

    pub fn query_types(&self) -> Vec<QueryType> {
        self.indexes.iter().map(|i| i.query_type()).collect()
    }

    pub fn query_end_index(&self) -> &[usize] {
        &self.query_end_index
    }

    pub fn index(&self, query_type_index: usize) -> &KvsAllIndex {
        &self.indexes[query_type_index]
    }

    /// Map a global example index to `(query_type_index, local_index)`.
    pub fn resolve(&self, example: usize) -> Result<(usize, usize)> {
        let t = self.query_end_index.partition_point(|&end| end <= example);
        if t == self.query_end_index.len() {
            return Err(Error::Validation(format!(
                "example index {} out of range ({} examples)",
                example,
                self.num_examples()
            )));
        }
        let start = if t == 0 { 0 } else { self.query_end_index[t - 1] };
        Ok((t, example - start))
    }

    /// Assemble a batch from example indices. Example order is preserved.
    pub fn collate(&self, examples: &[usize]) -> Result<KvsAllBatch> {
        let resolved = examples
            .iter()
            .map(|&e| self.resolve(e))
            .collect::<Result<Vec<_>>>()?;

        // Size the label tables up front.
        let num_ones: usize = resolved
            .iter()
            .map(|&(t, local)| self.indexes[t].num_labels(local))
            .sum();

        let mut queries = Array2::zeros((examples.len(), 2));
        let mut query_type_indexes = Array1::zeros(examples.len());
        let mut label_coords = Array2::zeros((num_ones, 2));
        let mut triples = Array2::zeros((num_ones, 3));

        let mut current = 0;
        for (row, &(t, local)) in resolved.iter().enumerate() {
            let index = &self.indexes[t];
            let query_type = index.query_type();
            let (k1, k2) = query_type.key_slots();
            let target = query_type.target_slot();
            let (q0, q1) = index.query(local);

            query_type_indexes[row] = t;
            queries[[row, 0]] = q0;
            queries[[row, 1]] = q1;

            for &label in index.labels_of(local) {
                label_coords[[current, 0]] = row;
                label_coords[[current, 1]] = label;
                triples[[current, k1.column()]] = q0;
                triples[[current, k2.column()]] = q1;
                triples[[current, target.column()]] = label;
                current += 1;
            }
        }
        assert_eq!(current, num_ones, "label_coords pre-sized incorrectly");

        Ok(KvsAllBatch {
            queries,
            query_type_indexes,
            label_coords,
            triples,
        })
    }
}

/// One collated multi-label batch.
#[derive(Debug, Clone, PartialEq)]
pub struct KvsAllBatch {
    /// `[B, 2]` query keys.
    pub queries: Array2<usize>,
    /// `[B]` query type index of each row.
    pub query_type_indexes: Array1<usize>,
    /// `[L, 2]`: batch row, label value.
    pub label_coords: Array2<usize>,
    /// `[L, 3]` true triples of the batch (for penalty terms).
    pub triples: Array2<usize>,
}

impl KvsAllBatch {
    pub fn len(&self) -> usize {
        self.queries.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batch rows whose query type index is `t`.
    pub fn rows_of_type(&self, t: usize) -> Vec<usize> {
        self.query_type_indexes
            .iter()
            .enumerate()
            .filter_map(|(row, &qt)| (qt == t).then_some(row))
            .collect()
    }

    /// Dense `[rows.len(), num_targets]` 0/1 label matrix for the given batch rows.
    pub fn dense_labels(&self, rows: &[usize], num_targets: usize) -> Array2<f32> {
        let mut position = vec![usize::MAX; self.len()];
        for (i, &row) in rows.iter().enumerate() {
            position[row] = i;
        }
        let mut labels = Array2::zeros((rows.len(), num_targets));
        for coord in self.label_coords.outer_iter() {
            let pos = position[coord[0]];
            if pos != usize::MAX {
                labels[[pos, coord[1]]] = 1.0;
            }
        }
        labels
    }
}

/// Validated label smoothing factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelSmoothing {
    epsilon: f32,
    num_targets: usize,
}

impl LabelSmoothing {
    /// Check `epsilon` against `[0, 1/num_targets)`.
    ///
    /// With `auto_correct` a negative value becomes 0 and a value at or above the
    /// bound becomes `1/num_targets`; otherwise both are configuration errors.
    pub fn resolve(epsilon: f32, num_targets: usize, auto_correct: bool) -> Result<Self> {
        if num_targets == 0 {
            return Err(Error::Config("label smoothing needs at least one target".into()));
        }
        let bound = 1.0 / num_targets as f32;
        let epsilon = if epsilon.is_nan() {
            return Err(Error::Config("label_smoothing is NaN".into()));
        } else if epsilon < 0.0 {
            if !auto_correct {
                return Err(Error::Config(format!(
                    "label_smoothing was set to {}, should be at least 0",
                    epsilon
                )));
            }
            tracing::warn!("Setting label_smoothing to 0, was set to {}", epsilon);
            0.0
        } else if epsilon >= bound {
            if !auto_correct {
                return Err(Error::Config(format!(
                    "label_smoothing was set to {}, should be below 1/num_targets = {}",
                    epsilon, bound
                )));
            }
            tracing::warn!(
                "Setting label_smoothing to 1/num_targets = {}, was set to {}",
                bound,
                epsilon
            );
            bound
        } else {
            epsilon
        };
        Ok(Self { epsilon, num_targets })
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn is_enabled(&self) -> bool {
        self.epsilon > 0.0
    }

    /// `(1 - ε)·y + ε / num_targets`, in place.
    pub fn apply(&self, labels: &mut Array2<f32>) {
        if !self.is_enabled() {
            return;
        }
        let uniform = self.epsilon / self.num_targets as f32;
        labels.mapv_inplace(|y| (1.0 - self.epsilon) * y + uniform);
    }
}
