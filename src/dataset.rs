//! Facts, splits and their indexes.
//!
//! Splits are stored as `[n, 3]` (or `[n, 4]` with a timestamp column) index
//! arrays behind an `Arc`, so that batch processors can hold them without
//! copying. Every split gets its three [`FactIndex`]es when it is added; after
//! that the dataset is read-only.

use crate::error::{Error, Result};
use crate::index::FactIndex;
use crate::query::QueryType;
use ndarray::{Array2, ArrayView2};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A single fact with dense, externally assigned indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fact {
    pub subject: usize,
    pub predicate: usize,
    pub object: usize,
    pub time: Option<usize>,
}

impl Fact {
    pub fn new(subject: usize, predicate: usize, object: usize) -> Self {
        Self { subject, predicate, object, time: None }
    }

    pub fn with_time(mut self, time: usize) -> Self {
        self.time = Some(time);
        self
    }
}

/// Named splits plus the fact indexes built from them.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    num_entities: usize,
    num_relations: usize,
    splits: HashMap<String, Arc<Array2<usize>>>,
    indexes: HashMap<(String, QueryType), Arc<FactIndex>>,
}

impl Dataset {
    pub fn new(num_entities: usize, num_relations: usize) -> Self {
        Self {
            num_entities,
            num_relations,
            splits: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    pub fn num_relations(&self) -> usize {
        self.num_relations
    }

    /// Add a split from facts. All facts must agree on whether they carry a timestamp.
    pub fn add_split(&mut self, name: &str, facts: &[Fact]) -> Result<()> {
        let temporal = facts.first().is_some_and(|f| f.time.is_some());
        let width = if temporal { 4 } else { 3 };
        let mut rows = Array2::zeros((facts.len(), width));
        for (i, fact) in facts.iter().enumerate() {
            rows[[i, 0]] = fact.subject;
            rows[[i, 1]] = fact.predicate;
            rows[[i, 2]] = fact.object;
            match (temporal, fact.time) {
                (true, Some(t)) => rows[[i, 3]] = t,
                (false, None) => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "split '{}' mixes facts with and without timestamps (row {})",
                        name, i
                    )))
                }
            }
        }
        self.add_split_array(name, rows)
    }

    /// Add a split from a `[n, 3]` or `[n, 4]` array.
    pub fn add_split_array(&mut self, name: &str, rows: Array2<usize>) -> Result<()> {
        if rows.ncols() != 3 && rows.ncols() != 4 {
            return Err(Error::Validation(format!(
                "split '{}' has {} columns, expected 3 or 4",
                name,
                rows.ncols()
            )));
        }
        for (i, row) in rows.outer_iter().enumerate() {
            if row[0] >= self.num_entities || row[2] >= self.num_entities {
                return Err(Error::Validation(format!(
                    "split '{}' row {}: entity index out of range (num_entities = {})",
                    name, i, self.num_entities
                )));
            }
            if row[1] >= self.num_relations {
                return Err(Error::Validation(format!(
                    "split '{}' row {}: relation index {} out of range (num_relations = {})",
                    name, i, row[1], self.num_relations
                )));
            }
        }

        for query_type in QueryType::ALL {
            let index = FactIndex::build(rows.view(), query_type);
            self.indexes
                .insert((name.to_string(), query_type), Arc::new(index));
        }
        tracing::debug!(split = name, facts = rows.nrows(), "added split");
        self.splits.insert(name.to_string(), Arc::new(rows));
        Ok(())
    }

    /// Load a split from a whitespace separated file of integer indices.
    ///
    /// Each non-empty line is `s p o` or `s p o t`; lines starting with `#` are skipped.
    pub fn load_split_tsv(&mut self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let rows = parse_fact_rows(&text)?;
        self.add_split_array(name, rows)
    }

    /// Register an externally built index, replacing any existing one.
    pub fn insert_index(&mut self, split: &str, index: FactIndex) {
        self.indexes
            .insert((split.to_string(), index.query_type()), Arc::new(index));
    }

    pub fn split(&self, name: &str) -> Result<&Arc<Array2<usize>>> {
        self.splits
            .get(name)
            .ok_or_else(|| Error::MissingSplit(name.to_string()))
    }

    /// Fact index of `split` for a query type.
    pub fn index(&self, split: &str, query_type: QueryType) -> Result<&Arc<FactIndex>> {
        self.indexes
            .get(&(split.to_string(), query_type))
            .ok_or_else(|| Error::MissingIndex {
                split: split.to_string(),
                index: query_type.index_name().to_string(),
            })
    }

    /// Number of targets for the slot predicted by a query type.
    pub fn num_targets(&self, query_type: QueryType) -> usize {
        if query_type.target_slot().is_entity() {
            self.num_entities
        } else {
            self.num_relations
        }
    }
}

fn parse_fact_rows(text: &str) -> Result<Array2<usize>> {
    let mut values = Vec::new();
    let mut width = None;
    let mut rows = 0;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line
            .split_whitespace()
            .map(|f| {
                f.parse::<usize>().map_err(|e| Error::Parse {
                    line: lineno + 1,
                    message: format!("'{}': {}", f, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match width {
            None if fields.len() == 3 || fields.len() == 4 => width = Some(fields.len()),
            Some(w) if w == fields.len() => {}
            _ => {
                return Err(Error::Parse {
                    line: lineno + 1,
                    message: format!("expected 3 or 4 consistent columns, got {}", fields.len()),
                })
            }
        }
        values.extend(fields);
        rows += 1;
    }

    let width = width.unwrap_or(3);
    Array2::from_shape_vec((rows, width), values)
        .map_err(|e| Error::Validation(format!("fact rows: {}", e)))
}

/// Select rows of a fact array by example index.
pub(crate) fn select_rows(facts: ArrayView2<'_, usize>, rows: &[usize]) -> Array2<usize> {
    facts.select(ndarray::Axis(0), rows)
}
