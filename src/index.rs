//! Query/label indexes for multi-label (KvsAll) training.
//!
//! A [`FactIndex`] maps every query key of one [`QueryType`] to the set of
//! targets that complete it to a known fact. [`KvsAllIndex`] flattens that map
//! into three parallel arrays so that a batch can be collated without hashing:
//!
//! ```text
//! facts:   (0,0,1) (0,0,2) (1,0,2)          query type sp_
//! queries: [(0,0), (1,0)]
//! labels:  [1, 2, 2]
//! offsets: [0, 2, 3]       labels of query i live in labels[offsets[i]..offsets[i+1]]
//! ```

use crate::query::QueryType;
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;

/// Raw fact index for one query type: key → sorted, deduplicated targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactIndex {
    query_type: QueryType,
    entries: BTreeMap<(usize, usize), Vec<usize>>,
}

impl FactIndex {
    /// Empty index for a query type.
    pub fn new(query_type: QueryType) -> Self {
        Self { query_type, entries: BTreeMap::new() }
    }

    /// Group fact rows (`[s, p, o]` or `[s, p, o, t]`) by the query key.
    ///
    /// A time column, if present, is not part of the key.
    pub fn build(facts: ArrayView2<'_, usize>, query_type: QueryType) -> Self {
        let (k1, k2) = query_type.key_slots();
        let target = query_type.target_slot();
        let mut index = Self::new(query_type);
        for fact in facts.outer_iter() {
            index.insert(fact[k1.column()], fact[k2.column()], fact[target.column()]);
        }
        index.finish()
    }

    /// Add a single (key, target) pair.
    pub fn insert(&mut self, key0: usize, key1: usize, target: usize) {
        self.entries.entry((key0, key1)).or_default().push(target);
    }

    /// Sort and deduplicate every label list.
    pub fn finish(mut self) -> Self {
        for targets in self.entries.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        self
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Number of distinct query keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Targets for a key, if the key occurs in any fact.
    pub fn get(&self, key0: usize, key1: usize) -> Option<&[usize]> {
        self.entries.get(&(key0, key1)).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &Vec<usize>)> {
        self.entries.iter()
    }
}

/// Dense per-query-type arrays: queries, concatenated labels and label offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvsAllIndex {
    query_type: QueryType,
    /// `[N, 2]` query keys, in the key slot order of the query type.
    queries: Array2<usize>,
    /// Targets of all queries, concatenated in query order.
    labels: Vec<usize>,
    /// `N + 1` cumulative label counts.
    offsets: Vec<usize>,
}

impl KvsAllIndex {
    /// Flatten a fact index. Runs once per split; the result is immutable.
    pub fn from_fact_index(index: &FactIndex) -> Self {
        let n = index.len();
        let total: usize = index.iter().map(|(_, targets)| targets.len()).sum();

        let mut queries = Array2::zeros((n, 2));
        let mut labels = Vec::with_capacity(total);
        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0);

        for (row, (&(k0, k1), targets)) in index.iter().enumerate() {
            queries[[row, 0]] = k0;
            queries[[row, 1]] = k1;
            labels.extend_from_slice(targets);
            offsets.push(labels.len());
        }

        Self {
            query_type: index.query_type(),
            queries,
            labels,
            offsets,
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Number of queries (examples) of this type.
    pub fn len(&self) -> usize {
        self.queries.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queries(&self) -> ArrayView2<'_, usize> {
        self.queries.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Key of query `i`.
    #[inline]
    pub fn query(&self, i: usize) -> (usize, usize) {
        (self.queries[[i, 0]], self.queries[[i, 1]])
    }

    /// Labels of query `i`.
    #[inline]
    pub fn labels_of(&self, i: usize) -> &[usize] {
        &self.labels[self.offsets[i]..self.offsets[i + 1]]
    }

    #[inline]
    pub fn num_labels(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }
}
