//! Property-based tests for index construction, collation and chunking.
//!
//! These tests verify invariants that must hold for all inputs:
//!
//! - offsets start at 0, never decrease and end at `labels.len()`
//! - a collated batch holds exactly as many label coordinates as its queries have labels
//! - chunk ranges partition the batch
//! - `auto` resolves by sharing and the 30-sample cut-off

#![allow(clippy::unwrap_used)]

use lattix_train::{
    chunk_ranges, FactIndex, KvsAllExamples, KvsAllIndex, LabelSmoothing, QueryType,
    ScoringStrategy, StrategyChoice,
};
use ndarray::Array2;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn arb_facts() -> impl Strategy<Value = Array2<usize>> {
    prop::collection::vec((0usize..12, 0usize..4, 0usize..12), 0..60).prop_map(|rows| {
        let n = rows.len();
        let flat: Vec<usize> = rows.into_iter().flat_map(|(s, p, o)| [s, p, o]).collect();
        Array2::from_shape_vec((n, 3), flat).unwrap()
    })
}

fn all_indexes(facts: &Array2<usize>) -> Vec<Arc<KvsAllIndex>> {
    QueryType::ALL
        .iter()
        .map(|&qt| Arc::new(KvsAllIndex::from_fact_index(&FactIndex::build(facts.view(), qt))))
        .collect()
}

mod index_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn offsets_are_well_formed(facts in arb_facts()) {
            for index in all_indexes(&facts) {
                let offsets = index.offsets();
                prop_assert_eq!(offsets.len(), index.len() + 1);
                prop_assert_eq!(offsets[0], 0);
                prop_assert_eq!(*offsets.last().unwrap(), index.labels().len());
                prop_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
            }
        }

        #[test]
        fn labels_are_exactly_the_facts(facts in arb_facts()) {
            let distinct: BTreeSet<(usize, usize, usize)> = facts
                .outer_iter()
                .map(|r| (r[0], r[1], r[2]))
                .collect();

            for index in all_indexes(&facts) {
                let qt = index.query_type();
                let (k1, k2) = qt.key_slots();
                let target = qt.target_slot();
                let mut rebuilt = BTreeSet::new();
                for i in 0..index.len() {
                    let (a, b) = index.query(i);
                    let labels = index.labels_of(i);
                    prop_assert!(
                        labels.windows(2).all(|w| w[0] < w[1]),
                        "labels sorted and unique"
                    );
                    for &label in labels {
                        let mut spo = [0; 3];
                        spo[k1.column()] = a;
                        spo[k2.column()] = b;
                        spo[target.column()] = label;
                        rebuilt.insert((spo[0], spo[1], spo[2]));
                    }
                }
                prop_assert_eq!(&rebuilt, &distinct);
            }
        }
    }
}

mod collate_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn label_coords_sized_exactly(
            facts in arb_facts(),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
        ) {
            let examples = KvsAllExamples::new(all_indexes(&facts));
            prop_assume!(examples.num_examples() > 0);
            let batch_examples: Vec<usize> = picks
                .iter()
                .map(|p| p.index(examples.num_examples()))
                .collect();

            let batch = examples.collate(&batch_examples).unwrap();
            let expected: usize = batch_examples
                .iter()
                .map(|&e| {
                    let (t, local) = examples.resolve(e).unwrap();
                    examples.index(t).num_labels(local)
                })
                .sum();
            prop_assert_eq!(batch.label_coords.nrows(), expected);
            prop_assert_eq!(batch.triples.nrows(), expected);
            prop_assert_eq!(batch.len(), batch_examples.len());

            // order preserved: row i has the query type of example i
            for (row, &e) in batch_examples.iter().enumerate() {
                let (t, _) = examples.resolve(e).unwrap();
                prop_assert_eq!(batch.query_type_indexes[row], t);
            }
        }

        #[test]
        fn resolve_respects_query_end_index(facts in arb_facts()) {
            let examples = KvsAllExamples::new(all_indexes(&facts));
            let ends = examples.query_end_index().to_vec();
            for e in 0..examples.num_examples() {
                let (t, local) = examples.resolve(e).unwrap();
                let start = if t == 0 { 0 } else { ends[t - 1] };
                prop_assert!(start <= e && e < ends[t]);
                prop_assert_eq!(local, e - start);
            }
            prop_assert!(examples.resolve(examples.num_examples()).is_err());
        }

        #[test]
        fn zero_smoothing_is_identity(
            values in prop::collection::vec(prop::bool::ANY, 1..40),
            num_targets in 1usize..50,
        ) {
            let cols = values.len();
            let mut labels =
                Array2::from_shape_fn((1, cols), |(_, j)| if values[j] { 1.0 } else { 0.0 });
            let original = labels.clone();
            LabelSmoothing::resolve(0.0, num_targets, false).unwrap().apply(&mut labels);
            prop_assert_eq!(labels, original);
        }
    }
}

mod chunk_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn chunks_partition_the_batch(batch_size in 0usize..500, max_chunk in 0usize..64) {
            let ranges = chunk_ranges(batch_size, max_chunk);
            let mut next = 0;
            for r in &ranges {
                prop_assert_eq!(r.start, next);
                prop_assert!(r.end > r.start);
                if max_chunk > 0 {
                    prop_assert!(r.len() <= max_chunk);
                }
                next = r.end;
            }
            prop_assert_eq!(next, batch_size);
            if max_chunk == 0 && batch_size > 0 {
                prop_assert_eq!(ranges.len(), 1);
            }
        }

        #[test]
        fn auto_resolution(
            num_samples in prop::array::uniform3(0usize..64),
            shared in any::<bool>(),
        ) {
            let resolved = StrategyChoice::Auto.resolve(num_samples, shared);
            let max = *num_samples.iter().max().unwrap();
            let expected = if shared || max > 30 {
                ScoringStrategy::Batch
            } else {
                ScoringStrategy::Triple
            };
            prop_assert_eq!(resolved, expected);
        }
    }
}
