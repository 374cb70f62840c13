//! Negative sampling.
//!
//! The scorer only needs the [`NegativeSampler`] contract: a fixed number of
//! candidates per slot, and whether candidates are shared across the rows of a
//! batch. [`UniformSampler`] draws uniformly from the slot vocabulary.

use crate::error::{Error, Result};
use crate::query::Slot;
use ndarray::{Array2, ArrayView2};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;

/// Source of negative candidates for one slot of a batch of triples.
pub trait NegativeSampler {
    /// Candidates per positive for `slot` (0 disables the slot).
    fn num_samples(&self, slot: Slot) -> usize;

    /// Whether every row of a call receives the same candidates.
    fn shared(&self) -> bool;

    /// Draw `[triples.nrows(), num_samples(slot)]` candidate indices.
    fn sample(&mut self, triples: ArrayView2<'_, usize>, slot: Slot) -> Array2<usize>;

    /// Per-slot counts in S, P, O order.
    fn num_samples_spo(&self) -> [usize; 3] {
        Slot::SPO.map(|slot| self.num_samples(slot))
    }
}

/// Negatives drawn for one batch, one `[batch, k_slot]` array per S, P, O slot.
#[derive(Debug, Clone, PartialEq)]
pub struct NegativeSampleSet {
    per_slot: [Array2<usize>; 3],
}

impl NegativeSampleSet {
    /// Draw negatives for every slot of `triples`.
    pub fn draw<S: NegativeSampler + ?Sized>(
        sampler: &mut S,
        triples: ArrayView2<'_, usize>,
    ) -> Self {
        Self {
            per_slot: Slot::SPO.map(|slot| sampler.sample(triples, slot)),
        }
    }

    /// Build from explicit per-slot arrays (S, P, O order).
    pub fn from_arrays(per_slot: [Array2<usize>; 3]) -> Self {
        Self { per_slot }
    }

    pub fn slot(&self, slot: Slot) -> ArrayView2<'_, usize> {
        self.per_slot[slot.column()].view()
    }

    pub fn num_samples(&self, slot: Slot) -> usize {
        self.per_slot[slot.column()].ncols()
    }
}

/// Uniform sampler over `0..vocab_size(slot)`.
///
/// In shared mode a single row of candidates is drawn per call and repeated
/// for every triple, which lets the `batch` strategy score a small unique set.
#[derive(Debug, Clone)]
pub struct UniformSampler {
    num_samples: [usize; 3],
    vocab_sizes: [usize; 3],
    shared: bool,
    rng: XorShiftRng,
}

impl UniformSampler {
    /// # Arguments
    /// * `num_samples` - candidates per slot, S, P, O order
    /// * `num_entities` / `num_relations` - vocabulary sizes
    /// * `seed` - random seed for reproducibility
    ///
    /// Fails if a slot asks for negatives but has an empty vocabulary.
    pub fn new(
        num_samples: [usize; 3],
        num_entities: usize,
        num_relations: usize,
        seed: u64,
    ) -> Result<Self> {
        let vocab_sizes = [num_entities, num_relations, num_entities];
        for slot in Slot::SPO {
            let c = slot.column();
            if num_samples[c] > 0 && vocab_sizes[c] == 0 {
                return Err(Error::Config(format!(
                    "{} negatives requested for {} slot with an empty vocabulary",
                    num_samples[c], slot
                )));
            }
        }
        Ok(Self {
            num_samples,
            vocab_sizes,
            shared: false,
            rng: XorShiftRng::seed_from_u64(seed),
        })
    }

    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }
}

impl NegativeSampler for UniformSampler {
    fn num_samples(&self, slot: Slot) -> usize {
        match slot {
            Slot::Time => 0,
            other => self.num_samples[other.column()],
        }
    }

    fn shared(&self) -> bool {
        self.shared
    }

    fn sample(&mut self, triples: ArrayView2<'_, usize>, slot: Slot) -> Array2<usize> {
        let k = self.num_samples(slot);
        let n = triples.nrows();
        if k == 0 || slot == Slot::Time {
            return Array2::zeros((n, 0));
        }
        let vocab = self.vocab_sizes[slot.column()];

        if self.shared {
            let row: Vec<usize> = (0..k).map(|_| self.rng.gen_range(0..vocab)).collect();
            Array2::from_shape_fn((n, k), |(_, j)| row[j])
        } else {
            let rng = &mut self.rng;
            Array2::from_shape_simple_fn((n, k), || rng.gen_range(0..vocab))
        }
    }
}
