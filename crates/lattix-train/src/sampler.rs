//! Negative sampling by corruption.
//!
//! A negative is made from a positive `(h, r, t)` by replacing either the
//! head or the tail with an entity drawn uniformly at random. Candidates that
//! land on a known positive are redrawn.
//!
//! # Choosing the side
//!
//! A coin is drawn in `[0, 1)` and compared against the relation's bias `p`:
//! the tail is replaced when the coin exceeds `p`, the head otherwise. Under
//! uniform sampling `p = 0.5`.
//!
//! # Termination
//!
//! For tiny graphs every candidate may be a positive. Each negative therefore
//! gets at most `max_attempts` draws before sampling fails with
//! [`Error::SamplingExhausted`].

use crate::config::{SamplingMode, TrainerConfig};
use crate::error::{CorruptionSide, Error, Result};
use crate::store::KnowledgeGraphStore;
use crate::triple::{PositiveSet, Triple};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::collections::HashMap;

/// Seeded RNG, or an entropy-seeded one when no seed is given.
pub(crate) fn seeded_rng(seed: Option<u64>) -> XorShiftRng {
    match seed {
        Some(seed) => XorShiftRng::seed_from_u64(seed),
        None => XorShiftRng::from_entropy(),
    }
}

/// Rejection sampler over a fixed positive set.
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    positives: PositiveSet,
    relation_bias: HashMap<usize, f64>,
    sampling: SamplingMode,
    num_entities: usize,
    max_attempts: usize,
    rng: XorShiftRng,
}

impl NegativeSampler {
    pub fn new(
        positives: PositiveSet,
        relation_bias: HashMap<usize, f64>,
        sampling: SamplingMode,
        num_entities: usize,
        max_attempts: usize,
        seed: Option<u64>,
    ) -> Self {
        Self {
            positives,
            relation_bias,
            sampling,
            num_entities,
            max_attempts,
            rng: seeded_rng(seed),
        }
    }

    /// Read the training positives and bias table from the store.
    pub fn from_store(store: &dyn KnowledgeGraphStore, config: &TrainerConfig, seed: Option<u64>) -> Self {
        let positives = PositiveSet::new(&store.triplets_train());
        let relation_bias = match config.sampling {
            SamplingMode::Bern => store.relation_property(),
            SamplingMode::Uniform => HashMap::new(),
        };
        Self::new(
            positives,
            relation_bias,
            config.sampling,
            store.meta().tot_entity,
            config.max_sampling_attempts,
            seed,
        )
    }

    /// Probability of corrupting the head for `relation`.
    pub fn corruption_bias(&self, relation: usize) -> f64 {
        match self.sampling {
            SamplingMode::Bern => self.relation_bias.get(&relation).copied().unwrap_or(0.5),
            SamplingMode::Uniform => 0.5,
        }
    }

    /// Draw the side to corrupt for one negative.
    pub fn choose_side(&mut self, relation: usize) -> CorruptionSide {
        let p = self.corruption_bias(relation);
        if self.rng.gen::<f64>() > p {
            CorruptionSide::Tail
        } else {
            CorruptionSide::Head
        }
    }

    /// One negative for `triple`, side chosen by the relation bias.
    pub fn corrupt(&mut self, triple: Triple) -> Result<Triple> {
        let side = self.choose_side(triple.relation);
        self.corrupt_side(triple, side)
    }

    /// One negative for `triple` with the given side replaced.
    pub fn corrupt_side(&mut self, triple: Triple, side: CorruptionSide) -> Result<Triple> {
        if self.num_entities == 0 {
            return Err(Error::SamplingExhausted {
                triple,
                side,
                attempts: 0,
            });
        }

        for _ in 0..self.max_attempts {
            let entity = self.rng.gen_range(0..self.num_entities);
            let candidate = match side {
                CorruptionSide::Head => triple.with_head(entity),
                CorruptionSide::Tail => triple.with_tail(entity),
            };
            if !self.positives.contains(&candidate) {
                return Ok(candidate);
            }
        }

        Err(Error::SamplingExhausted {
            triple,
            side,
            attempts: self.max_attempts,
        })
    }

    /// `size` distinct entity ids, the prefix of a fresh random permutation.
    pub fn candidate_pool(&mut self, size: usize) -> Vec<usize> {
        let amount = size.min(self.num_entities);
        rand::seq::index::sample(&mut self.rng, self.num_entities, amount).into_vec()
    }

    pub fn positives(&self) -> &PositiveSet {
        &self.positives
    }

    pub fn num_entities(&self) -> usize {
        self.num_entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn chain(n: usize) -> Vec<Triple> {
        (0..n - 1).map(|i| Triple::new(i, 0, i + 1)).collect()
    }

    fn sampler(train: &[Triple], n: usize, sampling: SamplingMode, bias: HashMap<usize, f64>) -> NegativeSampler {
        NegativeSampler::new(PositiveSet::new(train), bias, sampling, n, 1_000, Some(7))
    }

    #[test]
    fn test_negatives_avoid_positives() {
        let train = chain(20);
        let mut s = sampler(&train, 20, SamplingMode::Uniform, HashMap::new());
        for t in &train {
            for _ in 0..50 {
                let neg = s.corrupt(*t).unwrap();
                assert!(!s.positives().contains(&neg));
                assert_eq!(neg.relation, t.relation);
                assert!(neg.head == t.head || neg.tail == t.tail);
            }
        }
    }

    #[test]
    fn test_bias_one_always_corrupts_head() {
        let train = chain(10);
        let bias = HashMap::from([(0, 1.0)]);
        let mut s = sampler(&train, 10, SamplingMode::Bern, bias);
        for _ in 0..200 {
            assert_eq!(s.choose_side(0), CorruptionSide::Head);
        }
    }

    #[test]
    fn test_bias_ignored_under_uniform() {
        let bias = HashMap::from([(0, 1.0)]);
        let s = sampler(&chain(4), 4, SamplingMode::Uniform, bias);
        assert_eq!(s.corruption_bias(0), 0.5);
    }

    #[test]
    fn test_missing_relation_defaults_to_fair_coin() {
        let s = sampler(&chain(4), 4, SamplingMode::Bern, HashMap::new());
        assert_eq!(s.corruption_bias(9), 0.5);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        // every (0, 0, x) is positive, so tail corruption of (0, 0, 0) cannot succeed
        let train: Vec<Triple> = (0..3).map(|t| Triple::new(0, 0, t)).collect();
        let mut s = NegativeSampler::new(
            PositiveSet::new(&train),
            HashMap::new(),
            SamplingMode::Uniform,
            3,
            25,
            Some(1),
        );
        let err = s.corrupt_side(train[0], CorruptionSide::Tail).unwrap_err();
        match err {
            Error::SamplingExhausted { triple, side, attempts } => {
                assert_eq!(triple, train[0]);
                assert_eq!(side, CorruptionSide::Tail);
                assert_eq!(attempts, 25);
            }
            other => panic!("unexpected error: {other}"),
        }
        // the head side still has room
        assert!(s.corrupt_side(train[0], CorruptionSide::Head).is_ok());
    }

    #[test]
    fn test_candidate_pool_is_distinct_and_capped() {
        let mut s = sampler(&chain(30), 30, SamplingMode::Uniform, HashMap::new());
        let pool = s.candidate_pool(10);
        assert_eq!(pool.len(), 10);
        assert_eq!(pool.iter().collect::<HashSet<_>>().len(), 10);
        assert!(pool.iter().all(|&e| e < 30));
        assert_eq!(s.candidate_pool(100).len(), 30);
    }
}
