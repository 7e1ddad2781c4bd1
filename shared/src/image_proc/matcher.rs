//! Approximate nearest-neighbour descriptor matching with a ratio test
//!
//! Binary descriptors are indexed with locality sensitive hashing: each
//! table hashes a descriptor by a fixed random subset of its bits, so close
//! descriptors tend to share a bucket in at least one table. A query
//! gathers candidates from its buckets and ranks them by Hamming distance.

use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::collections::HashMap;

use super::features::{hamming_distance, Descriptor, DESCRIPTOR_BYTES};

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Keep a match only if best < ratio * second best
    pub ratio: f64,
    pub tables: usize,
    /// Bits per hash key
    pub key_bits: usize,
    pub seed: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ratio: 0.7,
            tables: 8,
            key_bits: 12,
            seed: 0x15b,
        }
    }
}

/// Accepted correspondence between a query and a train descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

struct HashTable {
    bits: Vec<usize>,
    buckets: HashMap<u32, Vec<usize>>,
}

impl HashTable {
    fn key(&self, d: &Descriptor) -> u32 {
        self.bits.iter().fold(0u32, |key, &bit| {
            let set = (d[bit / 8] >> (7 - bit % 8)) & 1;
            (key << 1) | set as u32
        })
    }
}

/// LSH index over a set of train descriptors
pub struct LshIndex<'a> {
    descriptors: &'a [Descriptor],
    tables: Vec<HashTable>,
}

impl<'a> LshIndex<'a> {
    pub fn build(descriptors: &'a [Descriptor], config: &MatcherConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let total_bits = DESCRIPTOR_BYTES * 8;
        let key_bits = config.key_bits.clamp(1, 32);

        let tables = (0..config.tables.max(1))
            .map(|_| {
                let mut table = HashTable {
                    bits: sample(&mut rng, total_bits, key_bits).into_vec(),
                    buckets: HashMap::new(),
                };
                for (i, d) in descriptors.iter().enumerate() {
                    let key = table.key(d);
                    table.buckets.entry(key).or_default().push(i);
                }
                table
            })
            .collect();

        Self {
            descriptors,
            tables,
        }
    }

    /// Two nearest train descriptors as `(index, distance)`, closest first
    ///
    /// Falls back to an exhaustive scan when the buckets hold fewer than two
    /// distinct candidates.
    pub fn nearest_two(&self, query: &Descriptor) -> Vec<(usize, u32)> {
        let mut candidates: Vec<usize> = self
            .tables
            .iter()
            .filter_map(|t| t.buckets.get(&t.key(query)))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        if candidates.len() < 2 {
            candidates = (0..self.descriptors.len()).collect();
        }

        let mut ranked: Vec<(usize, u32)> = candidates
            .into_iter()
            .map(|i| (i, hamming_distance(query, &self.descriptors[i])))
            .collect();
        ranked.sort_by_key(|&(i, d)| (d, i));
        ranked.truncate(2);
        ranked
    }
}

/// Match every query descriptor against `train`, keeping unambiguous matches
pub fn match_descriptors(
    query: &[Descriptor],
    train: &[Descriptor],
    config: &MatcherConfig,
) -> Vec<FeatureMatch> {
    if train.len() < 2 {
        return Vec::new();
    }
    let index = LshIndex::build(train, config);

    query
        .par_iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let nearest = index.nearest_two(q);
            let (best, second) = (nearest.first()?, nearest.get(1)?);
            passes_ratio_test(best.1, second.1, config.ratio).then_some(FeatureMatch {
                query: qi,
                train: best.0,
                distance: best.1,
            })
        })
        .collect()
}

fn passes_ratio_test(best: u32, second: u32, ratio: f64) -> bool {
    (best as f64) < ratio * second as f64
}
