//! # Length-Bucketed Sampler
//!
//! Builds training batches whose captions all have the same token length,
//! so they stack into one tensor without padding. Each draw picks a length
//! in proportion to how often it occurs, then picks `batch_size` indices from
//! that length's bucket with replacement.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{CocoError, Result};

/// Random batch sampler over precomputed caption lengths.
#[derive(Debug, Clone)]
pub struct LengthBucketSampler {
    lengths: Vec<usize>,
    buckets: BTreeMap<usize, Vec<usize>>,
    batch_size: usize,
    rng: StdRng,
}

/// Seeded generator when `seed` is given, OS entropy otherwise.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl LengthBucketSampler {
    /// Create a sampler over `lengths`, where `lengths[i]` is the caption
    /// length of dataset index `i`.
    ///
    /// # Errors
    ///
    /// Returns `CocoError::InvalidConfiguration` if there are no lengths or
    /// the batch size is zero.
    pub fn new(lengths: &[usize], batch_size: usize, seed: Option<u64>) -> Result<Self> {
        if lengths.is_empty() {
            return Err(CocoError::InvalidConfiguration(
                "cannot sample batches from an empty training set".into(),
            ));
        }
        if batch_size == 0 {
            return Err(CocoError::InvalidConfiguration(
                "batch size must be at least 1".into(),
            ));
        }

        let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, &len) in lengths.iter().enumerate() {
            buckets.entry(len).or_default().push(index);
        }

        Ok(Self {
            lengths: lengths.to_vec(),
            buckets,
            batch_size,
            rng: rng_from_seed(seed),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Distinct caption lengths with their population.
    pub fn histogram(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.buckets.iter().map(|(&len, idx)| (len, idx.len()))
    }

    /// Indices whose caption has exactly `length` tokens (empty if none).
    pub fn indices_for_length(&self, length: usize) -> &[usize] {
        self.buckets.get(&length).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick a length by sampling one caption uniformly and taking its length.
    pub fn sample_length(&mut self) -> usize {
        let i = self.rng.gen_range(0..self.lengths.len());
        self.lengths[i]
    }

    /// Draw `batch_size` indices with replacement from the bucket for `length`.
    ///
    /// # Panics
    ///
    /// Panics if no caption has this length; callers must pick a length that
    /// occurs in the dataset.
    pub fn draw(&mut self, length: usize) -> Vec<usize> {
        let bucket = self
            .buckets
            .get(&length)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| panic!("no captions of length {length} to sample from"));
        (0..self.batch_size)
            .map(|_| bucket[self.rng.gen_range(0..bucket.len())])
            .collect()
    }

    /// One batch of indices sharing a caption length.
    pub fn next_batch(&mut self) -> Vec<usize> {
        let length = self.sample_length();
        let batch = self.draw(length);
        debug!(length, bucket = self.indices_for_length(length).len(), "sampled batch");
        batch
    }
}

/// Never ends: the training loop decides how many batches to take.
impl Iterator for LengthBucketSampler {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}
