//! Mini-batch iteration.
//!
//! [`Batcher`] pairs an input tensor with its label tensor and yields
//! fixed-size batches covering every sample exactly once per traversal. The
//! final batch carries the remainder when the batch size does not divide the
//! sample count.
//!
//! Shuffling uses an explicit, locally-owned [`StdRng`]; there is no ambient
//! global generator. By default every traversal draws a fresh permutation
//! from the ongoing generator state. [`Batcher::reseed_each_epoch`] instead
//! resets the generator to the construction seed before every traversal,
//! which makes all epochs see the identical order — useful only for
//! reproducing runs of systems that shuffled that way.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::tensors::{Ten64, Tensor};

/// A restartable source of `(inputs, labels)` mini-batches.
pub struct Batcher {
    inputs: Ten64,
    labels: Ten64,
    batch_size: usize,
    shuffle: bool,
    reseed_each_epoch: bool,
    seed: u64,
    rng: StdRng,
}

impl Batcher {
    /// Creates a batcher over paired sample tensors.
    ///
    /// # Panics
    /// Panics if the tensors disagree on the number of samples, or if
    /// `batch_size` is zero.
    pub fn new(inputs: Ten64, labels: Ten64, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        assert_eq!(
            inputs.shape.first(),
            labels.shape.first(),
            "inputs and labels disagree on sample count"
        );
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            inputs,
            labels,
            batch_size,
            shuffle,
            reseed_each_epoch: false,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Resets the shuffle generator to the construction seed before every
    /// traversal, so successive epochs replay the same order. Defaults to
    /// `false` (independent shuffles per epoch).
    pub fn reseed_each_epoch(mut self, on: bool) -> Self {
        self.reseed_each_epoch = on;
        self
    }

    /// Number of samples.
    pub fn num_samples(&self) -> usize {
        self.inputs.shape[0]
    }

    /// Number of batches per traversal, counting the remainder batch.
    pub fn num_batches(&self) -> usize {
        self.num_samples().div_ceil(self.batch_size)
    }

    /// Starts one traversal of the dataset, yielding each sample exactly
    /// once.
    pub fn epoch(&mut self) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.num_samples()).collect();
        if self.shuffle {
            if self.reseed_each_epoch {
                self.rng = StdRng::seed_from_u64(self.seed);
            }
            order.shuffle(&mut self.rng);
        }
        Batches {
            inputs: &self.inputs,
            labels: &self.labels,
            order,
            batch_size: self.batch_size,
            pos: 0,
        }
    }
}

/// Lazy iterator over one epoch of batches. Each item owns its data: rows
/// are gathered out of the parent tensors in permutation order.
pub struct Batches<'a> {
    inputs: &'a Ten64,
    labels: &'a Ten64,
    order: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl Batches<'_> {
    fn gather(source: &Ten64, rows: &[usize]) -> Ten64 {
        let sample_size = source.data.len() / source.shape[0].max(1);
        let mut data = Vec::with_capacity(rows.len() * sample_size);
        for &r in rows {
            data.extend_from_slice(&source.data[r * sample_size..(r + 1) * sample_size]);
        }
        let mut shape = source.shape.clone();
        shape[0] = rows.len();
        Tensor::new(shape, data)
    }
}

impl Iterator for Batches<'_> {
    type Item = (Ten64, Ten64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.order.len());
        let rows = &self.order[self.pos..end];
        self.pos = end;
        Some((
            Self::gather(self.inputs, rows),
            Self::gather(self.labels, rows),
        ))
    }
}
