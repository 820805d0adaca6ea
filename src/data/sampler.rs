//! Index sampling strategies for the [`DataLoader`](super::DataLoader).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Generator of sample indices for one pass over a dataset.
pub trait Sampler: Iterator<Item = usize> {
    /// Number of indices produced per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new pass.
    fn reset(&mut self);
}

/// Yields `0..len` in order.
pub struct SequentialSampler {
    len: usize,
    current: usize,
}

impl SequentialSampler {
    pub fn new(len: usize) -> Self {
        Self { len, current: 0 }
    }
}

impl Iterator for SequentialSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current < self.len {
            let idx = self.current;
            self.current += 1;
            Some(idx)
        } else {
            None
        }
    }
}

impl Sampler for SequentialSampler {
    fn len(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.current = 0;
    }
}

/// Yields a fresh permutation of `0..len` on every pass.
///
/// With a seed, the sequence of permutations is reproducible: pass `k` is
/// shuffled with `seed + k`.
pub struct RandomSampler {
    indices: Vec<usize>,
    current: usize,
    seed: Option<u64>,
    pass: u64,
}

impl RandomSampler {
    pub fn new(len: usize) -> Self {
        Self::build(len, None)
    }

    pub fn with_seed(len: usize, seed: u64) -> Self {
        Self::build(len, Some(seed))
    }

    fn build(len: usize, seed: Option<u64>) -> Self {
        let mut sampler = Self {
            indices: (0..len).collect(),
            current: 0,
            seed,
            pass: 0,
        };
        sampler.shuffle();
        sampler
    }

    fn shuffle(&mut self) {
        self.indices.sort_unstable();
        match self.seed {
            Some(s) => {
                let mut rng = StdRng::seed_from_u64(s.wrapping_add(self.pass));
                self.indices.shuffle(&mut rng);
            }
            None => self.indices.shuffle(&mut rand::thread_rng()),
        }
    }
}

impl Iterator for RandomSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.indices.get(self.current).copied()?;
        self.current += 1;
        Some(idx)
    }
}

impl Sampler for RandomSampler {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn reset(&mut self) {
        self.current = 0;
        self.pass += 1;
        self.shuffle();
    }
}

/// Groups the indices of an inner sampler into batches.
pub struct BatchSampler<S: Sampler> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    /// * `sampler` - inner index generator
    /// * `batch_size` - indices per batch (at least 1)
    /// * `drop_last` - drop the final incomplete batch
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Self {
        Self {
            sampler,
            batch_size: batch_size.max(1),
            drop_last,
        }
    }

    pub fn num_batches(&self) -> usize {
        let n = self.sampler.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            (n + self.batch_size - 1) / self.batch_size
        }
    }

    pub fn reset(&mut self) {
        self.sampler.reset();
    }
}

impl<S: Sampler> Iterator for BatchSampler<S> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<usize> = self.sampler.by_ref().take(self.batch_size).collect();
        if batch.is_empty() || (batch.len() < self.batch_size && self.drop_last) {
            return None;
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_sampler() {
        let mut sampler = SequentialSampler::new(5);
        let indices: Vec<_> = sampler.by_ref().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        sampler.reset();
        let indices: Vec<_> = sampler.by_ref().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_random_sampler_is_a_permutation() {
        let mut sampler = RandomSampler::with_seed(5, 42);
        let mut sorted: Vec<_> = sampler.by_ref().collect();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_seeded_passes_are_reproducible() {
        let mut a = RandomSampler::with_seed(20, 7);
        let mut b = RandomSampler::with_seed(20, 7);
        a.reset();
        b.reset();
        assert_eq!(a.collect::<Vec<_>>(), b.collect::<Vec<_>>());
    }

    #[test]
    fn test_batch_sampler() {
        let sampler = SequentialSampler::new(10);
        let mut batch_sampler = BatchSampler::new(sampler, 3, false);
        assert_eq!(batch_sampler.num_batches(), 4);

        let batches: Vec<_> = batch_sampler.by_ref().collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0], vec![0, 1, 2]);
        assert_eq!(batches[3], vec![9]);
    }

    #[test]
    fn test_batch_sampler_drop_last() {
        let sampler = SequentialSampler::new(10);
        let mut batch_sampler = BatchSampler::new(sampler, 3, true);
        let batches: Vec<_> = batch_sampler.by_ref().collect();
        assert_eq!(batches.len(), 3);
    }
}
