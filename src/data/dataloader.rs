//! DataLoader: minibatch iteration over an [`InMemoryDataset`].

use super::dataset::{DataSource, InMemoryDataset, MultiDataSet};
use super::sampler::{BatchSampler, RandomSampler, SequentialSampler};

enum Batches {
    Sequential(BatchSampler<SequentialSampler>),
    Random(BatchSampler<RandomSampler>),
}

impl Iterator for Batches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Batches::Sequential(s) => s.next(),
            Batches::Random(s) => s.next(),
        }
    }
}

impl Batches {
    fn reset(&mut self) {
        match self {
            Batches::Sequential(s) => s.reset(),
            Batches::Random(s) => s.reset(),
        }
    }
}

/// Batched [`DataSource`] over an in-memory dataset.
///
/// ```rust,ignore
/// let mut loader = DataLoader::new(dataset, 32)
///     .shuffle(true)
///     .drop_last(false);
///
/// while let Some(batch) = loader.next_batch() {
///     println!("Batch size: {}", batch.num_samples());
/// }
/// ```
pub struct DataLoader {
    dataset: InMemoryDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
    batches: Batches,
}

impl DataLoader {
    pub fn new(dataset: InMemoryDataset, batch_size: usize) -> Self {
        let mut loader = Self {
            batches: Batches::Sequential(BatchSampler::new(SequentialSampler::new(0), 1, false)),
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            seed: None,
        };
        loader.rebuild();
        loader
    }

    fn rebuild(&mut self) {
        let n = self.dataset.len();
        self.batches = if self.shuffle {
            let sampler = match self.seed {
                Some(seed) => RandomSampler::with_seed(n, seed),
                None => RandomSampler::new(n),
            };
            Batches::Random(BatchSampler::new(sampler, self.batch_size, self.drop_last))
        } else {
            Batches::Sequential(BatchSampler::new(SequentialSampler::new(n), self.batch_size, self.drop_last))
        };
    }

    /// Shuffles the samples on every pass.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self.rebuild();
        self
    }

    /// Drops the final incomplete batch.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self.rebuild();
        self
    }

    /// Makes shuffling reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rebuild();
        self
    }

    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            (n + self.batch_size - 1) / self.batch_size
        }
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl DataSource for DataLoader {
    fn next_batch(&mut self) -> Option<MultiDataSet> {
        let indices = self.batches.next()?;
        Some(self.dataset.get_batch(&indices))
    }

    fn reset(&mut self) {
        self.batches.reset();
    }
}
