//! Minibatches and the sources producing them.

use crate::graph::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("A dataset needs at least one feature array")]
    NoFeatures,

    #[error("Array {index} has {actual} samples along its first axis, expected {expected}")]
    SampleCountMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Array {0} is a scalar or a sequence and cannot be split into samples")]
    NotBatchable(usize),
}

/// One minibatch: feature arrays and label arrays, each with the sample
/// dimension first.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiDataSet {
    pub features: Vec<Value>,
    pub labels: Vec<Value>,
}

impl MultiDataSet {
    pub fn new(features: Vec<Value>, labels: Vec<Value>) -> Self {
        Self { features, labels }
    }

    /// Single feature and single label array.
    pub fn single(features: Value, labels: Value) -> Self {
        Self::new(vec![features], vec![labels])
    }

    /// Samples in this batch (first axis of the first feature array).
    pub fn num_samples(&self) -> usize {
        self.features
            .first()
            .and_then(|f| f.shape().first().copied())
            .unwrap_or(0)
    }
}

/// Produces minibatches for training and evaluation.
///
/// A pass over the source ends when `next_batch` returns `None`; `reset`
/// starts the next pass.
pub trait DataSource {
    fn next_batch(&mut self) -> Option<MultiDataSet>;

    fn reset(&mut self);
}

/// Yields the same batch once per pass.
#[derive(Debug, Clone)]
pub struct SingletonSource {
    batch: MultiDataSet,
    consumed: bool,
}

impl SingletonSource {
    pub fn new(batch: MultiDataSet) -> Self {
        Self { batch, consumed: false }
    }
}

impl DataSource for SingletonSource {
    fn next_batch(&mut self) -> Option<MultiDataSet> {
        if self.consumed {
            return None;
        }
        self.consumed = true;
        Some(self.batch.clone())
    }

    fn reset(&mut self) {
        self.consumed = false;
    }
}

/// Dataset held entirely in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    features: Vec<Value>,
    labels: Vec<Value>,
    num_samples: usize,
}

impl InMemoryDataset {
    /// Creates a dataset from feature and label arrays of shape `[num_samples, ...]`.
    pub fn new(features: Vec<Value>, labels: Vec<Value>) -> Result<Self, DatasetError> {
        let num_samples = features
            .first()
            .ok_or(DatasetError::NoFeatures)?
            .shape()
            .first()
            .copied()
            .ok_or(DatasetError::NotBatchable(0))?;
        for (index, array) in features.iter().chain(&labels).enumerate() {
            if array.is_sequence() || array.rank() == 0 {
                return Err(DatasetError::NotBatchable(index));
            }
            let actual = array.shape()[0];
            if actual != num_samples {
                return Err(DatasetError::SampleCountMismatch {
                    index,
                    expected: num_samples,
                    actual,
                });
            }
        }
        Ok(Self {
            features,
            labels,
            num_samples,
        })
    }

    pub fn len(&self) -> usize {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Gathers the given samples into a batch.
    pub fn get_batch(&self, indices: &[usize]) -> MultiDataSet {
        let select = |arrays: &[Value]| -> Vec<Value> {
            arrays
                .iter()
                .filter_map(|array| array.select_rows(indices))
                .collect()
        };
        MultiDataSet::new(select(&self.features), select(&self.labels))
    }
}
