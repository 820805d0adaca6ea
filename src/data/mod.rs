//! # Data Loading Module
//!
//! Sources of minibatches for training and evaluation.
//!
//! ## Key Components
//!
//! - [`MultiDataSet`]: one minibatch (feature arrays and label arrays)
//! - [`DataSource`]: trait for anything producing minibatches pass by pass
//! - [`InMemoryDataset`] + [`DataLoader`]: batched, optionally shuffled
//!   iteration over arrays held in memory
//! - [`SingletonSource`]: the same batch once per pass
//!
//! ## Example
//!
//! ```ignore
//! use samediff::data::{DataLoader, InMemoryDataset};
//!
//! let dataset = InMemoryDataset::new(vec![features], vec![labels])?;
//! let mut loader = DataLoader::new(dataset, 32).shuffle(true).seed(7);
//! let history = sd.fit(&mut loader, 10)?;
//! ```

pub mod dataloader;
pub mod dataset;
pub mod sampler;

pub use dataloader::DataLoader;
pub use dataset::{DataSource, DatasetError, InMemoryDataset, MultiDataSet, SingletonSource};
pub use sampler::{BatchSampler, RandomSampler, Sampler, SequentialSampler};
