//! Crate-level error type.

use crate::autograd::GradientError;
use crate::data::DatasetError;
use crate::graph::GraphError;
use crate::optimizers::UpdaterError;
use crate::runtime::RuntimeError;
use crate::serialization::SerializationError;
use crate::train::TrainingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Gradient(#[from] GradientError),

    #[error(transparent)]
    Updater(#[from] UpdaterError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

pub type Result<T> = std::result::Result<T, Error>;
