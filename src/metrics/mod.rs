//! Evaluation metrics tracked during training and evaluation.
//!
//! - **Classification**: Accuracy, Precision, Recall, F1-Score
//! - **Regression**: MSE, MAE, RMSE, R²
//!
//! Metrics accumulate over minibatches: call [`Metric::update`] per batch and
//! [`Metric::compute`] at the end of the epoch.
//!
//! ```rust,ignore
//! use samediff::metrics::{Accuracy, Metric};
//!
//! let mut accuracy = Accuracy::new();
//! accuracy.update(&predictions, &labels);
//! println!("Accuracy: {:.4}", accuracy.compute());
//! accuracy.reset();
//! ```

pub mod classification;
pub mod regression;

pub use classification::{Accuracy, BinaryConfusionMatrix, F1Score, Precision, Recall};
pub use regression::{MeanAbsoluteError, MeanSquaredError, RSquared, RootMeanSquaredError};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base trait of all metrics.
pub trait Metric {
    /// Adds one batch of predictions and labels.
    fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>);

    /// Value over everything seen since the last reset.
    fn compute(&self) -> f64;

    fn reset(&mut self);

    fn name(&self) -> &str;
}

/// Serializable description of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    Accuracy,
    Precision,
    Recall,
    F1,
    Mse,
    Mae,
    Rmse,
    RSquared,
}

impl Evaluation {
    pub fn build(self) -> Box<dyn Metric> {
        match self {
            Evaluation::Accuracy => Box::new(Accuracy::new()),
            Evaluation::Precision => Box::new(Precision::new(0.5)),
            Evaluation::Recall => Box::new(Recall::new(0.5)),
            Evaluation::F1 => Box::new(F1Score::new(0.5)),
            Evaluation::Mse => Box::new(MeanSquaredError::new()),
            Evaluation::Mae => Box::new(MeanAbsoluteError::new()),
            Evaluation::Rmse => Box::new(RootMeanSquaredError::new()),
            Evaluation::RSquared => Box::new(RSquared::new()),
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Evaluation::Accuracy => "accuracy",
            Evaluation::Precision => "precision",
            Evaluation::Recall => "recall",
            Evaluation::F1 => "f1",
            Evaluation::Mse => "mse",
            Evaluation::Mae => "mae",
            Evaluation::Rmse => "rmse",
            Evaluation::RSquared => "r_squared",
        };
        f.write_str(name)
    }
}
