//! Regression metrics.

use super::Metric;
use ndarray::ArrayD;

/// Mean Squared Error (MSE).
///
/// MSE = (1/n) * Σ(y_pred - y_true)²
#[derive(Debug, Clone, Default)]
pub struct MeanSquaredError {
    sum_squared_error: f64,
    count: usize,
}

impl MeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MeanSquaredError {
    fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>) {
        for (pred, label) in predictions.iter().zip(labels.iter()) {
            let diff = pred - label;
            self.sum_squared_error += diff * diff;
            self.count += 1;
        }
    }

    fn compute(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_squared_error / self.count as f64
        }
    }

    fn reset(&mut self) {
        self.sum_squared_error = 0.0;
        self.count = 0;
    }

    fn name(&self) -> &str {
        "mse"
    }
}

/// Root Mean Squared Error (RMSE).
#[derive(Debug, Clone, Default)]
pub struct RootMeanSquaredError {
    mse: MeanSquaredError,
}

impl RootMeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for RootMeanSquaredError {
    fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>) {
        self.mse.update(predictions, labels);
    }

    fn compute(&self) -> f64 {
        self.mse.compute().sqrt()
    }

    fn reset(&mut self) {
        self.mse.reset();
    }

    fn name(&self) -> &str {
        "rmse"
    }
}

/// Mean Absolute Error (MAE).
///
/// MAE = (1/n) * Σ|y_pred - y_true|
#[derive(Debug, Clone, Default)]
pub struct MeanAbsoluteError {
    sum_absolute_error: f64,
    count: usize,
}

impl MeanAbsoluteError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for MeanAbsoluteError {
    fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>) {
        for (pred, label) in predictions.iter().zip(labels.iter()) {
            self.sum_absolute_error += (pred - label).abs();
            self.count += 1;
        }
    }

    fn compute(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_absolute_error / self.count as f64
        }
    }

    fn reset(&mut self) {
        self.sum_absolute_error = 0.0;
        self.count = 0;
    }

    fn name(&self) -> &str {
        "mae"
    }
}

/// Coefficient of determination.
///
/// R² = 1 - SS_res / SS_tot, accumulated from running sums so it can be
/// updated batch by batch.
#[derive(Debug, Clone, Default)]
pub struct RSquared {
    sum_residual_sq: f64,
    sum_labels: f64,
    sum_labels_sq: f64,
    count: usize,
}

impl RSquared {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for RSquared {
    fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>) {
        for (&pred, &label) in predictions.iter().zip(labels.iter()) {
            self.sum_residual_sq += (label - pred) * (label - pred);
            self.sum_labels += label;
            self.sum_labels_sq += label * label;
            self.count += 1;
        }
    }

    fn compute(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let ss_tot = self.sum_labels_sq - self.sum_labels * self.sum_labels / n;
        if ss_tot <= f64::EPSILON {
            return if self.sum_residual_sq <= f64::EPSILON { 1.0 } else { 0.0 };
        }
        1.0 - self.sum_residual_sq / ss_tot
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn name(&self) -> &str {
        "r_squared"
    }
}
