//! Loss functions built from graph ops.
//!
//! Each function appends the ops computing one loss to the graph of its
//! inputs and names the final variable `name`. The returned tensor is not
//! marked as a loss; call [`Tensor::mark_as_loss`] on it (or list it in
//! `set_loss_variables`).
//!
//! # Available Loss Functions
//!
//! - **MSE**: `mse_loss`
//! - **Absolute difference**: `absolute_difference_loss`
//! - **L2**: `l2_loss`
//! - **Log loss** (binary cross entropy on probabilities): `log_loss`
//! - **Softmax cross entropy** (on logits): `softmax_cross_entropy`

use crate::error::Result;
use crate::tensor::Tensor;

/// Default epsilon of [`log_loss`].
pub const LOG_LOSS_EPSILON: f64 = 1e-7;

// ============================================================================
// Regression
// ============================================================================

/// Mean squared error.
///
/// Formula: `mean((predictions - labels)^2)`.
pub fn mse_loss(name: &str, predictions: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let error = (predictions - labels)?;
    error.square()?.mean_all()?.rename(name)
}

/// Mean absolute error.
///
/// Formula: `mean(|predictions - labels|)`.
pub fn absolute_difference_loss(name: &str, predictions: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let error = (predictions - labels)?;
    error.abs()?.mean_all()?.rename(name)
}

/// Half the squared L2 norm: `sum(x^2) / 2`.
pub fn l2_loss(name: &str, x: &Tensor) -> Result<Tensor> {
    x.square()?.sum_all()?.mul_scalar(0.5)?.rename(name)
}

// ============================================================================
// Classification
// ============================================================================

/// Binary cross entropy on probabilities.
///
/// Formula: `-mean(labels * log(p + eps) + (1 - labels) * log(1 - p + eps))`.
pub fn log_loss(name: &str, predictions: &Tensor, labels: &Tensor, epsilon: f64) -> Result<Tensor> {
    let log_p = predictions.add_scalar(epsilon)?.log()?;
    let log_not_p = predictions.neg()?.add_scalar(1.0 + epsilon)?.log()?;
    let not_labels = labels.neg()?.add_scalar(1.0)?;
    let positive = (labels * &log_p)?;
    let negative = (&not_labels * &log_not_p)?;
    (&positive + &negative)?.mean_all()?.neg()?.rename(name)
}

/// Cross entropy between `softmax(logits)` and one-hot (or soft) labels over
/// the last axis, averaged over the remaining axes.
///
/// Formula: `-mean(sum(labels * log(softmax(logits)), axis = -1))`.
pub fn softmax_cross_entropy(name: &str, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let log_probs = logits.softmax(-1)?.log()?;
    let per_example = (labels * &log_probs)?.sum(&[-1], false)?;
    per_example.mean_all()?.neg()?.rename(name)
}
