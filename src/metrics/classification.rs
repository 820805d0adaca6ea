//! Classification metrics.

use super::Metric;
use ndarray::{ArrayD, ArrayViewD, Axis};

/// Index of the largest entry of each row.
fn argmax_rows(array: &ArrayD<f64>) -> Vec<usize> {
    array
        .lanes(Axis(array.ndim() - 1))
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &x)| if x > best.1 { (i, x) } else { best })
                .0
        })
        .collect()
}

fn is_multiclass(array: &ArrayViewD<'_, f64>) -> bool {
    array.ndim() > 1 && array.shape().last().map_or(false, |&n| n > 1)
}

/// Accuracy = correct / total.
///
/// Rows with more than one column are compared by argmax (labels may be one-hot
/// or class indices); otherwise predictions are thresholded at 0.5.
#[derive(Debug, Clone, Default)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metric for Accuracy {
    fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>) {
        if is_multiclass(&predictions.view()) {
            let predicted = argmax_rows(predictions);
            let expected: Vec<usize> = if is_multiclass(&labels.view()) {
                argmax_rows(labels)
            } else {
                labels.iter().map(|&x| x as usize).collect()
            };
            for (p, e) in predicted.iter().zip(&expected) {
                if p == e {
                    self.correct += 1;
                }
                self.total += 1;
            }
        } else {
            for (&p, &t) in predictions.iter().zip(labels.iter()) {
                if (p >= 0.5) == (t >= 0.5) {
                    self.correct += 1;
                }
                self.total += 1;
            }
        }
    }

    fn compute(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn name(&self) -> &str {
        "accuracy"
    }
}

/// Confusion matrix for binary classification.
#[derive(Debug, Clone, Default)]
pub struct BinaryConfusionMatrix {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl BinaryConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>, threshold: f64) {
        for (&pred, &label) in predictions.iter().zip(labels.iter()) {
            match (pred >= threshold, label >= 0.5) {
                (true, true) => self.true_positives += 1,
                (true, false) => self.false_positives += 1,
                (false, true) => self.false_negatives += 1,
                (false, false) => self.true_negatives += 1,
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn precision(&self) -> f64 {
        let predicted = self.true_positives + self.false_positives;
        if predicted == 0 {
            0.0
        } else {
            self.true_positives as f64 / predicted as f64
        }
    }

    pub fn recall(&self) -> f64 {
        let actual = self.true_positives + self.false_negatives;
        if actual == 0 {
            0.0
        } else {
            self.true_positives as f64 / actual as f64
        }
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

macro_rules! confusion_metric {
    ($(#[$doc:meta])* $name:ident, $label:literal, $compute:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            matrix: BinaryConfusionMatrix,
            threshold: f64,
        }

        impl $name {
            pub fn new(threshold: f64) -> Self {
                Self {
                    matrix: BinaryConfusionMatrix::new(),
                    threshold,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new(0.5)
            }
        }

        impl Metric for $name {
            fn update(&mut self, predictions: &ArrayD<f64>, labels: &ArrayD<f64>) {
                self.matrix.update(predictions, labels, self.threshold);
            }

            fn compute(&self) -> f64 {
                self.matrix.$compute()
            }

            fn reset(&mut self) {
                self.matrix.reset();
            }

            fn name(&self) -> &str {
                $label
            }
        }
    };
}

confusion_metric!(
    /// Precision = TP / (TP + FP)
    Precision,
    "precision",
    precision
);
confusion_metric!(
    /// Recall = TP / (TP + FN)
    Recall,
    "recall",
    recall
);
confusion_metric!(
    /// F1 = 2 * precision * recall / (precision + recall)
    F1Score,
    "f1",
    f1
);
