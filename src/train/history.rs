//! Per-epoch record of a `fit` call.

use crate::metrics::Evaluation;
use serde::{Deserialize, Serialize};

/// Value of one metric on one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub variable: String,
    pub evaluation: Evaluation,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss_variables: Vec<String>,
    /// Mean loss per epoch, one entry per loss variable.
    pub loss_curve: Vec<Vec<f64>>,
    /// Mean L2 penalty per epoch, not included in `loss_curve`.
    #[serde(default)]
    pub regularization_curve: Vec<f64>,
    pub train_evaluations: Vec<Vec<EvaluationResult>>,
    pub validation_evaluations: Vec<Vec<EvaluationResult>>,
}

fn lookup(results: &[Vec<EvaluationResult>], epoch: usize, variable: &str, evaluation: Evaluation) -> Option<f64> {
    results
        .get(epoch)?
        .iter()
        .find(|r| r.variable == variable && r.evaluation == evaluation)
        .map(|r| r.value)
}

impl History {
    pub fn new(loss_variables: Vec<String>) -> Self {
        Self {
            loss_variables,
            ..Self::default()
        }
    }

    pub fn epochs(&self) -> usize {
        self.loss_curve.len()
    }

    /// Total loss (over all loss variables) per epoch.
    pub fn total_loss_curve(&self) -> Vec<f64> {
        self.loss_curve.iter().map(|epoch| epoch.iter().sum()).collect()
    }

    /// Loss curve of one loss variable.
    pub fn loss_curve_for(&self, loss: &str) -> Option<Vec<f64>> {
        let index = self.loss_variables.iter().position(|l| l == loss)?;
        Some(self.loss_curve.iter().map(|epoch| epoch[index]).collect())
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.total_loss_curve().last().copied()
    }

    pub fn train_evaluation(&self, epoch: usize, variable: &str, evaluation: Evaluation) -> Option<f64> {
        lookup(&self.train_evaluations, epoch, variable, evaluation)
    }

    pub fn validation_evaluation(&self, epoch: usize, variable: &str, evaluation: Evaluation) -> Option<f64> {
        lookup(&self.validation_evaluations, epoch, variable, evaluation)
    }

    /// Appends the record of another `fit` call.
    pub fn extend(&mut self, other: History) {
        self.loss_curve.extend(other.loss_curve);
        self.regularization_curve.extend(other.regularization_curve);
        self.train_evaluations.extend(other.train_evaluations);
        self.validation_evaluations.extend(other.validation_evaluations);
    }
}
