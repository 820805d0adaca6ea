//! Training configuration.

use super::TrainingError;
use crate::metrics::Evaluation;
use crate::optimizers::UpdaterConfig;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A metric computed on one graph variable against one label array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSpec {
    pub variable: String,
    /// Index into the labels of each minibatch.
    pub label_index: usize,
    pub evaluation: Evaluation,
}

impl EvaluationSpec {
    pub fn new(variable: &str, label_index: usize, evaluation: Evaluation) -> Self {
        Self {
            variable: variable.to_string(),
            label_index,
            evaluation,
        }
    }
}

/// How `fit` trains a graph: the updater, regularization, and how minibatch
/// arrays map onto placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub updater: UpdaterConfig,
    /// L2 regularization coefficient applied to every trainable variable.
    #[serde(default)]
    pub l2: f64,
    #[serde(default = "default_true")]
    pub minimize: bool,
    /// Placeholder receiving each feature array of a minibatch, in order.
    pub feature_mapping: Vec<String>,
    /// Placeholder receiving each label array of a minibatch, in order.
    #[serde(default)]
    pub label_mapping: Vec<String>,
    /// Labels of the data source are ignored (e.g. unsupervised losses).
    #[serde(default)]
    pub labels_unused: bool,
    #[serde(default)]
    pub train_evaluations: Vec<EvaluationSpec>,
    #[serde(default)]
    pub validation_evaluations: Vec<EvaluationSpec>,
    /// Completed epochs.
    #[serde(default)]
    pub epoch_count: usize,
    /// Completed minibatch updates.
    #[serde(default)]
    pub iteration_count: usize,
}

impl TrainingConfig {
    pub fn builder() -> TrainingConfigBuilder {
        TrainingConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        self.updater.validate().map_err(TrainingError::InvalidConfig)?;
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "l2 coefficient must be non-negative, got {}",
                self.l2
            )));
        }
        if self.feature_mapping.is_empty() {
            return Err(TrainingError::MissingFeatureMapping);
        }
        if self.label_mapping.is_empty() && !self.labels_unused {
            return Err(TrainingError::MissingLabelMapping);
        }
        Ok(())
    }

    /// Follows a variable rename in the mappings and evaluations.
    pub(crate) fn rename_variable(&mut self, from: &str, to: &str) {
        let names = self.feature_mapping.iter_mut().chain(self.label_mapping.iter_mut());
        let specs = self
            .train_evaluations
            .iter_mut()
            .chain(self.validation_evaluations.iter_mut())
            .map(|spec| &mut spec.variable);
        for name in names.chain(specs).filter(|n| n.as_str() == from) {
            *name = to.to_string();
        }
    }
}

/// Builder for [`TrainingConfig`]; `build` validates the result.
#[derive(Debug, Clone)]
pub struct TrainingConfigBuilder {
    config: TrainingConfig,
}

impl Default for TrainingConfigBuilder {
    fn default() -> Self {
        Self {
            config: TrainingConfig {
                updater: UpdaterConfig::sgd(0.01),
                l2: 0.0,
                minimize: true,
                feature_mapping: Vec::new(),
                label_mapping: Vec::new(),
                labels_unused: false,
                train_evaluations: Vec::new(),
                validation_evaluations: Vec::new(),
                epoch_count: 0,
                iteration_count: 0,
            },
        }
    }
}

impl TrainingConfigBuilder {
    pub fn updater(mut self, updater: UpdaterConfig) -> Self {
        self.config.updater = updater;
        self
    }

    pub fn l2(mut self, l2: f64) -> Self {
        self.config.l2 = l2;
        self
    }

    /// Maximize the loss instead of minimizing it.
    pub fn maximize(mut self) -> Self {
        self.config.minimize = false;
        self
    }

    pub fn minimize(mut self, minimize: bool) -> Self {
        self.config.minimize = minimize;
        self
    }

    pub fn feature_mapping(mut self, placeholders: &[&str]) -> Self {
        self.config.feature_mapping = placeholders.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn label_mapping(mut self, placeholders: &[&str]) -> Self {
        self.config.label_mapping = placeholders.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn mark_labels_unused(mut self) -> Self {
        self.config.labels_unused = true;
        self
    }

    pub fn train_evaluation(mut self, variable: &str, label_index: usize, evaluation: Evaluation) -> Self {
        self.config
            .train_evaluations
            .push(EvaluationSpec::new(variable, label_index, evaluation));
        self
    }

    pub fn validation_evaluation(mut self, variable: &str, label_index: usize, evaluation: Evaluation) -> Self {
        self.config
            .validation_evaluations
            .push(EvaluationSpec::new(variable, label_index, evaluation));
        self
    }

    pub fn build(self) -> Result<TrainingConfig, TrainingError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrainingConfig {
        TrainingConfig::builder()
            .updater(UpdaterConfig::adam(1e-3))
            .l2(1e-4)
            .feature_mapping(&["in"])
            .label_mapping(&["label"])
            .train_evaluation("out", 0, Evaluation::Accuracy)
            .build()
            .unwrap()
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let config = config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: TrainingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_mappings_are_rejected() {
        let err = TrainingConfig::builder().label_mapping(&["label"]).build().unwrap_err();
        assert_eq!(err, TrainingError::MissingFeatureMapping);
        let err = TrainingConfig::builder().feature_mapping(&["in"]).build().unwrap_err();
        assert_eq!(err, TrainingError::MissingLabelMapping);
        assert!(TrainingConfig::builder()
            .feature_mapping(&["in"])
            .mark_labels_unused()
            .build()
            .is_ok());
    }

    #[test]
    fn rename_updates_mappings_and_evaluations() {
        let mut config = config();
        config.rename_variable("out", "prediction");
        config.rename_variable("in", "features");
        assert_eq!(config.feature_mapping, vec!["features".to_string()]);
        assert_eq!(config.train_evaluations[0].variable, "prediction");
    }
}
