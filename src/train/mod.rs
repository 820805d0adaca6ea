//! # Training Module
//!
//! Minibatch training of a graph against its loss variables.
//!
//! [`SameDiff::fit`] binds each minibatch to the placeholders named in the
//! [`TrainingConfig`], runs the forward and gradient graphs once, and lets the
//! configured updater modify every trainable variable in place. Losses and
//! evaluations are collected per epoch into a [`History`].
//!
//! ```rust,ignore
//! let config = TrainingConfig::builder()
//!     .updater(UpdaterConfig::adam(1e-2))
//!     .feature_mapping(&["in"])
//!     .label_mapping(&["label"])
//!     .build()?;
//! sd.set_training_config(config)?;
//! let history = sd.fit(&mut loader, 20)?;
//! ```

pub mod config;
pub mod history;
pub mod listeners;

pub use config::{EvaluationSpec, TrainingConfig, TrainingConfigBuilder};
pub use history::{EvaluationResult, History};
pub use listeners::{EpochEnd, Listener, ScoreListener};

use crate::autograd::GradientError;
use crate::data::{DataSource, MultiDataSet};
use crate::error::Result;
use crate::graph::{Graph, Value, VariableType};
use crate::metrics::{Evaluation, Metric};
use crate::optimizers::UpdaterError;
use crate::runtime::{InferenceSession, RuntimeError};
use crate::tensor::{GraphContext, SameDiff};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("No training configuration is set. Call set_training_config before fit or evaluate.")]
    NoTrainingConfig,

    #[error("Training configuration has no feature mapping")]
    MissingFeatureMapping,

    #[error("Training configuration has no label mapping and labels are not marked as unused")]
    MissingLabelMapping,

    #[error("Minibatch has {actual} {kind} arrays but {expected} placeholders are mapped")]
    BatchArity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("\"{0}\" is mapped to minibatch data but is not a placeholder of the graph")]
    UnknownPlaceholder(String),

    #[error("Evaluation refers to label {index} but the minibatch has {available} label arrays")]
    MissingLabel { index: usize, available: usize },

    #[error("Variable \"{0}\" was not produced by the forward pass")]
    MissingOutput(String),

    #[error("Cannot evaluate \"{variable}\": prediction shape {prediction:?} does not match label shape {label:?}")]
    EvaluationShape {
        variable: String,
        prediction: Vec<usize>,
        label: Vec<usize>,
    },

    #[error("Data source produced no minibatches")]
    EmptyDataSource,

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),
}

fn bind_arrays(
    graph: &Graph,
    names: &[String],
    arrays: &[Value],
    kind: &'static str,
    bound: &mut HashMap<String, Value>,
) -> Result<()> {
    if names.len() != arrays.len() {
        return Err(TrainingError::BatchArity {
            kind,
            expected: names.len(),
            actual: arrays.len(),
        }
        .into());
    }
    for (name, array) in names.iter().zip(arrays) {
        let var = graph
            .get_variable(name)
            .filter(|v| v.var_type() == VariableType::Placeholder)
            .ok_or_else(|| TrainingError::UnknownPlaceholder(name.clone()))?;
        let value = if array.is_sequence() || array.dtype() == var.dtype() {
            array.clone()
        } else {
            array.cast(var.dtype())
        };
        bound.insert(name.clone(), value);
    }
    Ok(())
}

/// Placeholder map of one minibatch.
fn bind_batch(graph: &Graph, config: &TrainingConfig, batch: &MultiDataSet) -> Result<HashMap<String, Value>> {
    let mut bound = HashMap::new();
    bind_arrays(graph, &config.feature_mapping, &batch.features, "feature", &mut bound)?;
    if !config.labels_unused {
        bind_arrays(graph, &config.label_mapping, &batch.labels, "label", &mut bound)?;
    }
    Ok(bound)
}

/// Predictions and labels must agree in shape, except that accuracy also
/// takes class indices (`[.., 1]` or the rows alone) for multi-column predictions.
fn shapes_match(evaluation: Evaluation, prediction: &[usize], label: &[usize]) -> bool {
    if prediction == label {
        return true;
    }
    let Some((&classes, rows)) = prediction.split_last() else {
        return false;
    };
    if evaluation != Evaluation::Accuracy || rows.is_empty() || classes <= 1 {
        return false;
    }
    label == rows || label.split_last() == Some((&1, rows))
}

fn update_metrics(
    specs: &[EvaluationSpec],
    metrics: &mut [Box<dyn Metric>],
    values: &HashMap<String, Value>,
    batch: &MultiDataSet,
) -> Result<()> {
    for (spec, metric) in specs.iter().zip(metrics.iter_mut()) {
        let prediction = values
            .get(&spec.variable)
            .and_then(Value::to_f64_array)
            .ok_or_else(|| TrainingError::MissingOutput(spec.variable.clone()))?;
        let label = batch
            .labels
            .get(spec.label_index)
            .and_then(Value::to_f64_array)
            .ok_or(TrainingError::MissingLabel {
                index: spec.label_index,
                available: batch.labels.len(),
            })?;
        if !shapes_match(spec.evaluation, prediction.shape(), label.shape()) {
            return Err(TrainingError::EvaluationShape {
                variable: spec.variable.clone(),
                prediction: prediction.shape().to_vec(),
                label: label.shape().to_vec(),
            }
            .into());
        }
        metric.update(&prediction, &label);
    }
    Ok(())
}

fn collect_results(specs: &[EvaluationSpec], metrics: &[Box<dyn Metric>]) -> Vec<EvaluationResult> {
    specs
        .iter()
        .zip(metrics)
        .map(|(spec, metric)| EvaluationResult {
            variable: spec.variable.clone(),
            evaluation: spec.evaluation,
            value: metric.compute(),
        })
        .collect()
}

/// The L2 penalty `l2 / 2 * sum(param^2)` whose gradient `regularized` adds.
fn l2_penalty(param: &Value, l2: f64) -> f64 {
    param
        .to_f64_array()
        .map_or(0.0, |p| 0.5 * l2 * p.iter().map(|x| x * x).sum::<f64>())
}

/// Gradient with the L2 penalty `l2 * param` added.
fn regularized(name: &str, gradient: &Value, param: &Value, l2: f64) -> std::result::Result<Value, UpdaterError> {
    let (Some(mut g), Some(p)) = (gradient.to_f64_array(), param.to_f64_array()) else {
        return Err(UpdaterError::NotFloatingPoint(name.to_string()));
    };
    if g.shape() != p.shape() {
        return Err(UpdaterError::ShapeMismatch {
            param: name.to_string(),
            parameter: p.shape().to_vec(),
            gradient: g.shape().to_vec(),
        });
    }
    g.zip_mut_with(&p, |g, p| *g += l2 * p);
    Ok(Value::from_f64_array(g, gradient.dtype()))
}

/// Runs inference over a whole data source and computes `specs`.
fn evaluate_source(
    ctx: &mut GraphContext,
    config: &TrainingConfig,
    source: &mut dyn DataSource,
    specs: &[EvaluationSpec],
) -> Result<Vec<EvaluationResult>> {
    let mut targets = Vec::with_capacity(specs.len());
    for spec in specs {
        targets.push(ctx.graph.id_of(&spec.variable)?);
    }
    let GraphContext {
        graph,
        listeners,
        backend,
        ..
    } = ctx;
    let mut metrics: Vec<Box<dyn Metric>> = specs.iter().map(|s| s.evaluation.build()).collect();
    let mut session = InferenceSession::with_listeners(&**backend, listeners);
    let mut batches = 0;
    source.reset();
    while let Some(batch) = source.next_batch() {
        let placeholders = bind_batch(graph, config, &batch)?;
        let memo = session.execute(graph, &placeholders, &targets)?;
        let values: HashMap<String, Value> = specs
            .iter()
            .zip(&targets)
            .filter_map(|(spec, id)| memo.get(id).map(|v| (spec.variable.clone(), v.clone())))
            .collect();
        update_metrics(specs, &mut metrics, &values, &batch)?;
        batches += 1;
    }
    if batches == 0 {
        return Err(TrainingError::EmptyDataSource.into());
    }
    Ok(collect_results(specs, &metrics))
}

impl SameDiff {
    /// Sets the training configuration. The updater (and its state) is kept
    /// when the updater configuration is unchanged.
    pub fn set_training_config(&self, config: TrainingConfig) -> Result<()> {
        config.validate()?;
        let mut ctx = self.ctx.borrow_mut();
        let keep_updater = ctx.updater.is_some()
            && ctx
                .training_config
                .as_ref()
                .map_or(false, |current| current.updater == config.updater);
        if !keep_updater {
            debug!(updater = %config.updater, "creating updater");
            ctx.updater = Some(config.updater.build());
        }
        ctx.training_config = Some(config);
        Ok(())
    }

    pub fn training_config(&self) -> Option<TrainingConfig> {
        self.ctx.borrow().training_config.clone()
    }

    /// Current updater state, keyed `<param>/<slot>`.
    pub fn updater_state(&self) -> Option<HashMap<String, Value>> {
        self.ctx.borrow().updater.as_ref().map(|u| u.state())
    }

    pub(crate) fn restore_updater_state(&self, state: HashMap<String, Value>) -> Result<()> {
        let mut guard = self.ctx.borrow_mut();
        let ctx = &mut *guard;
        let config = ctx.training_config.as_ref().ok_or(TrainingError::NoTrainingConfig)?;
        let updater = ctx.updater.get_or_insert_with(|| config.updater.build());
        updater.set_state(state)?;
        Ok(())
    }

    /// Trains for `epochs` passes over `source`.
    pub fn fit(&self, source: &mut dyn DataSource, epochs: usize) -> Result<History> {
        self.fit_internal(source, epochs, None)
    }

    /// Trains like [`fit`](Self::fit) and computes the configured validation
    /// evaluations on `validation` at the end of every epoch.
    pub fn fit_with_validation(
        &self,
        source: &mut dyn DataSource,
        epochs: usize,
        validation: &mut dyn DataSource,
    ) -> Result<History> {
        self.fit_internal(source, epochs, Some(validation))
    }

    /// Runs inference over `source` and computes `specs`. Minibatches are bound
    /// with the mappings of the training configuration.
    pub fn evaluate(&self, source: &mut dyn DataSource, specs: &[EvaluationSpec]) -> Result<Vec<EvaluationResult>> {
        let mut guard = self.ctx.borrow_mut();
        let ctx = &mut *guard;
        let config = ctx.training_config.clone().ok_or(TrainingError::NoTrainingConfig)?;
        evaluate_source(ctx, &config, source, specs)
    }

    fn fit_internal(
        &self,
        source: &mut dyn DataSource,
        epochs: usize,
        mut validation: Option<&mut dyn DataSource>,
    ) -> Result<History> {
        let mut guard = self.ctx.borrow_mut();
        let ctx = &mut *guard;
        let mut config = ctx.training_config.clone().ok_or(TrainingError::NoTrainingConfig)?;
        if ctx.loss_variables.is_empty() {
            return Err(GradientError::NoLossVariables.into());
        }
        if ctx.updater.is_none() {
            ctx.updater = Some(config.updater.build());
        }

        let losses = ctx.loss_variables.clone();
        let mut outputs = losses.clone();
        for spec in &config.train_evaluations {
            if !outputs.contains(&spec.variable) {
                outputs.push(spec.variable.clone());
            }
        }
        let trainable: Vec<String> = ctx
            .graph
            .trainable_variables()
            .into_iter()
            .map(|id| ctx.graph.variable(id).map(|v| v.name().to_string()))
            .collect::<std::result::Result<_, _>>()?;
        info!(epochs, losses = ?losses, parameters = trainable.len(), "starting training");

        let mut history = History::new(losses.clone());
        for _ in 0..epochs {
            let epoch = config.epoch_count;
            for listener in ctx.listeners.iter_mut() {
                listener.epoch_start(epoch);
            }
            let mut metrics: Vec<Box<dyn Metric>> =
                config.train_evaluations.iter().map(|s| s.evaluation.build()).collect();
            let mut loss_sums = vec![0.0; losses.len()];
            let mut penalty_sum = 0.0;
            let mut batches = 0usize;

            source.reset();
            while let Some(batch) = source.next_batch() {
                let placeholders = bind_batch(&ctx.graph, &config, &batch)?;
                let (values, gradients) = ctx.compute_gradients(&placeholders, &outputs, &trainable)?;

                let GraphContext {
                    graph,
                    updater,
                    listeners,
                    ..
                } = &mut *ctx;
                let updater = updater.as_mut().ok_or(TrainingError::NoTrainingConfig)?;
                for name in &trainable {
                    let Some(gradient) = gradients.get(name) else {
                        continue;
                    };
                    let id = graph.id_of(name)?;
                    let param = graph
                        .array_mut(id)
                        .ok_or_else(|| RuntimeError::MissingArray(name.clone()))?;
                    if config.l2 > 0.0 {
                        penalty_sum += l2_penalty(param, config.l2);
                        let gradient = regularized(name, gradient, param, config.l2)?;
                        updater.apply(name, param, &gradient, config.iteration_count)?;
                    } else {
                        updater.apply(name, param, gradient, config.iteration_count)?;
                    }
                }

                let mut batch_loss = 0.0;
                for (sum, loss) in loss_sums.iter_mut().zip(&losses) {
                    let value = values.get(loss).ok_or_else(|| TrainingError::MissingOutput(loss.clone()))?;
                    let loss = value.sum_all();
                    *sum += loss;
                    batch_loss += loss;
                }
                update_metrics(&config.train_evaluations, &mut metrics, &values, &batch)?;

                for listener in listeners.iter_mut() {
                    listener.iteration_done(epoch, config.iteration_count, batch_loss);
                }
                config.iteration_count += 1;
                batches += 1;
            }
            if batches == 0 {
                return Err(TrainingError::EmptyDataSource.into());
            }

            let mean_losses: Vec<f64> = loss_sums.iter().map(|s| s / batches as f64).collect();
            history.loss_curve.push(mean_losses.clone());
            history.regularization_curve.push(penalty_sum / batches as f64);
            history
                .train_evaluations
                .push(collect_results(&config.train_evaluations, &metrics));
            let validation_results = match validation.as_deref_mut() {
                Some(source) if !config.validation_evaluations.is_empty() => {
                    let specs = config.validation_evaluations.clone();
                    evaluate_source(ctx, &config, source, &specs)?
                }
                _ => Vec::new(),
            };
            history.validation_evaluations.push(validation_results);

            config.epoch_count += 1;
            ctx.training_config = Some(config.clone());
            info!(
                epoch,
                iterations = config.iteration_count,
                loss = mean_losses.iter().sum::<f64>(),
                regularization = penalty_sum / batches as f64,
                "epoch finished"
            );

            let GraphContext {
                graph,
                updater,
                listeners,
                ..
            } = &mut *ctx;
            let state = EpochEnd {
                epoch,
                iteration: config.iteration_count,
                losses: &mean_losses,
                loss_variables: &losses,
                graph,
                config: &config,
                updater: updater.as_deref(),
            };
            for listener in listeners.iter_mut() {
                listener.epoch_end(&state)?;
            }
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataLoader, InMemoryDataset, SingletonSource};
    use crate::graph::DType;
    use crate::metrics::Evaluation;
    use crate::optimizers::UpdaterConfig;
    use approx::assert_abs_diff_eq;

    /// `out = in * w`, loss = mse(out, label).
    fn scalar_model() -> SameDiff {
        let sd = SameDiff::with_seed(3);
        let input = sd.placeholder("in", DType::F64, &[-1, 1]).unwrap();
        let label = sd.placeholder("label", DType::F64, &[-1, 1]).unwrap();
        let w = sd.var("w", Value::from_f64(&[1, 1], vec![0.0]).unwrap()).unwrap();
        let out = input.mmul(&w).unwrap().rename("out").unwrap();
        let diff = (&out - &label).unwrap();
        let loss = diff.square().unwrap().mean_all().unwrap().rename("mse").unwrap();
        loss.mark_as_loss().unwrap();
        sd
    }

    fn line_data() -> MultiDataSet {
        let xs: Vec<f64> = (0..8).map(|i| i as f64 / 4.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x).collect();
        MultiDataSet::single(
            Value::from_f64(&[8, 1], xs).unwrap(),
            Value::from_f64(&[8, 1], ys).unwrap(),
        )
    }

    fn config(updater: UpdaterConfig) -> TrainingConfig {
        TrainingConfig::builder()
            .updater(updater)
            .feature_mapping(&["in"])
            .label_mapping(&["label"])
            .train_evaluation("out", 0, Evaluation::Mse)
            .build()
            .unwrap()
    }

    #[test]
    fn fit_without_config_fails() {
        let sd = scalar_model();
        let mut source = SingletonSource::new(line_data());
        let err = sd.fit(&mut source, 1).unwrap_err();
        assert!(matches!(err, crate::Error::Training(TrainingError::NoTrainingConfig)));
    }

    #[test]
    fn sgd_learns_the_slope() {
        let sd = scalar_model();
        sd.set_training_config(config(UpdaterConfig::sgd(0.2))).unwrap();
        let mut source = SingletonSource::new(line_data());
        let history = sd.fit(&mut source, 200).unwrap();

        assert_eq!(history.epochs(), 200);
        let curve = history.total_loss_curve();
        assert!(curve[curve.len() - 1] < curve[0]);
        let w = sd.get_array("w").unwrap();
        assert_abs_diff_eq!(w.scalar_value().unwrap(), 3.0, epsilon = 1e-3);

        let config = sd.training_config().unwrap();
        assert_eq!(config.epoch_count, 200);
        assert_eq!(config.iteration_count, 200);
        assert!(history.train_evaluation(199, "out", Evaluation::Mse).unwrap() < 1e-4);
    }

    #[test]
    fn features_are_cast_to_placeholder_dtype() {
        let sd = scalar_model();
        sd.set_training_config(config(UpdaterConfig::adam(0.1))).unwrap();
        let batch = MultiDataSet::single(
            Value::from_f32(&[2, 1], vec![1.0, 2.0]).unwrap(),
            Value::from_f32(&[2, 1], vec![3.0, 6.0]).unwrap(),
        );
        let mut source = SingletonSource::new(batch);
        assert!(sd.fit(&mut source, 3).is_ok());
    }

    #[test]
    fn wrong_batch_arity_is_reported() {
        let sd = scalar_model();
        sd.set_training_config(config(UpdaterConfig::sgd(0.1))).unwrap();
        let data = line_data();
        let batch = MultiDataSet::new(vec![data.features[0].clone(), data.features[0].clone()], data.labels);
        let mut source = SingletonSource::new(batch);
        let err = sd.fit(&mut source, 1).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Training(TrainingError::BatchArity {
                kind: "feature",
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn minibatches_and_validation() {
        let sd = scalar_model();
        let config = TrainingConfig::builder()
            .updater(UpdaterConfig::nesterovs(0.05, 0.9))
            .feature_mapping(&["in"])
            .label_mapping(&["label"])
            .validation_evaluation("out", 0, Evaluation::Mae)
            .build()
            .unwrap();
        sd.set_training_config(config).unwrap();
        let data = line_data();
        let dataset = InMemoryDataset::new(data.features.clone(), data.labels.clone()).unwrap();
        let mut train = DataLoader::new(dataset, 3).shuffle(true).seed(1);
        let mut validation = SingletonSource::new(data);

        let history = sd.fit_with_validation(&mut train, 4, &mut validation).unwrap();
        assert_eq!(sd.training_config().unwrap().iteration_count, 12);
        assert_eq!(history.validation_evaluations.len(), 4);
        assert!(history.validation_evaluation(3, "out", Evaluation::Mae).is_some());
    }

    #[test]
    fn updater_state_survives_config_reset() {
        let sd = scalar_model();
        sd.set_training_config(config(UpdaterConfig::adam(0.1))).unwrap();
        let mut source = SingletonSource::new(line_data());
        sd.fit(&mut source, 2).unwrap();
        let state = sd.updater_state().unwrap();
        assert!(state.contains_key("w/m"));

        sd.set_training_config(sd.training_config().unwrap()).unwrap();
        assert_eq!(sd.updater_state().unwrap().len(), state.len());
        sd.set_training_config(config(UpdaterConfig::sgd(0.1))).unwrap();
        assert!(sd.updater_state().unwrap().is_empty());
    }

    #[test]
    fn evaluate_runs_inference_only() {
        let sd = scalar_model();
        sd.set_training_config(config(UpdaterConfig::sgd(0.1))).unwrap();
        sd.set_array("w", Value::from_f64(&[1, 1], vec![3.0]).unwrap()).unwrap();
        let mut source = SingletonSource::new(line_data());
        let results = sd
            .evaluate(&mut source, &[EvaluationSpec::new("out", 0, Evaluation::Mse)])
            .unwrap();
        assert_abs_diff_eq!(results[0].value, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sd.get_array("w").unwrap().scalar_value().unwrap(), 3.0);
    }

    #[test]
    fn evaluation_shape_mismatch_is_reported() {
        let sd = scalar_model();
        sd.set_training_config(config(UpdaterConfig::sgd(0.1))).unwrap();
        let ones = sd.constant("ones", Value::from_f64(&[1, 3], vec![1.0; 3]).unwrap()).unwrap();
        let wide = sd.get_variable("out").unwrap().mmul(&ones).unwrap().rename("wide").unwrap();
        let mut source = SingletonSource::new(line_data());
        let err = sd
            .evaluate(&mut source, &[EvaluationSpec::new(&wide.name(), 0, Evaluation::Mse)])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            TrainingError::EvaluationShape {
                variable: "wide".to_string(),
                prediction: vec![8, 3],
                label: vec![8, 1],
            }
            .to_string()
        );
    }

    #[test]
    fn accuracy_accepts_class_indices() {
        assert!(shapes_match(Evaluation::Mse, &[4, 2], &[4, 2]));
        assert!(shapes_match(Evaluation::Accuracy, &[4, 3], &[4, 1]));
        assert!(shapes_match(Evaluation::Accuracy, &[4, 3], &[4]));
        assert!(!shapes_match(Evaluation::Accuracy, &[4, 1], &[4]));
        assert!(!shapes_match(Evaluation::Accuracy, &[4, 3], &[2, 1]));
        assert!(!shapes_match(Evaluation::Mse, &[4, 3], &[4, 1]));
        assert!(!shapes_match(Evaluation::F1, &[4], &[4, 1]));
    }
}
