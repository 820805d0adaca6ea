//! Finite-difference validation of analytic gradients.
//!
//! Every element of every checked variable is perturbed by `±epsilon` and the
//! central difference of the total loss is compared with the gradient from the
//! gradient graph. Run it on `F64` graphs; `F32` rounding dominates the
//! difference quotient for small epsilons.

use crate::error::Result;
use crate::graph::{DType, GraphError, Value, VariableType};
use crate::tensor::SameDiff;
use ndarray::{ArrayD, Dimension};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckConfig {
    pub epsilon: f64,
    /// Largest accepted `|a - n| / (|a| + |n|)`.
    pub max_relative_error: f64,
    /// Differences below this absolute value always pass.
    pub min_absolute_error: f64,
    /// Placeholders to check in addition to the trainable variables.
    pub placeholders: Vec<String>,
    /// Only these variables are checked when non-empty.
    pub only: Vec<String>,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_relative_error: 1e-5,
            min_absolute_error: 1e-8,
            placeholders: Vec::new(),
            only: Vec::new(),
        }
    }
}

impl GradCheckConfig {
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_relative_error(mut self, max_relative_error: f64) -> Self {
        self.max_relative_error = max_relative_error;
        self
    }

    pub fn with_min_absolute_error(mut self, min_absolute_error: f64) -> Self {
        self.min_absolute_error = min_absolute_error;
        self
    }

    pub fn with_placeholders(mut self, placeholders: &[&str]) -> Self {
        self.placeholders = placeholders.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn only(mut self, variables: &[&str]) -> Self {
        self.only = variables.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// One element whose analytic and numeric gradients disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckFailure {
    pub variable: String,
    pub index: Vec<usize>,
    pub analytic: f64,
    pub numeric: f64,
    pub relative_error: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradCheckReport {
    /// Number of elements compared.
    pub checked: usize,
    pub max_relative_error: f64,
    pub failures: Vec<GradCheckFailure>,
}

impl GradCheckReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sum of every loss variable for the current arrays.
fn total_loss(sd: &SameDiff, placeholders: &HashMap<String, Value>, losses: &[&str]) -> Result<f64> {
    let outputs = sd.output(placeholders, losses)?;
    Ok(outputs.values().map(Value::sum_all).sum())
}

/// Compares analytic gradients of the loss variables with central differences.
pub fn check_gradients(
    sd: &SameDiff,
    placeholders: &HashMap<String, Value>,
    config: &GradCheckConfig,
) -> Result<GradCheckReport> {
    let loss_names = sd.loss_variables();
    let losses: Vec<&str> = loss_names.iter().map(String::as_str).collect();
    let sign = if sd.ctx.borrow().minimize() { 1.0 } else { -1.0 };

    let mut names: Vec<String> = sd.trainable_variables().iter().map(|t| t.name()).collect();
    names.extend(config.placeholders.iter().cloned());
    if !config.only.is_empty() {
        names.retain(|n| config.only.contains(n));
    }
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let analytic = sd.calculate_gradients(placeholders, &refs)?;

    let mut feeds = placeholders.clone();
    let mut report = GradCheckReport::default();
    for name in &names {
        let tensor = sd
            .get_variable(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.clone()))?;
        let is_placeholder = tensor.var_type() == VariableType::Placeholder;
        let original = if is_placeholder {
            feeds.get(name).cloned()
        } else {
            tensor.get_array()
        }
        .ok_or_else(|| crate::runtime::RuntimeError::MissingArray(name.clone()))?;
        let dtype: DType = original.dtype();
        let base = original
            .to_f64_array()
            .ok_or_else(|| crate::runtime::RuntimeError::MissingArray(name.clone()))?;
        let gradient = analytic
            .get(name)
            .and_then(Value::to_f64_array)
            .unwrap_or_else(|| ArrayD::zeros(base.raw_dim()));

        let set = |array: ArrayD<f64>, feeds: &mut HashMap<String, Value>| -> Result<()> {
            let value = Value::from_f64_array(array, dtype);
            if is_placeholder {
                feeds.insert(name.clone(), value);
                Ok(())
            } else {
                sd.set_array(name, value)
            }
        };

        for (index, &a) in gradient.indexed_iter() {
            let mut plus = base.clone();
            plus[index.slice()] += config.epsilon;
            set(plus, &mut feeds)?;
            let score_plus = total_loss(sd, &feeds, &losses)?;

            let mut minus = base.clone();
            minus[index.slice()] -= config.epsilon;
            set(minus, &mut feeds)?;
            let score_minus = total_loss(sd, &feeds, &losses)?;

            let numeric = sign * (score_plus - score_minus) / (2.0 * config.epsilon);
            let absolute = (a - numeric).abs();
            let relative = if absolute < config.min_absolute_error {
                0.0
            } else {
                absolute / (a.abs() + numeric.abs())
            };
            report.checked += 1;
            report.max_relative_error = report.max_relative_error.max(relative);
            if relative > config.max_relative_error {
                debug!(variable = %name, index = ?index.slice(), analytic = a, numeric, "gradient mismatch");
                report.failures.push(GradCheckFailure {
                    variable: name.clone(),
                    index: index.slice().to_vec(),
                    analytic: a,
                    numeric,
                    relative_error: relative,
                });
            }
        }
        set(base, &mut feeds)?;
    }
    info!(
        checked = report.checked,
        failures = report.failures.len(),
        max_relative_error = report.max_relative_error,
        "gradient check finished"
    );
    Ok(report)
}
