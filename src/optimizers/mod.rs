//! Gradient updaters that modify trainable arrays in place.
//!
//! Updaters work on concrete values (`Value`) on the CPU. They receive the
//! current parameter and its gradient and apply their update rule. Stateful
//! updaters keep one array per parameter and slot (e.g. Adam's moments),
//! exported as `"<param>/<slot>"` so it can be saved alongside the graph.

use crate::graph::{DType, Value};
use ndarray::{azip, ArrayD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpdaterError {
    #[error("Parameter \"{0}\" is not floating point and cannot be updated")]
    NotFloatingPoint(String),

    #[error("Gradient for \"{param}\" has shape {gradient:?} but the parameter has shape {parameter:?}")]
    ShapeMismatch {
        param: String,
        parameter: Vec<usize>,
        gradient: Vec<usize>,
    },

    #[error("Invalid updater state entry \"{0}\"")]
    InvalidState(String),
}

/// Common interface of all updaters.
pub trait GradientUpdater {
    fn name(&self) -> &'static str;

    /// Updates one parameter in place. `iteration` counts from zero.
    fn apply(&mut self, param: &str, value: &mut Value, gradient: &Value, iteration: usize) -> Result<(), UpdaterError>;

    /// Per-parameter state keyed by `"<param>/<slot>"`.
    fn state(&self) -> HashMap<String, Value>;

    fn set_state(&mut self, state: HashMap<String, Value>) -> Result<(), UpdaterError>;

    fn rename_parameter(&mut self, from: &str, to: &str);

    /// Performs one optimization step over a set of parameters.
    ///
    /// * `parameters` - current parameter values, keyed by variable name.
    /// * `gradients` - gradients of those parameters; entries without a
    ///   matching parameter are ignored.
    fn step(
        &mut self,
        parameters: &mut HashMap<String, Value>,
        gradients: &HashMap<String, Value>,
        iteration: usize,
    ) -> Result<(), UpdaterError> {
        for (name, gradient) in gradients {
            if let Some(value) = parameters.get_mut(name) {
                self.apply(name, value, gradient, iteration)?;
            }
        }
        Ok(())
    }
}

/// Serializable updater configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdaterConfig {
    Sgd {
        learning_rate: f64,
    },
    Nesterovs {
        learning_rate: f64,
        momentum: f64,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    },
}

impl UpdaterConfig {
    pub fn sgd(learning_rate: f64) -> Self {
        UpdaterConfig::Sgd { learning_rate }
    }

    pub fn nesterovs(learning_rate: f64, momentum: f64) -> Self {
        UpdaterConfig::Nesterovs {
            learning_rate,
            momentum,
        }
    }

    /// Adam with the usual defaults (0.9, 0.999, 1e-8).
    pub fn adam(learning_rate: f64) -> Self {
        UpdaterConfig::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            UpdaterConfig::Sgd { learning_rate }
            | UpdaterConfig::Nesterovs { learning_rate, .. }
            | UpdaterConfig::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    /// Describes the first invalid hyper-parameter, if any.
    pub fn validate(&self) -> Result<(), String> {
        let lr = self.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(format!("learning rate must be positive, got {}", lr));
        }
        match self {
            UpdaterConfig::Nesterovs { momentum, .. } if !(0.0..1.0).contains(momentum) => {
                Err(format!("momentum must be in [0, 1), got {}", momentum))
            }
            UpdaterConfig::Adam { beta1, beta2, .. }
                if !(0.0..1.0).contains(beta1) || !(0.0..1.0).contains(beta2) =>
            {
                Err(format!("Adam betas must be in [0, 1), got {} and {}", beta1, beta2))
            }
            _ => Ok(()),
        }
    }

    pub fn build(&self) -> Box<dyn GradientUpdater> {
        match *self {
            UpdaterConfig::Sgd { learning_rate } => Box::new(Sgd::new(learning_rate)),
            UpdaterConfig::Nesterovs {
                learning_rate,
                momentum,
            } => Box::new(Nesterovs::new(learning_rate, momentum)),
            UpdaterConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(learning_rate, beta1, beta2, epsilon)),
        }
    }
}

impl fmt::Display for UpdaterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterConfig::Sgd { learning_rate } => write!(f, "Sgd(lr={})", learning_rate),
            UpdaterConfig::Nesterovs {
                learning_rate,
                momentum,
            } => write!(f, "Nesterovs(lr={}, momentum={})", learning_rate, momentum),
            UpdaterConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => write!(f, "Adam(lr={}, beta1={}, beta2={}, eps={})", learning_rate, beta1, beta2, epsilon),
        }
    }
}

/// Runs `update` on `f64` copies of parameter and gradient, then stores the
/// result back in the parameter's own dtype.
fn update_in_place(
    param: &str,
    value: &mut Value,
    gradient: &Value,
    update: impl FnOnce(&mut ArrayD<f64>, &ArrayD<f64>),
) -> Result<(), UpdaterError> {
    let dtype = value.dtype();
    if !dtype.is_floating_point() || value.is_sequence() {
        return Err(UpdaterError::NotFloatingPoint(param.to_string()));
    }
    if value.shape() != gradient.shape() {
        return Err(UpdaterError::ShapeMismatch {
            param: param.to_string(),
            parameter: value.shape(),
            gradient: gradient.shape(),
        });
    }
    let (Some(mut p), Some(g)) = (value.to_f64_array(), gradient.to_f64_array()) else {
        return Err(UpdaterError::NotFloatingPoint(param.to_string()));
    };
    update(&mut p, &g);
    *value = Value::from_f64_array(p, dtype);
    Ok(())
}

fn export_slot(out: &mut HashMap<String, Value>, slot: &str, arrays: &HashMap<String, ArrayD<f64>>) {
    for (param, array) in arrays {
        out.insert(format!("{}/{}", param, slot), Value::F64(array.clone()));
    }
}

fn split_key(key: &str) -> Result<(&str, &str), UpdaterError> {
    key.rsplit_once('/')
        .ok_or_else(|| UpdaterError::InvalidState(key.to_string()))
}

fn state_array(key: &str, value: Value) -> Result<ArrayD<f64>, UpdaterError> {
    value
        .cast(DType::F64)
        .as_f64()
        .cloned()
        .ok_or_else(|| UpdaterError::InvalidState(key.to_string()))
}

fn rename_key<V>(map: &mut HashMap<String, V>, from: &str, to: &str) {
    if let Some(entry) = map.remove(from) {
        map.insert(to.to_string(), entry);
    }
}

/// Stochastic Gradient Descent (SGD).
#[derive(Debug, Clone)]
pub struct Sgd {
    /// Learning rate.
    lr: f64,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl GradientUpdater for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn apply(&mut self, param: &str, value: &mut Value, gradient: &Value, _iteration: usize) -> Result<(), UpdaterError> {
        let lr = self.lr;
        update_in_place(param, value, gradient, |p, g| {
            // param = param - lr * grad
            azip!((p in p, &g in g) *p -= lr * g);
        })
    }

    fn state(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    fn set_state(&mut self, _state: HashMap<String, Value>) -> Result<(), UpdaterError> {
        Ok(())
    }

    fn rename_parameter(&mut self, _from: &str, _to: &str) {}
}

/// SGD with Nesterov momentum.
#[derive(Debug, Clone)]
pub struct Nesterovs {
    lr: f64,
    momentum: f64,
    velocity: HashMap<String, ArrayD<f64>>,
}

impl Nesterovs {
    pub fn new(lr: f64, momentum: f64) -> Self {
        Self {
            lr,
            momentum,
            velocity: HashMap::new(),
        }
    }
}

impl GradientUpdater for Nesterovs {
    fn name(&self) -> &'static str {
        "nesterovs"
    }

    fn apply(&mut self, param: &str, value: &mut Value, gradient: &Value, _iteration: usize) -> Result<(), UpdaterError> {
        let (lr, mu) = (self.lr, self.momentum);
        let shape = value.shape();
        let v = self
            .velocity
            .entry(param.to_string())
            .or_insert_with(|| ArrayD::zeros(shape.as_slice()));
        update_in_place(param, value, gradient, |p, g| {
            // v' = mu * v - lr * g;  p += -mu * v + (1 + mu) * v'
            azip!((p in p, v in v, &g in g) {
                let previous = *v;
                *v = mu * previous - lr * g;
                *p += -mu * previous + (1.0 + mu) * *v;
            });
        })
    }

    fn state(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        export_slot(&mut out, "velocity", &self.velocity);
        out
    }

    fn set_state(&mut self, state: HashMap<String, Value>) -> Result<(), UpdaterError> {
        self.velocity.clear();
        for (key, value) in state {
            let (param, slot) = split_key(&key)?;
            if slot != "velocity" {
                return Err(UpdaterError::InvalidState(key.clone()));
            }
            let param = param.to_string();
            self.velocity.insert(param, state_array(&key, value)?);
        }
        Ok(())
    }

    fn rename_parameter(&mut self, from: &str, to: &str) {
        rename_key(&mut self.velocity, from, to);
    }
}

/// Adam (adaptive moment estimation) with bias correction.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: HashMap<String, ArrayD<f64>>,
    v: HashMap<String, ArrayD<f64>>,
}

impl Adam {
    pub fn new(lr: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }
}

impl GradientUpdater for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn apply(&mut self, param: &str, value: &mut Value, gradient: &Value, iteration: usize) -> Result<(), UpdaterError> {
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let t = (iteration + 1) as i32;
        let alpha = self.lr * (1.0 - b2.powi(t)).sqrt() / (1.0 - b1.powi(t));
        let shape = value.shape();
        let m = self
            .m
            .entry(param.to_string())
            .or_insert_with(|| ArrayD::zeros(shape.as_slice()));
        let v = self
            .v
            .entry(param.to_string())
            .or_insert_with(|| ArrayD::zeros(shape.as_slice()));
        update_in_place(param, value, gradient, |p, g| {
            azip!((p in p, m in m, v in v, &g in g) {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= alpha * *m / (v.sqrt() + eps);
            });
        })
    }

    fn state(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        export_slot(&mut out, "m", &self.m);
        export_slot(&mut out, "v", &self.v);
        out
    }

    fn set_state(&mut self, state: HashMap<String, Value>) -> Result<(), UpdaterError> {
        self.m.clear();
        self.v.clear();
        for (key, value) in state {
            let (param, slot) = split_key(&key)?;
            let param = param.to_string();
            let array = state_array(&key, value)?;
            match slot {
                "m" => self.m.insert(param, array),
                "v" => self.v.insert(param, array),
                _ => return Err(UpdaterError::InvalidState(key.clone())),
            };
        }
        Ok(())
    }

    fn rename_parameter(&mut self, from: &str, to: &str) {
        rename_key(&mut self.m, from, to);
        rename_key(&mut self.v, from, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn values(value: &Value) -> Vec<f64> {
        value.to_f64_array().unwrap().iter().copied().collect()
    }

    #[test]
    fn sgd_step_keeps_dtype() {
        let mut sgd = Sgd::new(0.1);
        let mut params = HashMap::new();
        params.insert("w".to_string(), Value::from_f32(&[2], vec![1.0, 2.0]).unwrap());
        let mut grads = HashMap::new();
        grads.insert("w".to_string(), Value::from_f32(&[2], vec![1.0, -1.0]).unwrap());
        sgd.step(&mut params, &grads, 0).unwrap();
        assert_eq!(params["w"].dtype(), DType::F32);
        let w = values(&params["w"]);
        assert_abs_diff_eq!(w[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], 2.1, epsilon = 1e-6);
    }

    #[test]
    fn adam_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.01, 0.9, 0.999, 1e-8);
        let mut w = Value::from_f64(&[2], vec![0.0, 0.0]).unwrap();
        let g = Value::from_f64(&[2], vec![3.0, -0.5]).unwrap();
        adam.apply("w", &mut w, &g, 0).unwrap();
        let w = values(&w);
        assert_abs_diff_eq!(w[0], -0.01, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], 0.01, epsilon = 1e-6);
        assert_eq!(adam.state().len(), 2);
    }

    #[test]
    fn state_survives_export_and_rename() {
        let mut nesterovs = Nesterovs::new(0.1, 0.9);
        let mut w = Value::from_f64(&[1], vec![1.0]).unwrap();
        let g = Value::from_f64(&[1], vec![1.0]).unwrap();
        nesterovs.apply("w", &mut w, &g, 0).unwrap();
        let state = nesterovs.state();
        assert!(state.contains_key("w/velocity"));

        let mut restored = Nesterovs::new(0.1, 0.9);
        restored.set_state(state).unwrap();
        restored.rename_parameter("w", "weights");
        assert!(restored.state().contains_key("weights/velocity"));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut sgd = Sgd::new(0.1);
        let mut w = Value::zeros(DType::F64, &[2]);
        let g = Value::zeros(DType::F64, &[3]);
        assert!(matches!(
            sgd.apply("w", &mut w, &g, 0),
            Err(UpdaterError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = UpdaterConfig::adam(1e-3);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"adam\""));
        assert_eq!(serde_json::from_str::<UpdaterConfig>(&json).unwrap(), config);
        assert!(UpdaterConfig::sgd(-1.0).validate().is_err());
    }
}
