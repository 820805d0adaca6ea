//! Weight initialization schemes for trainable variables.

use crate::graph::{DType, Value};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    Zeros,
    Ones,
    Constant(f64),
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
    /// Uniform in `[-l, l]` with `l = sqrt(6 / (fan_in + fan_out))`.
    XavierUniform,
}

impl WeightInit {
    /// Draws an array of the given dtype and shape. Returns a description of
    /// the problem when the parameters are invalid.
    pub fn sample(&self, dtype: DType, shape: &[usize], rng: &mut StdRng) -> Result<Value, String> {
        let dim = IxDyn(shape);
        let array: ArrayD<f64> = match *self {
            WeightInit::Zeros => ArrayD::zeros(dim),
            WeightInit::Ones => ArrayD::ones(dim),
            WeightInit::Constant(value) => ArrayD::from_elem(dim, value),
            WeightInit::Uniform { low, high } => {
                if !(low < high) {
                    return Err(format!("uniform bounds must satisfy low < high, got [{}, {})", low, high));
                }
                ArrayD::random_using(dim, Uniform::new(low, high), rng)
            }
            WeightInit::Normal { mean, std } => {
                let normal = Normal::new(mean, std).map_err(|e| format!("invalid normal distribution: {}", e))?;
                ArrayD::random_using(dim, normal, rng)
            }
            WeightInit::XavierUniform => {
                let (fan_in, fan_out) = match shape {
                    [] => (1, 1),
                    [n] => (*n, *n),
                    [rows, cols, ..] => (*rows, *cols),
                };
                let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
                ArrayD::random_using(dim, Uniform::new(-limit, limit), rng)
            }
        };
        Ok(Value::from_f64_array(array, dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn xavier_respects_limit() {
        let mut rng = StdRng::seed_from_u64(7);
        let value = WeightInit::XavierUniform.sample(DType::F32, &[4, 2], &mut rng).unwrap();
        let limit = (6.0f64 / 6.0).sqrt();
        assert_eq!(value.shape(), vec![4, 2]);
        assert!(value.to_f64_array().unwrap().iter().all(|x| x.abs() <= limit));
    }

    #[test]
    fn invalid_bounds_are_reported() {
        let mut rng = StdRng::seed_from_u64(0);
        let init = WeightInit::Uniform { low: 1.0, high: 1.0 };
        assert!(init.sample(DType::F64, &[2], &mut rng).is_err());
    }
}
