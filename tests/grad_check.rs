//! Integration test checking automatic differentiation against finite differences.

use samediff::validation::{check_gradients, GradCheckConfig};
use samediff::{DType, Result, SameDiff, Tensor, Value};

use ndarray::ArrayD;
use std::collections::HashMap;

const EPSILON: f64 = 1e-6;
const TOLERANCE: f64 = 1e-5;

/// Compares two arrays elementwise and panics if they are not close.
fn assert_grads_are_close(analytic: &ArrayD<f64>, numeric: &ArrayD<f64>, tolerance: f64) {
    assert_eq!(analytic.shape(), numeric.shape(), "Gradient shapes do not match!");

    for (a, n) in analytic.iter().zip(numeric.iter()) {
        let diff = (a - n).abs();
        let larger = a.abs().max(n.abs());
        if diff < 1e-9 {
            continue;
        }
        let relative_error = diff / larger;
        if relative_error > tolerance {
            panic!(
                "Gradients do not match! Analytic: {:.6}, Numeric: {:.6}, Relative Error: {:.6}",
                a, n, relative_error
            );
        }
    }
}

/// Builds `sum(f(x))` over a trainable `x` and marks it as the loss.
fn build(graph_builder: fn(&Tensor) -> Result<Tensor>, x: &ArrayD<f64>) -> SameDiff {
    let sd = SameDiff::create();
    let x = sd.var("x", Value::F64(x.clone())).unwrap();
    let y = graph_builder(&x).unwrap();
    y.sum_all().unwrap().rename("loss").unwrap().mark_as_loss().unwrap();
    sd
}

fn get_analytic_grad(graph_builder: fn(&Tensor) -> Result<Tensor>, x: &ArrayD<f64>) -> ArrayD<f64> {
    let sd = build(graph_builder, x);
    let grads = sd.calculate_gradients(&HashMap::new(), &["x"]).unwrap();
    grads["x"].as_f64().expect("gradient of an F64 variable is F64").clone()
}

fn get_numeric_grad(graph_builder: fn(&Tensor) -> Result<Tensor>, x: &ArrayD<f64>) -> ArrayD<f64> {
    let sd = build(graph_builder, x);
    let mut grad = ArrayD::zeros(x.raw_dim());
    for (i, g) in grad.iter_mut().enumerate() {
        let mut x_plus = x.clone();
        x_plus.as_slice_mut().unwrap()[i] += EPSILON;
        let y_plus = run_forward_pass(&sd, &x_plus);
        let mut x_minus = x.clone();
        x_minus.as_slice_mut().unwrap()[i] -= EPSILON;
        let y_minus = run_forward_pass(&sd, &x_minus);
        *g = (y_plus - y_minus) / (2.0 * EPSILON);
    }
    grad
}

fn run_forward_pass(sd: &SameDiff, x: &ArrayD<f64>) -> f64 {
    sd.set_array("x", Value::F64(x.clone())).unwrap();
    let value = sd.output_single(&HashMap::new(), "loss").unwrap();
    value.scalar_value().expect("Output for grad check must be a scalar")
}

fn check(graph_builder: fn(&Tensor) -> Result<Tensor>, x: ArrayD<f64>) {
    let analytic = get_analytic_grad(graph_builder, &x);
    let numeric = get_numeric_grad(graph_builder, &x);
    assert_grads_are_close(&analytic, &numeric, TOLERANCE);
}

fn row(values: &[f64]) -> ArrayD<f64> {
    ArrayD::from_shape_vec(ndarray::IxDyn(&[1, values.len()]), values.to_vec()).unwrap()
}

#[test]
fn test_grad_multiply() {
    check(|x| x * x, row(&[1.0, 2.0, 3.0]));
}

#[test]
fn test_grad_add_subtract() {
    check(|x| &(x + x)? - x, row(&[5.0, -10.0, 1.5]));
}

#[test]
fn test_grad_divide() {
    check(|x| &x.add_scalar(3.0)? / &x.square()?.add_scalar(1.0)?, row(&[0.5, -1.5, 2.0]));
}

#[test]
fn test_grad_sum_broadcast() {
    // The gradient of sum(x * C) is C broadcast back to the shape of x.
    check(
        |x| {
            let c = x
                .same_diff()
                .constant("C", Value::from_f64(&[3], vec![10.0, 20.0, 30.0]).unwrap())?;
            x * &c
        },
        ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
    );
}

#[test]
fn test_grad_unary_ops() {
    let x = row(&[0.3, -0.7, 1.1, 2.0]);
    check(|x| x.tanh(), x.clone());
    check(|x| x.sigmoid(), x.clone());
    check(|x| x.exp(), x.clone());
    check(|x| x.abs(), x.clone());
    check(|x| x.neg(), x.clone());
    check(|x| x.relu(), x.clone());
    check(|x| x.pow(3.0), x.clone());
    check(|x| x.square()?.add_scalar(1.0)?.sqrt(), x.clone());
    check(|x| x.square()?.add_scalar(1.0)?.log(), x);
}

#[test]
fn test_grad_matmul() {
    check(
        |x| {
            let w = x.same_diff().constant(
                "w",
                Value::from_f64(&[3, 2], vec![0.5, -1.0, 2.0, 0.25, -0.75, 1.5]).unwrap(),
            )?;
            x.mmul(&w)?.tanh()
        },
        ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 3]), vec![0.1, 0.2, 0.3, -0.4, 0.5, -0.6]).unwrap(),
    );
}

#[test]
fn test_grad_reductions_and_shapes() {
    let x = ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 3]), vec![1.0, -2.0, 3.0, 0.5, 1.5, -1.0]).unwrap();
    check(|x| x.mean(&[1], true)?.square(), x.clone());
    check(|x| x.sum(&[0], false)?.exp(), x.clone());
    check(|x| x.reshape(&[3, -1])?.transpose()?.tanh(), x.clone());
    check(|x| &x.softmax(-1)? * &x.sigmoid()?, x);
}

#[test]
fn test_grad_complex_ops() {
    // A simplified layer norm multiplied by constants so the gradient is not zero.
    check(
        |x| {
            let mean = x.mean(&[-1], true)?;
            let centered = (x - &mean)?;
            let variance = centered.square()?.mean(&[-1], true)?;
            let std_dev = variance.add_scalar(1e-5)?.sqrt()?;
            let normalized = (&centered / &std_dev)?;
            let constants = x
                .same_diff()
                .constant("C", Value::from_f64(&[1, 4], vec![0.1, -0.2, 0.3, -0.4]).unwrap())?;
            &normalized * &constants
        },
        row(&[1.0, 2.0, 3.0, 4.0]),
    );
}

#[test]
fn test_check_gradients_on_a_two_layer_network() {
    let sd = SameDiff::with_seed(11);
    let input = sd.placeholder("in", DType::F64, &[-1, 4]).unwrap();
    let label = sd.placeholder("label", DType::F64, &[-1, 3]).unwrap();
    let w0 = sd
        .var("w0", Value::from_f64(&[4, 5], (0..20).map(|i| (i as f64 - 10.0) / 13.0).collect()).unwrap())
        .unwrap();
    let b0 = sd.var("b0", Value::from_f64(&[5], vec![0.1, -0.1, 0.2, 0.0, 0.05]).unwrap()).unwrap();
    let w1 = sd
        .var("w1", Value::from_f64(&[5, 3], (0..15).map(|i| (7.0 - i as f64) / 9.0).collect()).unwrap())
        .unwrap();
    let hidden = (&input.mmul(&w0).unwrap() + &b0).unwrap().tanh().unwrap();
    let logits = hidden.mmul(&w1).unwrap();
    samediff::losses::softmax_cross_entropy("loss", &logits, &label)
        .unwrap()
        .mark_as_loss()
        .unwrap();

    let mut feeds = HashMap::new();
    feeds.insert(
        "in".to_string(),
        Value::from_f64(&[2, 4], vec![0.5, -1.0, 0.25, 2.0, -0.3, 0.8, 1.2, -0.6]).unwrap(),
    );
    feeds.insert(
        "label".to_string(),
        Value::from_f64(&[2, 3], vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0]).unwrap(),
    );
    let config = GradCheckConfig::default().with_placeholders(&["in"]);
    let report = check_gradients(&sd, &feeds, &config).unwrap();
    assert_eq!(report.checked, 20 + 5 + 15 + 8);
    assert!(report.passed(), "{:?}", report.failures);
}
