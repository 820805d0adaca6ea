//! Integration tests for conditionals and loops.

use samediff::graph::Operation;
use samediff::runtime::RuntimeError;
use samediff::serialization::Archive;
use samediff::train::Listener;
use samediff::{DType, Error, SameDiff, Tensor, Value};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

fn feed(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Counts executed ops of one type, including ops inside loop bodies.
struct OpCounter {
    type_name: &'static str,
    count: Rc<Cell<usize>>,
}

impl Listener for OpCounter {
    fn op_executed(&mut self, op: &Operation, _outputs: &[Value]) {
        if op.kind().type_name() == self.type_name {
            self.count.set(self.count.get() + 1);
        }
    }
}

/// `(i, x) -> (i + 1, 2x)` while `i < limit`.
fn doubling_loop(sd: &SameDiff, i: &Tensor, x: &Tensor, limit: f64) -> Vec<Tensor> {
    sd.while_loop(
        Some("doubling"),
        &[i, x],
        None,
        move |_, args| args[0].lt_scalar(limit),
        |_, args| Ok(vec![args[0].add_scalar(1.0)?, args[1].mul_scalar(2.0)?]),
    )
    .unwrap()
}

#[test]
fn loop_runs_until_condition_is_false() {
    let sd = SameDiff::create();
    let i = sd.placeholder("i", DType::F64, &[]).unwrap();
    let x = sd.placeholder("x", DType::F64, &[2]).unwrap();
    let out = doubling_loop(&sd, &i, &x, 5.0);
    assert_eq!(out[0].name(), "doubling");
    assert_eq!(out[1].name(), "doubling:1");

    let conditions = Rc::new(Cell::new(0));
    sd.add_listener(Box::new(OpCounter {
        type_name: "lt",
        count: conditions.clone(),
    }));

    let feeds = feed(vec![
        ("i", Value::scalar_f64(0.0)),
        ("x", Value::from_f64(&[2], vec![1.0, -0.5]).unwrap()),
    ]);
    let values = sd.output(&feeds, &["doubling", "doubling:1"]).unwrap();
    assert_eq!(values["doubling"], Value::scalar_f64(5.0));
    assert_eq!(values["doubling:1"], Value::from_f64(&[2], vec![32.0, -16.0]).unwrap());
    // Five true evaluations and the final false one.
    assert_eq!(conditions.get(), 6);
}

#[test]
fn loop_with_false_condition_returns_inputs() {
    let sd = SameDiff::create();
    let i = sd.placeholder("i", DType::F64, &[]).unwrap();
    let x = sd.placeholder("x", DType::F64, &[2]).unwrap();
    let out = doubling_loop(&sd, &i, &x, 3.0);

    let input = Value::from_f64(&[2], vec![4.0, 7.0]).unwrap();
    let feeds = feed(vec![("i", Value::scalar_f64(5.0)), ("x", input.clone())]);
    assert_eq!(out[0].eval(&feeds).unwrap(), Value::scalar_f64(5.0));
    assert_eq!(out[1].eval(&feeds).unwrap(), input);
}

#[test]
fn runaway_loop_hits_iteration_limit() {
    let sd = SameDiff::create();
    let x = sd.placeholder("x", DType::F64, &[]).unwrap();
    let out = sd
        .while_loop(
            Some("forever"),
            &[&x],
            Some(10),
            |_, args| args[0].gt_scalar(-1.0),
            |_, args| Ok(vec![args[0].add_scalar(1.0)?]),
        )
        .unwrap();
    let err = out[0].eval(&feed(vec![("x", Value::scalar_f64(0.0))])).unwrap_err();
    assert!(matches!(
        err,
        Error::Runtime(RuntimeError::LoopLimitExceeded { ref op, limit: 10 }) if op == "forever"
    ));
}

#[test]
fn conditional_inside_loop_body() {
    let sd = SameDiff::create();
    let i = sd.placeholder("i", DType::F64, &[]).unwrap();
    let x = sd.placeholder("x", DType::F64, &[]).unwrap();
    let out = sd
        .while_loop(
            None,
            &[&i, &x],
            Some(100),
            |_, args| args[0].lt_scalar(4.0),
            |body, args| {
                let next = body.if_cond(
                    None,
                    &[&args[1]],
                    |_, x| x[0].gt_scalar(10.0),
                    |_, x| Ok(vec![x[0].sub_scalar(5.0)?]),
                    |_, x| Ok(vec![x[0].mul_scalar(3.0)?]),
                )?;
                Ok(vec![args[0].add_scalar(1.0)?, next[0].clone()])
            },
        )
        .unwrap();

    // 1 -> 3 -> 9 -> 27 -> 22 -> 17
    let feeds = feed(vec![("i", Value::scalar_f64(0.0)), ("x", Value::scalar_f64(1.0))]);
    assert_eq!(out[1].eval(&feeds).unwrap(), Value::scalar_f64(17.0));
}

#[test]
fn loop_inside_loop_body() {
    let sd = SameDiff::create();
    let i = sd.placeholder("i", DType::F64, &[]).unwrap();
    let acc = sd.placeholder("acc", DType::F64, &[]).unwrap();
    let out = sd
        .while_loop(
            Some("outer"),
            &[&i, &acc],
            Some(10),
            |_, args| args[0].lt_scalar(3.0),
            |body, args| {
                let two = body.constant("two", Value::scalar_f64(2.0))?;
                let inner = body.while_loop(
                    Some("inner"),
                    &[&two, &args[1]],
                    Some(10),
                    |_, a| a[0].gt_scalar(0.0),
                    |_, a| Ok(vec![a[0].sub_scalar(1.0)?, a[1].add_scalar(1.0)?]),
                )?;
                Ok(vec![args[0].add_scalar(1.0)?, inner[1].clone()])
            },
        )
        .unwrap();
    let total = out[1].name();
    assert_eq!(total, "outer:1");

    let inner_conditions = Rc::new(Cell::new(0));
    sd.add_listener(Box::new(OpCounter {
        type_name: "gt",
        count: inner_conditions.clone(),
    }));
    let feeds = feed(vec![("i", Value::scalar_f64(0.0)), ("acc", Value::scalar_f64(0.0))]);
    assert_eq!(sd.output_single(&feeds, &total).unwrap(), Value::scalar_f64(6.0));
    // Three outer iterations, each with two true inner checks and a false one.
    assert_eq!(inner_conditions.get(), 9);

    let bytes = sd.archive(false).to_bytes().unwrap();
    let restored = SameDiff::from_archive(Archive::from_bytes(&bytes, false).unwrap()).unwrap();
    assert_eq!(*restored.graph(), *sd.graph());
    let feeds = feed(vec![("i", Value::scalar_f64(1.0)), ("acc", Value::scalar_f64(0.5))]);
    assert_eq!(restored.output_single(&feeds, &total).unwrap(), Value::scalar_f64(4.5));
}

#[test]
fn conditional_is_differentiable() {
    let sd = SameDiff::create();
    let x = sd.var("x", Value::scalar_f64(2.0)).unwrap();
    let branched = sd
        .if_cond(
            None,
            &[&x],
            |_, args| args[0].gt_scalar(0.0),
            |_, args| Ok(vec![args[0].square()?]),
            |_, args| Ok(vec![args[0].neg()?]),
        )
        .unwrap();
    branched[0].sum_all().unwrap().rename("loss").unwrap().mark_as_loss().unwrap();

    let grads = sd.calculate_gradients(&HashMap::new(), &["x"]).unwrap();
    assert_eq!(grads["x"], Value::scalar_f64(4.0));

    sd.set_array("x", Value::scalar_f64(-3.0)).unwrap();
    let grads = sd.calculate_gradients(&HashMap::new(), &["x"]).unwrap();
    assert_eq!(grads["x"], Value::scalar_f64(-1.0));
}

#[test]
fn loops_stop_gradient_propagation() {
    let sd = SameDiff::create();
    let i = sd.constant("i", Value::scalar_f64(0.0)).unwrap();
    let w = sd.var("w", Value::scalar_f64(1.5)).unwrap();
    let b = sd.var("b", Value::scalar_f64(0.5)).unwrap();
    let out = doubling_loop(&sd, &i, &w, 2.0);
    (&out[1] + &b).unwrap().rename("loss").unwrap().mark_as_loss().unwrap();

    assert_eq!(sd.output_single(&HashMap::new(), "loss").unwrap(), Value::scalar_f64(6.5));
    assert!(sd.grad("w").unwrap().is_none());
    assert!(sd.grad("b").unwrap().is_some());
    let grads = sd.calculate_gradients(&HashMap::new(), &["w", "b"]).unwrap();
    assert!(!grads.contains_key("w"));
    assert_eq!(grads["b"], Value::scalar_f64(1.0));
}
