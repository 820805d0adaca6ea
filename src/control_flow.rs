//! Conditionals and loops built from nested graphs.
//!
//! Each body is built by a closure into its own [`SameDiff`]. The closure
//! receives one placeholder per operand and returns the body outputs. Bodies
//! cannot read variables of the enclosing graph: anything they need has to be
//! passed in as an operand.

use crate::error::Result;
use crate::graph::{GraphError, OpKind, SubGraph, VariableType};
use crate::tensor::{SameDiff, Tensor};
use tracing::debug;

/// How the placeholders of a body declare their shapes.
#[derive(Clone, Copy)]
enum BodyShapes {
    /// Same shapes as the operands.
    Operands,
    /// Any shape; loop-carried values may change shape between iterations.
    Dynamic,
}

impl SameDiff {
    /// Builds a conditional.
    ///
    /// `cond` returns a boolean scalar; `then_fn` and `else_fn` must return
    /// the same number of outputs with matching dtypes. The outer graph sees
    /// one `If` op whose outputs are returned.
    pub fn if_cond<C, T, E>(
        &self,
        name: Option<&str>,
        inputs: &[&Tensor],
        cond: C,
        then_fn: T,
        else_fn: E,
    ) -> Result<Vec<Tensor>>
    where
        C: FnOnce(&SameDiff, &[Tensor]) -> Result<Tensor>,
        T: FnOnce(&SameDiff, &[Tensor]) -> Result<Vec<Tensor>>,
        E: FnOnce(&SameDiff, &[Tensor]) -> Result<Vec<Tensor>>,
    {
        let cond = build_body(inputs, BodyShapes::Operands, |sd, args| Ok(vec![cond(sd, args)?]))?;
        let then_branch = build_body(inputs, BodyShapes::Operands, then_fn)?;
        let else_branch = build_body(inputs, BodyShapes::Operands, else_fn)?;
        debug!(
            then_ops = then_branch.graph.ops().len(),
            else_ops = else_branch.graph.ops().len(),
            "built conditional"
        );
        self.op(
            name,
            OpKind::If {
                cond,
                then_branch,
                else_branch,
            },
            inputs,
        )
    }

    /// Builds a loop over `loop_vars`.
    ///
    /// `cond` is evaluated against the current values before every iteration;
    /// `body` returns the next values (same count and dtypes). When the
    /// condition is false initially the inputs are returned unchanged.
    /// `max_iterations` turns a runaway loop into an error.
    pub fn while_loop<C, B>(
        &self,
        name: Option<&str>,
        loop_vars: &[&Tensor],
        max_iterations: Option<usize>,
        cond: C,
        body: B,
    ) -> Result<Vec<Tensor>>
    where
        C: FnOnce(&SameDiff, &[Tensor]) -> Result<Tensor>,
        B: FnOnce(&SameDiff, &[Tensor]) -> Result<Vec<Tensor>>,
    {
        if loop_vars.is_empty() {
            return Err(GraphError::InvalidControlFlow {
                name: name.unwrap_or("while").to_string(),
                message: "a loop needs at least one loop variable".to_string(),
            }
            .into());
        }
        let cond = build_body(loop_vars, BodyShapes::Dynamic, |sd, args| Ok(vec![cond(sd, args)?]))?;
        let body = build_body(loop_vars, BodyShapes::Dynamic, body)?;
        self.op(
            name,
            OpKind::While {
                cond,
                body,
                max_iterations,
            },
            loop_vars,
        )
    }
}

/// Runs `build` against a fresh graph whose placeholders mirror `operands`.
fn build_body<F>(operands: &[&Tensor], shapes: BodyShapes, build: F) -> Result<SubGraph>
where
    F: FnOnce(&SameDiff, &[Tensor]) -> Result<Vec<Tensor>>,
{
    let sd = SameDiff::create();
    let mut args = Vec::with_capacity(operands.len());
    let mut inputs = Vec::with_capacity(operands.len());
    for operand in operands {
        let name = sd.graph().unique_name(&operand.name());
        let arg = match operand.var_type() {
            VariableType::Sequence => sd.sequence(&name, operand.dtype())?,
            _ => match (shapes, operand.shape()) {
                (BodyShapes::Operands, Some(shape)) => sd.placeholder(&name, operand.dtype(), &shape)?,
                _ => sd.placeholder_any_shape(&name, operand.dtype())?,
            },
        };
        args.push(arg);
        inputs.push(name);
    }

    let results = build(&sd, &args)?;
    let mut outputs = Vec::with_capacity(results.len());
    for result in &results {
        if !std::rc::Rc::ptr_eq(&result.sd.ctx, &sd.ctx) {
            return Err(GraphError::ForeignVariable(result.name()).into());
        }
        outputs.push(result.name());
    }
    let graph = sd.graph().clone();
    Ok(SubGraph::new(graph, inputs, outputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::graph::{DType, Value};
    use std::collections::HashMap;

    #[test]
    fn if_selects_branch() {
        let sd = SameDiff::create();
        let x = sd.placeholder("x", DType::F64, &[]).unwrap();
        let out = sd
            .if_cond(
                Some("cond"),
                &[&x],
                |_, args| args[0].gt_scalar(0.0),
                |_, args| Ok(vec![args[0].mul_scalar(2.0)?]),
                |_, args| Ok(vec![args[0].neg()?]),
            )
            .unwrap();
        assert_eq!(out[0].name(), "cond");

        let mut feed = HashMap::new();
        feed.insert("x".to_string(), Value::scalar_f64(3.0));
        assert_eq!(out[0].eval(&feed).unwrap(), Value::scalar_f64(6.0));
        feed.insert("x".to_string(), Value::scalar_f64(-3.0));
        assert_eq!(out[0].eval(&feed).unwrap(), Value::scalar_f64(3.0));
    }

    #[test]
    fn bodies_cannot_capture_outer_variables() {
        let sd = SameDiff::create();
        let x = sd.placeholder("x", DType::F64, &[]).unwrap();
        let y = sd.placeholder("y", DType::F64, &[]).unwrap();
        let err = sd
            .if_cond(
                None,
                &[&x],
                |_, args| args[0].gt_scalar(0.0),
                |_, args| Ok(vec![args[0].add(&y)?]),
                |_, args| Ok(vec![args[0].clone()]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::ForeignVariable(_))));
    }

    #[test]
    fn mismatched_branches_are_rejected() {
        let sd = SameDiff::create();
        let x = sd.placeholder("x", DType::F64, &[]).unwrap();
        let err = sd
            .if_cond(
                None,
                &[&x],
                |_, args| args[0].gt_scalar(0.0),
                |_, args| Ok(vec![args[0].clone()]),
                |_, args| Ok(vec![args[0].cast(DType::I64)?]),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::Inference { .. })));
    }
}
