//! Module for shape and data type inference (Shape Inference).
//!
//! Every op is checked when it is added to a graph: operand dtypes must be
//! compatible and static shapes must agree. The inferred dtype and (possibly
//! partially unknown) shape of each output is recorded on its variable.
//! Unknown dimensions are `-1`; an unknown rank is `None`.

use crate::graph::{DType, Graph, GraphError, OpKind, SubGraph, UNKNOWN_DIM};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Operation '{op}' expects {expected} operand(s), got {actual}.")]
    WrongInputCount {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("Operation '{op}' requires operands of the same dtype, got {left} and {right}. \
             Insert a cast on one of the operands.")]
    DTypeMismatch { op: String, left: DType, right: DType },

    #[error("Operation '{op}' does not support dtype {dtype}.")]
    UnsupportedDType { op: String, dtype: DType },

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}. \
             Ensure dimensions are compatible for broadcasting or matrix multiplication.")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<i64>,
        shape2: Vec<i64>,
    },

    #[error("Invalid tensor rank for operation '{op}': expected {expected}D, got {actual}D.")]
    InvalidRank {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("Axis {axis} is out of range for operation '{op}' on a rank {rank} tensor.")]
    InvalidAxis { op: String, axis: isize, rank: usize },

    #[error("Cannot reshape a tensor of shape {from:?} to {to:?}: element counts differ \
             or more than one dimension is -1.")]
    InvalidReshape { from: Vec<i64>, to: Vec<i64> },

    #[error("Permutation {perm:?} is not valid for a rank {rank} tensor.")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },

    #[error("Operation '{op}' expects a sequence operand.")]
    SequenceExpected { op: String },

    #[error("Operation '{op}' cannot consume a sequence; read an element with sequence_at first.")]
    UnexpectedSequence { op: String },

    #[error("Invalid body for control flow operation '{op}': {message}")]
    InvalidSubGraph { op: String, message: String },
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Static type information of one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorMeta {
    pub dtype: DType,
    pub shape: Option<Vec<i64>>,
    pub is_sequence: bool,
}

impl TensorMeta {
    pub fn new(dtype: DType, shape: Option<Vec<i64>>) -> Self {
        Self {
            dtype,
            shape,
            is_sequence: false,
        }
    }

    pub fn sequence(dtype: DType) -> Self {
        Self {
            dtype,
            shape: None,
            is_sequence: true,
        }
    }

    fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    fn with_dtype(&self, dtype: DType) -> Self {
        Self {
            dtype,
            shape: self.shape.clone(),
            is_sequence: false,
        }
    }
}

/// Resolves a possibly negative axis against a rank.
pub fn normalize_axis(axis: isize, rank: usize) -> Option<usize> {
    let rank = rank as isize;
    let resolved = if axis < 0 { axis + rank } else { axis };
    if resolved < 0 || resolved >= rank.max(1) {
        None
    } else {
        Some(resolved as usize)
    }
}

/// Numpy-style broadcast of two static shapes that may contain unknown dimensions.
pub fn broadcast_static(a: &[i64], b: &[i64]) -> Option<Vec<i64>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (UNKNOWN_DIM, y) => y,
            (x, UNKNOWN_DIM) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Structure that performs shape inference for graph operations.
pub struct ShapeInference;

impl ShapeInference {
    /// Infers output metadata for one op given its operands' metadata.
    pub fn infer_op(kind: &OpKind, inputs: &[TensorMeta]) -> Result<Vec<TensorMeta>> {
        let op = kind.type_name().to_string();
        if let Some(expected) = kind.arity() {
            if inputs.len() != expected {
                return Err(ShapeInferenceError::WrongInputCount {
                    op,
                    expected,
                    actual: inputs.len(),
                });
            }
        }
        let sequence_ok = matches!(
            kind,
            OpKind::SequenceLength | OpKind::SequenceAt { .. } | OpKind::Identity | OpKind::ZerosLike
        ) || kind.is_control_flow();
        if !sequence_ok && inputs.iter().any(|m| m.is_sequence) {
            return Err(ShapeInferenceError::UnexpectedSequence { op });
        }

        match kind {
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
                let dtype = Self::same_dtype(&op, &inputs[0], &inputs[1])?;
                Self::require_numeric(&op, dtype)?;
                let shape = Self::broadcast(&op, &inputs[0], &inputs[1])?;
                Ok(vec![TensorMeta::new(dtype, shape)])
            }

            OpKind::Gt | OpKind::Lt | OpKind::Eq => {
                let dtype = Self::same_dtype(&op, &inputs[0], &inputs[1])?;
                if !matches!(kind, OpKind::Eq) {
                    Self::require_numeric(&op, dtype)?;
                }
                let shape = Self::broadcast(&op, &inputs[0], &inputs[1])?;
                Ok(vec![TensorMeta::new(DType::Bool, shape)])
            }

            OpKind::Pow { .. }
            | OpKind::Exp
            | OpKind::Log
            | OpKind::Sqrt
            | OpKind::Tanh
            | OpKind::Sigmoid => {
                Self::require_float(&op, inputs[0].dtype)?;
                Ok(vec![inputs[0].clone()])
            }

            OpKind::Neg | OpKind::Abs | OpKind::Sign | OpKind::Square | OpKind::Relu => {
                Self::require_numeric(&op, inputs[0].dtype)?;
                Ok(vec![inputs[0].clone()])
            }

            OpKind::Identity | OpKind::ZerosLike | OpKind::OnesLike => Ok(vec![inputs[0].clone()]),

            OpKind::Softmax { axis } => {
                Self::require_float(&op, inputs[0].dtype)?;
                Self::check_axes(&op, &[*axis], inputs[0].rank())?;
                Ok(vec![inputs[0].clone()])
            }

            OpKind::MatMul => {
                let dtype = Self::same_dtype(&op, &inputs[0], &inputs[1])?;
                Self::require_numeric(&op, dtype)?;
                let (a, b) = (&inputs[0], &inputs[1]);
                for meta in [a, b] {
                    if let Some(rank) = meta.rank() {
                        if rank != 2 {
                            return Err(ShapeInferenceError::InvalidRank {
                                op,
                                expected: 2,
                                actual: rank,
                            });
                        }
                    }
                }
                let dim = |m: &TensorMeta, i: usize| m.shape.as_ref().map_or(UNKNOWN_DIM, |s| s[i]);
                let (k1, k2) = (dim(a, 1), dim(b, 0));
                if k1 != UNKNOWN_DIM && k2 != UNKNOWN_DIM && k1 != k2 {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op,
                        shape1: a.shape.clone().unwrap_or_default(),
                        shape2: b.shape.clone().unwrap_or_default(),
                    });
                }
                Ok(vec![TensorMeta::new(dtype, Some(vec![dim(a, 0), dim(b, 1)]))])
            }

            OpKind::Sum { axes, keep_dims } | OpKind::Mean { axes, keep_dims } => {
                let input = &inputs[0];
                if matches!(kind, OpKind::Mean { .. }) {
                    Self::require_float(&op, input.dtype)?;
                } else {
                    Self::require_numeric(&op, input.dtype)?;
                }
                let shape = match &input.shape {
                    Some(shape) => {
                        let reduced = Self::check_axes(&op, axes, Some(shape.len()))?;
                        let mut out = Vec::new();
                        for (i, &d) in shape.iter().enumerate() {
                            let is_reduced = reduced.is_empty() || reduced.contains(&i);
                            if !is_reduced {
                                out.push(d);
                            } else if *keep_dims {
                                out.push(1);
                            }
                        }
                        Some(out)
                    }
                    None if axes.is_empty() && !*keep_dims => Some(vec![]),
                    None => None,
                };
                Ok(vec![TensorMeta::new(input.dtype, shape)])
            }

            OpKind::Reshape { shape } => {
                let input = &inputs[0];
                Ok(vec![TensorMeta::new(
                    input.dtype,
                    Some(Self::reshape(input.shape.as_deref(), shape)?),
                )])
            }

            OpKind::Transpose { perm } => {
                let input = &inputs[0];
                let shape = match (&input.shape, perm) {
                    (Some(shape), None) => Some(shape.iter().rev().copied().collect()),
                    (Some(shape), Some(perm)) => {
                        Self::check_permutation(perm, shape.len())?;
                        Some(perm.iter().map(|&p| shape[p]).collect())
                    }
                    (None, _) => None,
                };
                Ok(vec![TensorMeta::new(input.dtype, shape)])
            }

            OpKind::Shape => {
                let rank = inputs[0].rank().map_or(UNKNOWN_DIM, |r| r as i64);
                Ok(vec![TensorMeta::new(DType::I64, Some(vec![rank]))])
            }

            OpKind::Cast { dtype } => Ok(vec![inputs[0].with_dtype(*dtype)]),

            OpKind::SequenceLength => {
                if !inputs[0].is_sequence {
                    return Err(ShapeInferenceError::SequenceExpected { op });
                }
                Ok(vec![TensorMeta::new(DType::I64, Some(vec![]))])
            }

            OpKind::SequenceAt { .. } => {
                if !inputs[0].is_sequence {
                    return Err(ShapeInferenceError::SequenceExpected { op });
                }
                Ok(vec![TensorMeta::new(inputs[0].dtype, None)])
            }

            OpKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                Self::check_predicate(&op, cond, inputs)?;
                Self::check_body_inputs(&op, "then", then_branch, inputs)?;
                Self::check_body_inputs(&op, "else", else_branch, inputs)?;
                let then_out = Self::outputs_of(&op, then_branch)?;
                let else_out = Self::outputs_of(&op, else_branch)?;
                if then_out.len() != else_out.len() {
                    return Err(Self::body_error(
                        &op,
                        format!(
                            "branches return a different number of outputs ({} vs {})",
                            then_out.len(),
                            else_out.len()
                        ),
                    ));
                }
                then_out
                    .into_iter()
                    .zip(else_out)
                    .enumerate()
                    .map(|(i, (t, e))| {
                        if t.dtype != e.dtype || t.is_sequence != e.is_sequence {
                            return Err(Self::body_error(
                                &op,
                                format!("output {} has dtype {} in one branch and {} in the other", i, t.dtype, e.dtype),
                            ));
                        }
                        let shape = if t.shape == e.shape { t.shape.clone() } else { None };
                        Ok(TensorMeta { shape, ..t })
                    })
                    .collect()
            }

            OpKind::While { cond, body, .. } => {
                Self::check_predicate(&op, cond, inputs)?;
                Self::check_body_inputs(&op, "body", body, inputs)?;
                let body_out = Self::outputs_of(&op, body)?;
                if body_out.len() != inputs.len() {
                    return Err(Self::body_error(
                        &op,
                        format!(
                            "loop body returns {} value(s) but the loop carries {}",
                            body_out.len(),
                            inputs.len()
                        ),
                    ));
                }
                inputs
                    .iter()
                    .zip(body_out)
                    .enumerate()
                    .map(|(i, (input, out))| {
                        if input.dtype != out.dtype || input.is_sequence != out.is_sequence {
                            return Err(Self::body_error(
                                &op,
                                format!("loop variable {} enters as {} but the body returns {}", i, input.dtype, out.dtype),
                            ));
                        }
                        let shape = if input.shape == out.shape { input.shape.clone() } else { None };
                        Ok(TensorMeta {
                            shape,
                            ..input.clone()
                        })
                    })
                    .collect()
            }

            OpKind::ReduceSumLike | OpKind::ReshapeLike => {
                Ok(vec![inputs[1].with_dtype(inputs[0].dtype)])
            }

            OpKind::ReduceBp { .. } | OpKind::ReluBp | OpKind::SoftmaxBp { .. } => {
                Self::require_float(&op, inputs[0].dtype)?;
                Ok(vec![inputs[1].with_dtype(inputs[0].dtype)])
            }
        }
    }

    /// Re-runs inference over every op of `graph` in order, refreshing the
    /// dtype and shape recorded on each produced variable.
    pub fn run(graph: &mut Graph) -> std::result::Result<(), GraphError> {
        for index in 0..graph.ops.len() {
            let (name, kind, inputs, outputs) = {
                let op = &graph.ops[index];
                (op.name.clone(), op.kind.clone(), op.inputs.clone(), op.outputs.clone())
            };
            let metas: Vec<TensorMeta> = inputs.iter().map(|&id| graph.variables[id].meta()).collect();
            let inferred = Self::infer_op(&kind, &metas).map_err(|source| GraphError::Inference {
                op: name.clone(),
                source,
            })?;
            for (id, meta) in outputs.into_iter().zip(inferred) {
                let var = &mut graph.variables[id];
                var.dtype = meta.dtype;
                var.shape = meta.shape;
            }
        }
        Ok(())
    }

    fn same_dtype(op: &str, a: &TensorMeta, b: &TensorMeta) -> Result<DType> {
        if a.dtype != b.dtype {
            return Err(ShapeInferenceError::DTypeMismatch {
                op: op.to_string(),
                left: a.dtype,
                right: b.dtype,
            });
        }
        Ok(a.dtype)
    }

    fn require_numeric(op: &str, dtype: DType) -> Result<()> {
        if dtype.is_numeric() {
            Ok(())
        } else {
            Err(ShapeInferenceError::UnsupportedDType {
                op: op.to_string(),
                dtype,
            })
        }
    }

    fn require_float(op: &str, dtype: DType) -> Result<()> {
        if dtype.is_floating_point() {
            Ok(())
        } else {
            Err(ShapeInferenceError::UnsupportedDType {
                op: op.to_string(),
                dtype,
            })
        }
    }

    fn broadcast(op: &str, a: &TensorMeta, b: &TensorMeta) -> Result<Option<Vec<i64>>> {
        match (&a.shape, &b.shape) {
            (Some(sa), Some(sb)) => broadcast_static(sa, sb).map(Some).ok_or_else(|| {
                ShapeInferenceError::IncompatibleShapes {
                    op: op.to_string(),
                    shape1: sa.clone(),
                    shape2: sb.clone(),
                }
            }),
            _ => Ok(None),
        }
    }

    /// Validates axes against a known rank and returns them normalized.
    fn check_axes(op: &str, axes: &[isize], rank: Option<usize>) -> Result<Vec<usize>> {
        let Some(rank) = rank else {
            return Ok(Vec::new());
        };
        axes.iter()
            .map(|&axis| {
                normalize_axis(axis, rank).ok_or_else(|| ShapeInferenceError::InvalidAxis {
                    op: op.to_string(),
                    axis,
                    rank,
                })
            })
            .collect()
    }

    fn check_permutation(perm: &[usize], rank: usize) -> Result<()> {
        let mut seen = vec![false; rank];
        let valid = perm.len() == rank
            && perm.iter().all(|&p| {
                if p >= rank || seen[p] {
                    return false;
                }
                seen[p] = true;
                true
            });
        if valid {
            Ok(())
        } else {
            Err(ShapeInferenceError::InvalidPermutation {
                perm: perm.to_vec(),
                rank,
            })
        }
    }

    fn reshape(from: Option<&[i64]>, to: &[i64]) -> Result<Vec<i64>> {
        let invalid = || ShapeInferenceError::InvalidReshape {
            from: from.map(<[i64]>::to_vec).unwrap_or_default(),
            to: to.to_vec(),
        };
        let inferred = to.iter().filter(|&&d| d == UNKNOWN_DIM).count();
        if inferred > 1 || to.iter().any(|&d| d < UNKNOWN_DIM) {
            return Err(invalid());
        }
        let Some(from) = from.filter(|s| s.iter().all(|&d| d >= 0)) else {
            return Ok(to.to_vec());
        };
        let total: i64 = from.iter().product();
        let known: i64 = to.iter().filter(|&&d| d != UNKNOWN_DIM).product();
        if inferred == 0 {
            return if known == total { Ok(to.to_vec()) } else { Err(invalid()) };
        }
        if known == 0 || total % known != 0 {
            return Err(invalid());
        }
        Ok(to
            .iter()
            .map(|&d| if d == UNKNOWN_DIM { total / known } else { d })
            .collect())
    }

    fn body_error(op: &str, message: String) -> ShapeInferenceError {
        ShapeInferenceError::InvalidSubGraph {
            op: op.to_string(),
            message,
        }
    }

    fn outputs_of(op: &str, body: &SubGraph) -> Result<Vec<TensorMeta>> {
        body.outputs
            .iter()
            .map(|name| {
                body.graph
                    .get_variable(name)
                    .map(|v| v.meta())
                    .ok_or_else(|| Self::body_error(op, format!("output \"{}\" does not exist", name)))
            })
            .collect()
    }

    fn check_body_inputs(op: &str, label: &str, body: &SubGraph, inputs: &[TensorMeta]) -> Result<()> {
        if body.inputs.len() != inputs.len() {
            return Err(Self::body_error(
                op,
                format!(
                    "{} takes {} input(s) but the op provides {}",
                    label,
                    body.inputs.len(),
                    inputs.len()
                ),
            ));
        }
        for (name, outer) in body.inputs.iter().zip(inputs) {
            let inner = body
                .graph
                .get_variable(name)
                .ok_or_else(|| Self::body_error(op, format!("{} input \"{}\" does not exist", label, name)))?;
            if inner.dtype() != outer.dtype {
                return Err(Self::body_error(
                    op,
                    format!(
                        "{} input \"{}\" is declared as {} but receives {}",
                        label,
                        name,
                        inner.dtype(),
                        outer.dtype
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_predicate(op: &str, cond: &SubGraph, inputs: &[TensorMeta]) -> Result<()> {
        Self::check_body_inputs(op, "condition", cond, inputs)?;
        let outputs = Self::outputs_of(op, cond)?;
        match outputs.as_slice() {
            [meta] if meta.dtype == DType::Bool && !meta.is_sequence => Ok(()),
            _ => Err(Self::body_error(
                op,
                "the condition must return exactly one boolean scalar".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_meta(shape: &[i64]) -> TensorMeta {
        TensorMeta::new(DType::F32, Some(shape.to_vec()))
    }

    #[test]
    fn broadcasting_with_unknown_dims() {
        assert_eq!(broadcast_static(&[-1, 4], &[4]), Some(vec![-1, 4]));
        assert_eq!(broadcast_static(&[3, 1], &[1, 5]), Some(vec![3, 5]));
        assert_eq!(broadcast_static(&[-1, 1], &[-1, 3]), Some(vec![-1, 3]));
        assert_eq!(broadcast_static(&[2, 3], &[4, 3]), None);
    }

    #[test]
    fn matmul_checks_inner_dimension() {
        let ok = ShapeInference::infer_op(&OpKind::MatMul, &[f32_meta(&[-1, 4]), f32_meta(&[4, 3])]).unwrap();
        assert_eq!(ok[0].shape, Some(vec![-1, 3]));
        let err = ShapeInference::infer_op(&OpKind::MatMul, &[f32_meta(&[2, 4]), f32_meta(&[5, 3])]);
        assert!(matches!(err, Err(ShapeInferenceError::IncompatibleShapes { .. })));
    }

    #[test]
    fn reductions_drop_or_keep_axes() {
        let sum = OpKind::Sum {
            axes: vec![-1],
            keep_dims: false,
        };
        assert_eq!(ShapeInference::infer_op(&sum, &[f32_meta(&[2, 3])]).unwrap()[0].shape, Some(vec![2]));
        let mean = OpKind::Mean {
            axes: vec![],
            keep_dims: true,
        };
        assert_eq!(
            ShapeInference::infer_op(&mean, &[f32_meta(&[2, 3])]).unwrap()[0].shape,
            Some(vec![1, 1])
        );
    }

    #[test]
    fn reshape_resolves_single_unknown() {
        let kind = OpKind::Reshape { shape: vec![-1, 2] };
        assert_eq!(ShapeInference::infer_op(&kind, &[f32_meta(&[3, 4])]).unwrap()[0].shape, Some(vec![6, 2]));
        let bad = OpKind::Reshape { shape: vec![5, 2] };
        assert!(ShapeInference::infer_op(&bad, &[f32_meta(&[3, 4])]).is_err());
    }

    #[test]
    fn dtype_rules() {
        let i = TensorMeta::new(DType::I64, Some(vec![2]));
        assert!(matches!(
            ShapeInference::infer_op(&OpKind::Add, &[f32_meta(&[2]), i.clone()]),
            Err(ShapeInferenceError::DTypeMismatch { .. })
        ));
        assert!(ShapeInference::infer_op(&OpKind::Exp, &[i.clone()]).is_err());
        let cmp = ShapeInference::infer_op(&OpKind::Gt, &[i.clone(), i]).unwrap();
        assert_eq!(cmp[0].dtype, DType::Bool);
    }
}
