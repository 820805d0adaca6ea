//! Module implementing the reference CPU backend.
//!
//! Every primitive op is implemented with `ndarray`. Float kernels are
//! generic over `num_traits::Float` so `F32` and `F64` share one code path.

use super::backend::{Backend, RuntimeError};
use crate::analysis::shape_inference::normalize_axis;
use crate::graph::{OpKind, Value, UNKNOWN_DIM};
use ndarray::{ArrayD, Axis, Ix2, LinalgScalar, Zip};
use num_traits::{Float, Zero};
use std::ops::Add;

type Result<T> = std::result::Result<T, RuntimeError>;

/// Applies `$body` to a float array, keeping its dtype.
macro_rules! float_op {
    ($kind:expr, $value:expr, |$arr:ident| $body:expr) => {
        match $value {
            Value::F32($arr) => Ok(Value::F32($body)),
            Value::F64($arr) => Ok(Value::F64($body)),
            other => Err(RuntimeError::type_error($kind, "a floating point array", other.dtype())),
        }
    };
}

/// Applies `$body` to a float or integer array, keeping its dtype.
macro_rules! numeric_op {
    ($kind:expr, $value:expr, |$arr:ident| $body:expr) => {
        match $value {
            Value::F32($arr) => Ok(Value::F32($body)),
            Value::F64($arr) => Ok(Value::F64($body)),
            Value::I64($arr) => Ok(Value::I64($body)),
            other => Err(RuntimeError::type_error($kind, "a numeric array", other.dtype())),
        }
    };
}

/// Applies `$body` to two arrays of the same float dtype.
macro_rules! float_pair {
    ($kind:expr, $a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {
        match ($a, $b) {
            (Value::F32($x), Value::F32($y)) => Ok(Value::F32($body)),
            (Value::F64($x), Value::F64($y)) => Ok(Value::F64($body)),
            (a, b) => Err(mismatch($kind, a, b)),
        }
    };
}

/// CPU backend built on `ndarray`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn execute(&self, kind: &OpKind, inputs: &[Value]) -> Result<Vec<Value>> {
        if let Some(arity) = kind.arity() {
            if inputs.len() != arity {
                return Err(RuntimeError::shape_error(
                    kind,
                    format!("expected {} operand(s), got {}", arity, inputs.len()),
                ));
            }
        }
        let output = match kind {
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => arithmetic(kind, &inputs[0], &inputs[1])?,
            OpKind::Gt | OpKind::Lt | OpKind::Eq => compare(kind, &inputs[0], &inputs[1])?,

            OpKind::Pow { .. }
            | OpKind::Exp
            | OpKind::Log
            | OpKind::Sqrt
            | OpKind::Tanh
            | OpKind::Sigmoid => float_op!(kind, &inputs[0], |x| float_unary(kind, x)?)?,

            OpKind::Neg | OpKind::Abs | OpKind::Sign | OpKind::Square | OpKind::Relu => match &inputs[0] {
                Value::I64(x) => Value::I64(int_unary(kind, x)?),
                other => float_op!(kind, other, |x| float_unary(kind, x)?)?,
            },
            OpKind::Identity => inputs[0].clone(),

            OpKind::Softmax { axis } => {
                let axis = resolve_axis(kind, *axis, inputs[0].rank())?;
                float_op!(kind, &inputs[0], |x| softmax(x, axis))?
            }

            OpKind::MatMul => match (&inputs[0], &inputs[1]) {
                (Value::F32(a), Value::F32(b)) => Value::F32(matmul(kind, a, b)?),
                (Value::F64(a), Value::F64(b)) => Value::F64(matmul(kind, a, b)?),
                (Value::I64(a), Value::I64(b)) => Value::I64(matmul(kind, a, b)?),
                (a, b) => return Err(mismatch(kind, a, b)),
            },

            OpKind::Sum { axes, keep_dims } => {
                let axes = reduction_axes(kind, axes, inputs[0].rank())?;
                numeric_op!(kind, &inputs[0], |x| sum_axes(x, &axes, *keep_dims))?
            }
            OpKind::Mean { axes, keep_dims } => {
                let axes = reduction_axes(kind, axes, inputs[0].rank())?;
                float_op!(kind, &inputs[0], |x| mean_axes(x, &axes, *keep_dims))?
            }

            OpKind::Reshape { shape } => {
                let dims = resolve_reshape(kind, shape, inputs[0].len())?;
                reshape(kind, &inputs[0], &dims)?
            }
            OpKind::Transpose { perm } => transpose(kind, &inputs[0], perm.as_deref())?,

            OpKind::Shape => {
                let shape: Vec<i64> = inputs[0].shape().into_iter().map(|d| d as i64).collect();
                let rank = shape.len();
                Value::from_i64(&[rank], shape).map_err(|e| RuntimeError::shape_error(kind, e.to_string()))?
            }
            OpKind::Cast { dtype } => inputs[0].cast(*dtype),
            OpKind::ZerosLike => inputs[0].zeros_like(),
            OpKind::OnesLike => inputs[0].ones_like(),

            OpKind::SequenceLength => match &inputs[0] {
                Value::Sequence { items, .. } => Value::scalar_i64(items.len() as i64),
                other => return Err(RuntimeError::type_error(kind, "a sequence", other.dtype())),
            },
            OpKind::SequenceAt { index } => match &inputs[0] {
                Value::Sequence { items, .. } => {
                    let len = items.len();
                    let resolved = if *index < 0 { *index + len as i64 } else { *index };
                    if resolved < 0 || resolved >= len as i64 {
                        return Err(RuntimeError::IndexOutOfRange {
                            op: kind.type_name().to_string(),
                            index: *index,
                            len,
                        });
                    }
                    items[resolved as usize].clone()
                }
                other => return Err(RuntimeError::type_error(kind, "a sequence", other.dtype())),
            },

            OpKind::ReduceSumLike => {
                let target = inputs[1].shape();
                numeric_op!(kind, &inputs[0], |g| sum_to_shape(kind, g, &target)?)?
            }
            OpKind::ReshapeLike => {
                let target = inputs[1].shape();
                reshape(kind, &inputs[0], &target)?
            }
            OpKind::ReduceBp { axes, keep_dims, mean } => {
                let target = inputs[1].shape();
                let axes = reduction_axes(kind, axes, target.len())?;
                float_op!(kind, &inputs[0], |g| reduce_bp(kind, g, &target, &axes, *keep_dims, *mean)?)?
            }
            OpKind::ReluBp => float_pair!(kind, &inputs[0], &inputs[1], |g, x| {
                zip_with(kind, g, x, |&gv, &xv| if xv > 0.0 { gv } else { 0.0 })?
            })?,
            OpKind::SoftmaxBp { axis } => {
                let axis = resolve_axis(kind, *axis, inputs[1].rank())?;
                float_pair!(kind, &inputs[0], &inputs[1], |g, y| softmax_bp(kind, g, y, axis)?)?
            }

            OpKind::If { .. } | OpKind::While { .. } => {
                return Err(RuntimeError::UnimplementedOperation(kind.type_name().to_string()))
            }
        };
        Ok(vec![output])
    }
}

fn mismatch(kind: &OpKind, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::TypeError {
        op: kind.type_name().to_string(),
        expected: format!("operands of the same dtype ({})", a.dtype()),
        actual: b.dtype().to_string(),
    }
}

fn resolve_axis(kind: &OpKind, axis: isize, rank: usize) -> Result<usize> {
    normalize_axis(axis, rank)
        .ok_or_else(|| RuntimeError::shape_error(kind, format!("axis {} is out of range for rank {}", axis, rank)))
}

/// Normalized, sorted, deduplicated reduction axes; empty means all axes.
fn reduction_axes(kind: &OpKind, axes: &[isize], rank: usize) -> Result<Vec<usize>> {
    if axes.is_empty() {
        return Ok((0..rank).collect());
    }
    let mut resolved = axes
        .iter()
        .map(|&axis| resolve_axis(kind, axis, rank))
        .collect::<Result<Vec<_>>>()?;
    resolved.sort_unstable();
    resolved.dedup();
    Ok(resolved)
}

fn broadcast_shape(kind: &OpKind, a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim = |s: &[usize], i: usize| if i < rank - s.len() { 1 } else { s[i - (rank - s.len())] };
    (0..rank)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            _ => Err(RuntimeError::shape_error(
                kind,
                format!("cannot broadcast shapes {:?} and {:?}", a, b),
            )),
        })
        .collect()
}

/// Elementwise combination with numpy-style broadcasting.
fn zip_with<A, B, O>(kind: &OpKind, a: &ArrayD<A>, b: &ArrayD<B>, f: impl Fn(&A, &B) -> O) -> Result<ArrayD<O>> {
    let shape = broadcast_shape(kind, a.shape(), b.shape())?;
    let broadcast_error = || RuntimeError::shape_error(kind, format!("cannot broadcast to {:?}", shape));
    let av = a.broadcast(shape.as_slice()).ok_or_else(broadcast_error)?;
    let bv = b.broadcast(shape.as_slice()).ok_or_else(broadcast_error)?;
    Ok(Zip::from(av).and(bv).map_collect(|x, y| f(x, y)))
}

fn arithmetic(kind: &OpKind, a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::F32(x), Value::F32(y)) => Ok(Value::F32(float_binary(kind, x, y)?)),
        (Value::F64(x), Value::F64(y)) => Ok(Value::F64(float_binary(kind, x, y)?)),
        (Value::I64(x), Value::I64(y)) => Ok(Value::I64(int_binary(kind, x, y)?)),
        _ => Err(mismatch(kind, a, b)),
    }
}

fn float_binary<F: Float>(kind: &OpKind, x: &ArrayD<F>, y: &ArrayD<F>) -> Result<ArrayD<F>> {
    let f: fn(F, F) -> F = match kind {
        OpKind::Add => |a, b| a + b,
        OpKind::Sub => |a, b| a - b,
        OpKind::Mul => |a, b| a * b,
        OpKind::Div => |a, b| a / b,
        _ => return Err(RuntimeError::UnimplementedOperation(kind.type_name().to_string())),
    };
    zip_with(kind, x, y, |&a, &b| f(a, b))
}

fn int_binary(kind: &OpKind, x: &ArrayD<i64>, y: &ArrayD<i64>) -> Result<ArrayD<i64>> {
    let f: fn(i64, i64) -> i64 = match kind {
        OpKind::Add => i64::wrapping_add,
        OpKind::Sub => i64::wrapping_sub,
        OpKind::Mul => i64::wrapping_mul,
        OpKind::Div => {
            if y.iter().any(|&v| v == 0) {
                return Err(RuntimeError::DivisionByZero(kind.type_name().to_string()));
            }
            i64::wrapping_div
        }
        _ => return Err(RuntimeError::UnimplementedOperation(kind.type_name().to_string())),
    };
    zip_with(kind, x, y, |&a, &b| f(a, b))
}

fn compare(kind: &OpKind, a: &Value, b: &Value) -> Result<Value> {
    let out = match (a, b) {
        (Value::F32(x), Value::F32(y)) => compare_arrays(kind, x, y)?,
        (Value::F64(x), Value::F64(y)) => compare_arrays(kind, x, y)?,
        (Value::I64(x), Value::I64(y)) => compare_arrays(kind, x, y)?,
        (Value::Bool(x), Value::Bool(y)) => compare_arrays(kind, x, y)?,
        _ => return Err(mismatch(kind, a, b)),
    };
    Ok(Value::Bool(out))
}

fn compare_arrays<T: PartialOrd>(kind: &OpKind, x: &ArrayD<T>, y: &ArrayD<T>) -> Result<ArrayD<bool>> {
    let f: fn(&T, &T) -> bool = match kind {
        OpKind::Gt => |a, b| a > b,
        OpKind::Lt => |a, b| a < b,
        OpKind::Eq => |a, b| a == b,
        _ => return Err(RuntimeError::UnimplementedOperation(kind.type_name().to_string())),
    };
    zip_with(kind, x, y, f)
}

fn float_unary<F: Float>(kind: &OpKind, x: &ArrayD<F>) -> Result<ArrayD<F>> {
    let zero = F::zero();
    let one = F::one();
    Ok(match kind {
        OpKind::Neg => x.mapv(|v| -v),
        OpKind::Abs => x.mapv(F::abs),
        OpKind::Sign => x.mapv(|v| {
            if v > zero {
                one
            } else if v < zero {
                -one
            } else {
                zero
            }
        }),
        OpKind::Exp => x.mapv(F::exp),
        OpKind::Log => x.mapv(F::ln),
        OpKind::Sqrt => x.mapv(F::sqrt),
        OpKind::Square => x.mapv(|v| v * v),
        OpKind::Tanh => x.mapv(F::tanh),
        OpKind::Sigmoid => x.mapv(|v| one / (one + (-v).exp())),
        OpKind::Relu => x.mapv(|v| if v > zero { v } else { zero }),
        OpKind::Pow { exponent } => {
            let e: F = num_traits::cast(*exponent)
                .ok_or_else(|| RuntimeError::shape_error(kind, "exponent is not representable"))?;
            x.mapv(|v| v.powf(e))
        }
        _ => return Err(RuntimeError::UnimplementedOperation(kind.type_name().to_string())),
    })
}

fn int_unary(kind: &OpKind, x: &ArrayD<i64>) -> Result<ArrayD<i64>> {
    Ok(match kind {
        OpKind::Neg => x.mapv(i64::wrapping_neg),
        OpKind::Abs => x.mapv(i64::wrapping_abs),
        OpKind::Sign => x.mapv(i64::signum),
        OpKind::Square => x.mapv(|v| v.wrapping_mul(v)),
        OpKind::Relu => x.mapv(|v| v.max(0)),
        _ => return Err(RuntimeError::type_error(kind, "a floating point array", crate::graph::DType::I64)),
    })
}

fn softmax<F: Float>(x: &ArrayD<F>, axis: usize) -> ArrayD<F> {
    let max = x
        .fold_axis(Axis(axis), F::neg_infinity(), |&m, &v| m.max(v))
        .insert_axis(Axis(axis));
    let mut out = x.clone();
    Zip::from(&mut out).and_broadcast(&max).for_each(|v, &m| *v = (*v - m).exp());
    let sum = out
        .fold_axis(Axis(axis), F::zero(), |&s, &v| s + v)
        .insert_axis(Axis(axis));
    Zip::from(&mut out).and_broadcast(&sum).for_each(|v, &s| *v = *v / s);
    out
}

/// `dx = y * (g - sum(g * y, axis))`
fn softmax_bp<F: Float>(kind: &OpKind, g: &ArrayD<F>, y: &ArrayD<F>, axis: usize) -> Result<ArrayD<F>> {
    if g.shape() != y.shape() {
        return Err(RuntimeError::shape_error(
            kind,
            format!("gradient shape {:?} differs from output shape {:?}", g.shape(), y.shape()),
        ));
    }
    let dot = zip_with(kind, g, y, |&a, &b| a * b)?
        .fold_axis(Axis(axis), F::zero(), |&s, &v| s + v)
        .insert_axis(Axis(axis));
    let mut out = g.clone();
    Zip::from(&mut out)
        .and(y)
        .and_broadcast(&dot)
        .for_each(|o, &yv, &d| *o = yv * (*o - d));
    Ok(out)
}

fn matmul<T: LinalgScalar>(kind: &OpKind, a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
    let a2 = a
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::shape_error(kind, format!("left operand must be 2D, got {:?}", a.shape())))?;
    let b2 = b
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::shape_error(kind, format!("right operand must be 2D, got {:?}", b.shape())))?;
    if a2.ncols() != b2.nrows() {
        return Err(RuntimeError::shape_error(
            kind,
            format!("incompatible matmul shapes {:?} and {:?}", a.shape(), b.shape()),
        ));
    }
    Ok(a2.dot(&b2).into_dyn())
}

fn sum_axes<T: Clone + Zero + Add<Output = T>>(x: &ArrayD<T>, axes: &[usize], keep_dims: bool) -> ArrayD<T> {
    let mut out = x.clone();
    for &axis in axes.iter().rev() {
        out = out.sum_axis(Axis(axis));
    }
    if keep_dims {
        for &axis in axes {
            out = out.insert_axis(Axis(axis));
        }
    }
    out
}

fn mean_axes<F: Float>(x: &ArrayD<F>, axes: &[usize], keep_dims: bool) -> ArrayD<F> {
    let count: usize = axes.iter().map(|&a| x.shape()[a]).product();
    let count: F = num_traits::cast(count).unwrap_or_else(F::nan);
    sum_axes(x, axes, keep_dims).mapv(|v| v / count)
}

/// Broadcasts the gradient of a reduction back to the reduced input's shape.
fn reduce_bp<F: Float>(
    kind: &OpKind,
    g: &ArrayD<F>,
    target: &[usize],
    axes: &[usize],
    keep_dims: bool,
    mean: bool,
) -> Result<ArrayD<F>> {
    let mut expanded = g.clone();
    if !keep_dims {
        for &axis in axes {
            if expanded.ndim() >= target.len() {
                break;
            }
            expanded = expanded.insert_axis(Axis(axis));
        }
    }
    let out = expanded
        .broadcast(target)
        .ok_or_else(|| {
            RuntimeError::shape_error(
                kind,
                format!("cannot broadcast gradient {:?} to {:?}", g.shape(), target),
            )
        })?
        .to_owned();
    if !mean {
        return Ok(out);
    }
    let count: usize = axes.iter().map(|&a| target[a]).product();
    let count: F = num_traits::cast(count).unwrap_or_else(F::nan);
    Ok(out.mapv(|v| v / count))
}

/// Sums `g` over the axes that were broadcast so it matches `target`.
fn sum_to_shape<T: Clone + Zero + Add<Output = T>>(kind: &OpKind, g: &ArrayD<T>, target: &[usize]) -> Result<ArrayD<T>> {
    if g.shape() == target {
        return Ok(g.clone());
    }
    let mut out = g.clone();
    while out.ndim() > target.len() {
        out = out.sum_axis(Axis(0));
    }
    for (axis, &dim) in target.iter().enumerate() {
        if axis < out.ndim() && dim == 1 && out.shape()[axis] != 1 {
            out = out.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }
    if out.shape() == target {
        return Ok(out);
    }
    out.broadcast(target).map(|v| v.to_owned()).ok_or_else(|| {
        RuntimeError::shape_error(kind, format!("cannot reduce gradient {:?} to {:?}", g.shape(), target))
    })
}

/// Resolves a target shape containing at most one `-1` against an element count.
fn resolve_reshape(kind: &OpKind, shape: &[i64], len: usize) -> Result<Vec<usize>> {
    let invalid = || RuntimeError::shape_error(kind, format!("cannot reshape {} elements to {:?}", len, shape));
    let known: i64 = shape.iter().filter(|&&d| d != UNKNOWN_DIM).product();
    let unknown = shape.iter().filter(|&&d| d == UNKNOWN_DIM).count();
    if unknown > 1 || shape.iter().any(|&d| d < UNKNOWN_DIM) {
        return Err(invalid());
    }
    let inferred = if unknown == 1 {
        if known == 0 || len as i64 % known != 0 {
            return Err(invalid());
        }
        len as i64 / known
    } else if known == len as i64 {
        0
    } else {
        return Err(invalid());
    };
    Ok(shape
        .iter()
        .map(|&d| if d == UNKNOWN_DIM { inferred as usize } else { d as usize })
        .collect())
}

fn reshape_array<T: Clone>(kind: &OpKind, x: &ArrayD<T>, dims: &[usize]) -> Result<ArrayD<T>> {
    x.to_shape(dims)
        .map(|view| view.to_owned())
        .map_err(|e| RuntimeError::shape_error(kind, e.to_string()))
}

fn reshape(kind: &OpKind, value: &Value, dims: &[usize]) -> Result<Value> {
    match value {
        Value::F32(x) => Ok(Value::F32(reshape_array(kind, x, dims)?)),
        Value::F64(x) => Ok(Value::F64(reshape_array(kind, x, dims)?)),
        Value::I64(x) => Ok(Value::I64(reshape_array(kind, x, dims)?)),
        Value::Bool(x) => Ok(Value::Bool(reshape_array(kind, x, dims)?)),
        other => Err(RuntimeError::type_error(kind, "an array", other.dtype())),
    }
}

fn permute<T: Clone>(x: &ArrayD<T>, perm: &[usize]) -> ArrayD<T> {
    x.view().permuted_axes(perm).as_standard_layout().into_owned()
}

fn transpose(kind: &OpKind, value: &Value, perm: Option<&[usize]>) -> Result<Value> {
    let rank = value.rank();
    let perm: Vec<usize> = match perm {
        Some(perm) => perm.to_vec(),
        None => (0..rank).rev().collect(),
    };
    let mut sorted = perm.clone();
    sorted.sort_unstable();
    if sorted != (0..rank).collect::<Vec<_>>() {
        return Err(RuntimeError::shape_error(
            kind,
            format!("{:?} is not a permutation of a rank {} tensor", perm, rank),
        ));
    }
    match value {
        Value::F32(x) => Ok(Value::F32(permute(x, &perm))),
        Value::F64(x) => Ok(Value::F64(permute(x, &perm))),
        Value::I64(x) => Ok(Value::I64(permute(x, &perm))),
        Value::Bool(x) => Ok(Value::Bool(permute(x, &perm))),
        other => Err(RuntimeError::type_error(kind, "an array", other.dtype())),
    }
}
