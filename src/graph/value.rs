//! Concrete array values flowing through the graph at execution time.
//!
//! A `Value` is an n-dimensional `ndarray` tagged with its element type, or an
//! ordered list of such arrays (a sequence). Symbolic variables only carry a
//! `DType` and a declared shape; `Value`s are what the backend computes with.

use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a variable or array.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I64,
    Bool,
}

impl DType {
    /// Only floating point variables can carry gradients or be trained.
    pub fn is_floating_point(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DType::Bool)
    }

    /// Size of one element in bytes, as stored in an archive.
    pub fn size_of(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::Bool => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I64 => "int64",
            DType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A concrete array (or list of arrays) produced or consumed by the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I64(ArrayD<i64>),
    Bool(ArrayD<bool>),
    /// Ordered list of arrays sharing one element type.
    Sequence { dtype: DType, items: Vec<Value> },
}

impl Value {
    pub fn scalar_f32(value: f32) -> Self {
        Value::F32(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn scalar_f64(value: f64) -> Self {
        Value::F64(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Value::I64(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn scalar_bool(value: bool) -> Self {
        Value::Bool(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Scalar of the requested dtype holding `value` (truncated for integers).
    pub fn scalar(dtype: DType, value: f64) -> Self {
        Self::full(dtype, &[], value)
    }

    /// Builds an `F32` array from row-major data.
    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Self, ndarray::ShapeError> {
        Ok(Value::F32(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    /// Builds an `F64` array from row-major data.
    pub fn from_f64(shape: &[usize], data: Vec<f64>) -> Result<Self, ndarray::ShapeError> {
        Ok(Value::F64(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    /// Builds an `I64` array from row-major data.
    pub fn from_i64(shape: &[usize], data: Vec<i64>) -> Result<Self, ndarray::ShapeError> {
        Ok(Value::I64(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    /// An array of the given dtype and shape where every element is `value`.
    pub fn full(dtype: DType, shape: &[usize], value: f64) -> Self {
        let shape = IxDyn(shape);
        match dtype {
            DType::F32 => Value::F32(ArrayD::from_elem(shape, value as f32)),
            DType::F64 => Value::F64(ArrayD::from_elem(shape, value)),
            DType::I64 => Value::I64(ArrayD::from_elem(shape, value as i64)),
            DType::Bool => Value::Bool(ArrayD::from_elem(shape, value != 0.0)),
        }
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        Self::full(dtype, shape, 0.0)
    }

    pub fn ones(dtype: DType, shape: &[usize]) -> Self {
        Self::full(dtype, shape, 1.0)
    }

    pub fn zeros_like(&self) -> Self {
        match self {
            Value::Sequence { dtype, items } => Value::Sequence {
                dtype: *dtype,
                items: items.iter().map(Value::zeros_like).collect(),
            },
            _ => Self::zeros(self.dtype(), &self.shape()),
        }
    }

    pub fn ones_like(&self) -> Self {
        match self {
            Value::Sequence { dtype, items } => Value::Sequence {
                dtype: *dtype,
                items: items.iter().map(Value::ones_like).collect(),
            },
            _ => Self::ones(self.dtype(), &self.shape()),
        }
    }

    pub fn sequence(dtype: DType, items: Vec<Value>) -> Self {
        Value::Sequence { dtype, items }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Value::F32(_) => DType::F32,
            Value::F64(_) => DType::F64,
            Value::I64(_) => DType::I64,
            Value::Bool(_) => DType::Bool,
            Value::Sequence { dtype, .. } => *dtype,
        }
    }

    /// Shape of the array. A sequence reports its number of items as a rank-1 shape.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::F32(a) => a.shape().to_vec(),
            Value::F64(a) => a.shape().to_vec(),
            Value::I64(a) => a.shape().to_vec(),
            Value::Bool(a) => a.shape().to_vec(),
            Value::Sequence { items, .. } => vec![items.len()],
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements (items for a sequence).
    pub fn len(&self) -> usize {
        match self {
            Value::F32(a) => a.len(),
            Value::F64(a) => a.len(),
            Value::I64(a) => a.len(),
            Value::Bool(a) => a.len(),
            Value::Sequence { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence { .. })
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            Value::F64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Value::I64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&ArrayD<bool>> {
        match self {
            Value::Bool(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Lossy view of the array as `f64` (booleans become 0/1). `None` for sequences.
    pub fn to_f64_array(&self) -> Option<ArrayD<f64>> {
        match self {
            Value::F32(a) => Some(a.mapv(f64::from)),
            Value::F64(a) => Some(a.clone()),
            Value::I64(a) => Some(a.mapv(|x| x as f64)),
            Value::Bool(a) => Some(a.mapv(|x| if x { 1.0 } else { 0.0 })),
            Value::Sequence { .. } => None,
        }
    }

    /// Converts the elements to another dtype. Numeric to bool maps non-zero to `true`.
    pub fn cast(&self, dtype: DType) -> Value {
        if self.dtype() == dtype && !self.is_sequence() {
            return self.clone();
        }
        match self {
            Value::Sequence { items, .. } => Value::Sequence {
                dtype,
                items: items.iter().map(|item| item.cast(dtype)).collect(),
            },
            Value::Bool(a) if dtype == DType::I64 => Value::I64(a.mapv(i64::from)),
            Value::I64(a) if dtype == DType::Bool => Value::Bool(a.mapv(|x| x != 0)),
            Value::F32(a) => Self::from_f64_array(a.mapv(f64::from), dtype),
            Value::F64(a) => Self::from_f64_array(a.clone(), dtype),
            Value::I64(a) => Self::from_f64_array(a.mapv(|x| x as f64), dtype),
            Value::Bool(a) => Self::from_f64_array(a.mapv(|x| if x { 1.0 } else { 0.0 }), dtype),
        }
    }

    pub(crate) fn from_f64_array(array: ArrayD<f64>, dtype: DType) -> Value {
        match dtype {
            DType::F32 => Value::F32(array.mapv(|x| x as f32)),
            DType::F64 => Value::F64(array),
            DType::I64 => Value::I64(array.mapv(|x| x as i64)),
            DType::Bool => Value::Bool(array.mapv(|x| x != 0.0)),
        }
    }

    /// Sum of every element as `f64`. Sequences sum over all their items.
    pub fn sum_all(&self) -> f64 {
        match self {
            Value::F32(a) => a.iter().map(|&x| f64::from(x)).sum(),
            Value::F64(a) => a.sum(),
            Value::I64(a) => a.iter().map(|&x| x as f64).sum(),
            Value::Bool(a) => a.iter().filter(|&&x| x).count() as f64,
            Value::Sequence { items, .. } => items.iter().map(Value::sum_all).sum(),
        }
    }

    /// Reads a single-element array as `f64`.
    pub fn scalar_value(&self) -> Option<f64> {
        if self.len() != 1 || self.is_sequence() {
            return None;
        }
        Some(self.sum_all())
    }

    /// Reads a single-element array as a truth value (non-zero numbers are true).
    pub fn as_predicate(&self) -> Option<bool> {
        match self {
            Value::Bool(a) if a.len() == 1 => a.iter().next().copied(),
            Value::Sequence { .. } => None,
            _ => self.scalar_value().map(|x| x != 0.0),
        }
    }

    /// Selects entries along the first axis (used for minibatching).
    pub fn select_rows(&self, indices: &[usize]) -> Option<Value> {
        if self.rank() == 0 || self.is_sequence() {
            return None;
        }
        Some(match self {
            Value::F32(a) => Value::F32(a.select(Axis(0), indices)),
            Value::F64(a) => Value::F64(a.select(Axis(0), indices)),
            Value::I64(a) => Value::I64(a.select(Axis(0), indices)),
            Value::Bool(a) => Value::Bool(a.select(Axis(0), indices)),
            Value::Sequence { .. } => return None,
        })
    }

    /// True when both values have the same dtype, shape and elements within `tolerance`.
    pub fn approx_eq(&self, other: &Value, tolerance: f64) -> bool {
        if self.dtype() != other.dtype() || self.shape() != other.shape() {
            return false;
        }
        match (self, other) {
            (Value::Sequence { items: a, .. }, Value::Sequence { items: b, .. }) => {
                a.iter().zip(b).all(|(x, y)| x.approx_eq(y, tolerance))
            }
            _ => match (self.to_f64_array(), other.to_f64_array()) {
                (Some(a), Some(b)) => a
                    .iter()
                    .zip(b.iter())
                    .all(|(x, y)| (x - y).abs() <= tolerance || (x.is_nan() && y.is_nan())),
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::F32(a) => write!(f, "{}", a),
            Value::F64(a) => write!(f, "{}", a),
            Value::I64(a) => write!(f, "{}", a),
            Value::Bool(a) => write!(f, "{}", a),
            Value::Sequence { dtype, items } => {
                write!(f, "Sequence<{}>[", dtype)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<ArrayD<f32>> for Value {
    fn from(array: ArrayD<f32>) -> Self {
        Value::F32(array)
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(array: ArrayD<f64>) -> Self {
        Value::F64(array)
    }
}

impl From<ArrayD<i64>> for Value {
    fn from(array: ArrayD<i64>) -> Self {
        Value::I64(array)
    }
}

impl From<ArrayD<bool>> for Value {
    fn from(array: ArrayD<bool>) -> Self {
        Value::Bool(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_between_numeric_types() {
        let v = Value::from_f32(&[3], vec![1.5, -2.0, 0.0]).unwrap();
        assert_eq!(v.cast(DType::I64), Value::from_i64(&[3], vec![1, -2, 0]).unwrap());
        let b = v.cast(DType::Bool);
        assert_eq!(b.as_bool().unwrap().iter().copied().collect::<Vec<_>>(), vec![true, true, false]);
        assert_eq!(v.cast(DType::F64).dtype(), DType::F64);
    }

    #[test]
    fn scalar_helpers() {
        assert_eq!(Value::scalar_f64(2.5).scalar_value(), Some(2.5));
        assert_eq!(Value::scalar_bool(true).as_predicate(), Some(true));
        assert_eq!(Value::scalar_i64(0).as_predicate(), Some(false));
        assert_eq!(Value::ones(DType::F32, &[2, 2]).scalar_value(), None);
        assert_eq!(Value::ones(DType::F32, &[2, 3]).sum_all(), 6.0);
    }

    #[test]
    fn select_rows_picks_along_first_axis() {
        let v = Value::from_i64(&[3, 2], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let picked = v.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked, Value::from_i64(&[2, 2], vec![5, 6, 1, 2]).unwrap());
    }

    #[test]
    fn sequence_reports_item_count() {
        let seq = Value::sequence(DType::F32, vec![Value::scalar_f32(1.0), Value::scalar_f32(2.0)]);
        assert_eq!(seq.shape(), vec![2]);
        assert_eq!(seq.dtype(), DType::F32);
        assert_eq!(seq.sum_all(), 3.0);
    }
}
