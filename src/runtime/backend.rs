//! Module defining the abstract interface (trait) for execution backends.

use crate::graph::{DType, GraphError, OpKind, Value};
use thiserror::Error;

/// Errors that can occur while executing a graph.
/// This error type is shared by all backends and the session driving them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("No array was provided for placeholder \"{0}\". \
             Pass it in the placeholder map or set a default array on the variable.")]
    MissingPlaceholder(String),

    #[error("Variable \"{0}\" has no array. Initialize it before executing the graph.")]
    MissingArray(String),

    #[error("Variable \"{0}\" was requested but is not a placeholder")]
    NotAPlaceholder(String),

    #[error("Type mismatch in operation '{op}': expected {expected}, got {actual}.")]
    TypeError {
        op: String,
        expected: String,
        actual: String,
    },

    #[error("Shape error in operation '{op}': {message}")]
    ShapeError { op: String, message: String },

    #[error("Operation '{0}' is not implemented by this backend.")]
    UnimplementedOperation(String),

    #[error("Condition of '{0}' did not produce a boolean scalar")]
    InvalidPredicate(String),

    #[error("Loop '{op}' exceeded its limit of {limit} iterations")]
    LoopLimitExceeded { op: String, limit: usize },

    #[error("Index {index} is out of range for a sequence of length {len} in operation '{op}'")]
    IndexOutOfRange { op: String, index: i64, len: usize },

    #[error("Integer division by zero in operation '{0}'")]
    DivisionByZero(String),
}

impl RuntimeError {
    pub(crate) fn type_error(op: &OpKind, expected: &str, actual: DType) -> Self {
        RuntimeError::TypeError {
            op: op.type_name().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn shape_error(op: &OpKind, message: impl Into<String>) -> Self {
        RuntimeError::ShapeError {
            op: op.type_name().to_string(),
            message: message.into(),
        }
    }
}

/// Trait defining the interface of a numeric execution engine.
///
/// A backend executes one primitive operation at a time on concrete values.
/// Scheduling, placeholder binding and control flow are handled by
/// [`InferenceSession`](super::session::InferenceSession), so a backend never
/// sees `If` or `While`.
pub trait Backend {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Executes `kind` on `inputs`, returning one value per op output.
    fn execute(&self, kind: &OpKind, inputs: &[Value]) -> Result<Vec<Value>, RuntimeError>;
}
