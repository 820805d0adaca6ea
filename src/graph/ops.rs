//! The operation catalogue.
//!
//! Every node of a [`Graph`] is an [`Operation`](super::Operation) holding one
//! of these kinds. Control flow ops own their bodies as nested [`SubGraph`]s,
//! so the outer graph stays acyclic.

use super::{DType, Graph};
use serde::{Deserialize, Serialize};

/// A nested graph used as the body of a control flow op.
///
/// `inputs` are the names of the placeholders that receive the op's operands
/// (positionally); `outputs` are the names of the variables returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubGraph {
    pub graph: Graph,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl SubGraph {
    pub fn new(graph: Graph, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            graph,
            inputs,
            outputs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    // Elementwise binary (numpy broadcasting, equal dtypes)
    Add,
    Sub,
    Mul,
    Div,

    // Elementwise unary
    Pow { exponent: f64 },
    Neg,
    Abs,
    Sign,
    Exp,
    Log,
    Sqrt,
    Square,
    Tanh,
    Sigmoid,
    Relu,
    Identity,
    Softmax { axis: isize },

    MatMul,

    // Reductions. Empty `axes` reduces over every dimension.
    Sum { axes: Vec<isize>, keep_dims: bool },
    Mean { axes: Vec<isize>, keep_dims: bool },

    // Shape manipulation. A single `-1` in `shape` is inferred at run time.
    Reshape { shape: Vec<i64> },
    /// `None` reverses the axes.
    Transpose { perm: Option<Vec<usize>> },
    Shape,
    Cast { dtype: DType },
    ZerosLike,
    OnesLike,

    // Comparisons (produce `Bool`)
    Gt,
    Lt,
    Eq,

    // Sequences
    SequenceLength,
    /// Negative indices count from the end.
    SequenceAt { index: i64 },

    // Control flow
    If {
        cond: SubGraph,
        then_branch: SubGraph,
        else_branch: SubGraph,
    },
    While {
        cond: SubGraph,
        body: SubGraph,
        max_iterations: Option<usize>,
    },

    // Backprop kernels, emitted by the gradient builder.
    /// `[grad, like]`: sums `grad` over broadcast axes down to the shape of `like`.
    ReduceSumLike,
    /// `[grad, like]`: reshapes `grad` to the runtime shape of `like`.
    ReshapeLike,
    /// `[grad, input]`: broadcasts a reduction gradient back to the input shape.
    ReduceBp {
        axes: Vec<isize>,
        keep_dims: bool,
        mean: bool,
    },
    /// `[grad, input]`
    ReluBp,
    /// `[grad, softmax_output]`
    SoftmaxBp { axis: isize },
}

impl OpKind {
    /// Short lowercase name, used for auto-generated op and variable names.
    pub fn type_name(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Pow { .. } => "pow",
            OpKind::Neg => "neg",
            OpKind::Abs => "abs",
            OpKind::Sign => "sign",
            OpKind::Exp => "exp",
            OpKind::Log => "log",
            OpKind::Sqrt => "sqrt",
            OpKind::Square => "square",
            OpKind::Tanh => "tanh",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Relu => "relu",
            OpKind::Identity => "identity",
            OpKind::Softmax { .. } => "softmax",
            OpKind::MatMul => "matmul",
            OpKind::Sum { .. } => "reduce_sum",
            OpKind::Mean { .. } => "reduce_mean",
            OpKind::Reshape { .. } => "reshape",
            OpKind::Transpose { .. } => "transpose",
            OpKind::Shape => "shape",
            OpKind::Cast { .. } => "cast",
            OpKind::ZerosLike => "zeros_like",
            OpKind::OnesLike => "ones_like",
            OpKind::Gt => "gt",
            OpKind::Lt => "lt",
            OpKind::Eq => "eq",
            OpKind::SequenceLength => "sequence_length",
            OpKind::SequenceAt { .. } => "sequence_at",
            OpKind::If { .. } => "if",
            OpKind::While { .. } => "while",
            OpKind::ReduceSumLike => "reduce_sum_like",
            OpKind::ReshapeLike => "reshape_like",
            OpKind::ReduceBp { .. } => "reduce_bp",
            OpKind::ReluBp => "relu_bp",
            OpKind::SoftmaxBp { .. } => "softmax_bp",
        }
    }

    /// Number of operands the op expects, or `None` for variadic control flow ops.
    pub fn arity(&self) -> Option<usize> {
        match self {
            OpKind::Add
            | OpKind::Sub
            | OpKind::Mul
            | OpKind::Div
            | OpKind::MatMul
            | OpKind::Gt
            | OpKind::Lt
            | OpKind::Eq
            | OpKind::ReduceSumLike
            | OpKind::ReshapeLike
            | OpKind::ReduceBp { .. }
            | OpKind::ReluBp
            | OpKind::SoftmaxBp { .. } => Some(2),
            OpKind::If { .. } | OpKind::While { .. } => None,
            _ => Some(1),
        }
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self, OpKind::If { .. } | OpKind::While { .. })
    }

    /// Nested bodies with a short label per body, in a fixed order.
    pub fn sub_graphs(&self) -> Vec<(&'static str, &SubGraph)> {
        match self {
            OpKind::If {
                cond,
                then_branch,
                else_branch,
            } => vec![("cond", cond), ("then", then_branch), ("else", else_branch)],
            OpKind::While { cond, body, .. } => vec![("cond", cond), ("body", body)],
            _ => Vec::new(),
        }
    }

    pub fn sub_graphs_mut(&mut self) -> Vec<(&'static str, &mut SubGraph)> {
        match self {
            OpKind::If {
                cond,
                then_branch,
                else_branch,
            } => vec![("cond", cond), ("then", then_branch), ("else", else_branch)],
            OpKind::While { cond, body, .. } => vec![("cond", cond), ("body", body)],
            _ => Vec::new(),
        }
    }
}
