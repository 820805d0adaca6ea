//! Autograd: building the gradient graph d(loss)/d(variable).
//!
//! Algorithm:
//!  - seed every loss variable with `ones_like(loss)` (negated when maximizing);
//!  - walk the forward ops in reverse insertion order;
//!  - for every op whose outputs have a gradient, emit the contributions to its
//!    operands into a separate gradient graph and accumulate them with `Add`;
//!  - reduce contributions of broadcast operands back to the operand shape.
//!
//! The gradient graph reads forward values through placeholders named after
//! the forward variables (`reuse`), so it can be executed against the values of
//! one forward pass. The gradient of `x` is exposed as `x-grad`.
//!
//! Conditionals are differentiated by emitting an `If` whose branches are the
//! backward graphs of the forward branches. Loops stop propagation.

use crate::graph::{DType, Graph, GraphError, OpKind, Operation, SubGraph, Value, VarId, Variable, VariableType};
use crate::runtime::backend::RuntimeError;
use crate::runtime::session::{InferenceSession, Memo};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradientError {
    #[error("No loss variables have been set. Mark at least one variable as a loss before requesting gradients.")]
    NoLossVariables,

    #[error("Cannot get gradient of \"{name}\" ({dtype}): only floating point variables can have gradients")]
    NotFloatingPoint { name: String, dtype: DType },

    #[error("Loss variable \"{name}\" has dtype {dtype}; loss variables must be floating point")]
    InvalidLossVariable { name: String, dtype: DType },

    #[error("Failed to build gradient graph: {0}")]
    Graph(#[from] GraphError),
}

pub type AutogradResult<T> = Result<T, GradientError>;

/// The derived graph computing gradients of a set of loss variables.
#[derive(Debug, Clone)]
pub struct GradientGraph {
    graph: Graph,
    loss_variables: Vec<String>,
    required_placeholders: BTreeSet<String>,
    minimize: bool,
    /// Forward variable name -> gradient variable name in `graph`.
    gradients: HashMap<String, String>,
}

impl GradientGraph {
    /// Differentiates `losses` with respect to every eligible variable of `forward`.
    pub fn build(
        forward: &Graph,
        losses: &[String],
        required_placeholders: &BTreeSet<String>,
        minimize: bool,
    ) -> AutogradResult<Self> {
        if losses.is_empty() {
            return Err(GradientError::NoLossVariables);
        }
        let mut autograd = Autograd::detached(forward, required_placeholders.clone());
        for loss in losses {
            let id = forward.id_of(loss)?;
            let var = forward.variable(id)?;
            if !var.dtype().is_floating_point() || var.var_type() == VariableType::Sequence {
                return Err(GradientError::InvalidLossVariable {
                    name: loss.clone(),
                    dtype: var.dtype(),
                });
            }
            let loss_ref = autograd.reuse(id)?;
            let mut seed = autograd.add_op(OpKind::OnesLike, &[loss_ref])?;
            if !minimize {
                seed = autograd.add_op(OpKind::Neg, &[seed])?;
            }
            autograd.acc(id, seed)?;
        }
        autograd.backprop()?;

        let mut gradients = HashMap::new();
        for var in forward.variables() {
            if !autograd.exposed(var) {
                continue;
            }
            if let Some(&g) = autograd.gmap.get(&var.id()) {
                let name = autograd.fresh(&format!("{}-grad", var.name()));
                autograd.grad.add_op(Some(&name), OpKind::Identity, &[g])?;
                gradients.insert(var.name().to_string(), name);
            }
        }
        debug!(
            losses = ?losses,
            ops = autograd.grad.ops().len(),
            gradients = gradients.len(),
            "built gradient graph"
        );
        Ok(Self {
            graph: autograd.grad,
            loss_variables: losses.to_vec(),
            required_placeholders: required_placeholders.clone(),
            minimize,
            gradients,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn loss_variables(&self) -> &[String] {
        &self.loss_variables
    }

    pub fn required_placeholders(&self) -> &BTreeSet<String> {
        &self.required_placeholders
    }

    /// True when this graph was built for exactly this configuration.
    pub fn is_built_for(&self, losses: &[String], required: &BTreeSet<String>, minimize: bool) -> bool {
        self.loss_variables == losses && &self.required_placeholders == required && self.minimize == minimize
    }

    /// Name of the gradient variable of forward variable `name`, if it has one.
    pub fn gradient_name(&self, name: &str) -> Option<&str> {
        self.gradients.get(name).map(String::as_str)
    }

    pub fn gradient_variable(&self, name: &str) -> Option<&Variable> {
        self.gradient_name(name).and_then(|g| self.graph.get_variable(g))
    }

    /// Forward variables with a gradient.
    pub fn differentiated_variables(&self) -> impl Iterator<Item = &str> {
        self.gradients.keys().map(String::as_str)
    }

    /// Follows a rename in the forward graph. Returns `false` when the new name
    /// collides with a generated name, in which case the graph must be rebuilt.
    pub(crate) fn rename(&mut self, from: &str, to: &str) -> bool {
        if self.graph.has_variable(from) && self.graph.rename_variable(from, to).is_err() {
            return false;
        }
        if let Some(old_grad) = self.gradients.remove(from) {
            let new_grad = format!("{}-grad", to);
            let grad_name = if self.graph.rename_variable(&old_grad, &new_grad).is_ok() {
                new_grad
            } else {
                old_grad
            };
            self.gradients.insert(to.to_string(), grad_name);
        }
        for loss in self.loss_variables.iter_mut().filter(|l| l.as_str() == from) {
            *loss = to.to_string();
        }
        if self.required_placeholders.remove(from) {
            self.required_placeholders.insert(to.to_string());
        }
        true
    }

    /// Runs the forward pass once and evaluates the gradients of `wanted`
    /// against it. `extra_outputs` are additional forward variables to compute.
    pub fn compute(
        &self,
        forward: &Graph,
        session: &mut InferenceSession<'_>,
        placeholders: &HashMap<String, Value>,
        wanted: &[String],
        extra_outputs: &[VarId],
    ) -> Result<(Memo, HashMap<String, Value>), RuntimeError> {
        let mut targets = Vec::new();
        let mut names = Vec::new();
        for name in wanted {
            if let Some(grad_name) = self.gradients.get(name) {
                targets.push(self.graph.id_of(grad_name)?);
                names.push(name.clone());
            }
        }
        let (_, leaves) = self.graph.required(&targets);
        let mut forward_targets = extra_outputs.to_vec();
        let mut references = Vec::new();
        for leaf in leaves {
            let var = self.graph.variable(leaf)?;
            if matches!(var.var_type(), VariableType::Placeholder | VariableType::Sequence) {
                let forward_id = forward.id_of(var.name())?;
                forward_targets.push(forward_id);
                references.push((var.name().to_string(), forward_id));
            }
        }

        let forward_values = session.execute(forward, placeholders, &forward_targets)?;
        let bindings: HashMap<String, Value> = references
            .into_iter()
            .filter_map(|(name, id)| forward_values.get(&id).map(|v| (name, v.clone())))
            .collect();
        let gradient_values = session.execute(&self.graph, &bindings, &targets)?;
        let gradients = names
            .into_iter()
            .zip(targets)
            .filter_map(|(name, id)| gradient_values.get(&id).map(|v| (name, v.clone())))
            .collect();
        Ok((forward_values, gradients))
    }
}

// --------------------------- Autograd implementation ---------------------------

struct Autograd<'a> {
    /// Forward graph
    src: &'a Graph,
    /// Gradient graph
    grad: Graph,
    /// Forward variable -> its reference in `grad`. `None` when `grad` extends
    /// a copy of `src`, so forward ids are valid in both.
    refs: Option<HashMap<VarId, VarId>>,
    /// Forward variable -> accumulated gradient in `grad`
    gmap: HashMap<VarId, VarId>,
    /// Placeholders that were explicitly requested (detached mode only)
    required: BTreeSet<String>,
}

impl<'a> Autograd<'a> {
    fn detached(src: &'a Graph, required: BTreeSet<String>) -> Self {
        Self {
            src,
            grad: Graph::new(),
            refs: Some(HashMap::new()),
            gmap: HashMap::new(),
            required,
        }
    }

    /// Builder appending backward ops to a copy of `src` (used for control flow bodies).
    fn inline(src: &'a Graph) -> Self {
        Self {
            src,
            grad: src.clone(),
            refs: None,
            gmap: HashMap::new(),
            required: BTreeSet::new(),
        }
    }

    /// Whether gradient contributions to `id` should be computed at all.
    fn wants(&self, id: VarId) -> bool {
        let var = &self.src.variables()[id];
        if !var.dtype().is_floating_point() {
            return false;
        }
        match var.var_type() {
            VariableType::Variable | VariableType::Array => true,
            VariableType::Constant | VariableType::Sequence => false,
            VariableType::Placeholder => self.refs.is_none() || self.required.contains(var.name()),
        }
    }

    /// Whether the gradient of `var` is published.
    fn exposed(&self, var: &Variable) -> bool {
        self.wants(var.id())
    }

    /// Name not used in either graph.
    fn fresh(&self, base: &str) -> String {
        let free = |name: &str| !self.src.has_variable(name) && self.grad.unique_name(name) == name;
        if free(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| free(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn add_op(&mut self, kind: OpKind, inputs: &[VarId]) -> AutogradResult<VarId> {
        let name = self.fresh(&format!("grad/{}", kind.type_name()));
        Ok(self.grad.add_op(Some(&name), kind, inputs)?[0])
    }

    fn lit_scalar(&mut self, dtype: DType, value: f64) -> AutogradResult<VarId> {
        let name = self.fresh("grad/const");
        Ok(self
            .grad
            .add_variable(&name, VariableType::Constant, dtype, None, Some(Value::scalar(dtype, value)))?)
    }

    /// Reference to a forward value inside the gradient graph.
    fn reuse(&mut self, id: VarId) -> AutogradResult<VarId> {
        let Some(refs) = self.refs.as_mut() else {
            return Ok(id);
        };
        if let Some(&existing) = refs.get(&id) {
            return Ok(existing);
        }
        let var = &self.src.variables()[id];
        let var_type = if var.var_type() == VariableType::Sequence {
            VariableType::Sequence
        } else {
            VariableType::Placeholder
        };
        let reference = self.grad.add_variable(var.name(), var_type, var.dtype(), None, None)?;
        refs.insert(id, reference);
        Ok(reference)
    }

    /// Accumulates a gradient contribution (sum).
    fn acc(&mut self, target: VarId, contribution: VarId) -> AutogradResult<()> {
        let total = match self.gmap.get(&target).copied() {
            Some(existing) => self.add_op(OpKind::Add, &[existing, contribution])?,
            None => contribution,
        };
        self.gmap.insert(target, total);
        Ok(())
    }

    /// Reduces a gradient shaped like `out` to the shape of operand `x`.
    fn reduce_to(&mut self, g: VarId, out: VarId, x: VarId) -> AutogradResult<VarId> {
        let static_shape = |id: VarId| {
            self.src.variables()[id]
                .shape()
                .filter(|s| s.iter().all(|&d| d >= 0))
                .map(<[i64]>::to_vec)
        };
        if let (Some(a), Some(b)) = (static_shape(out), static_shape(x)) {
            if a == b {
                return Ok(g);
            }
        }
        let x_ref = self.reuse(x)?;
        self.add_op(OpKind::ReduceSumLike, &[g, x_ref])
    }

    fn backprop(&mut self) -> AutogradResult<()> {
        let src = self.src;
        for op in src.ops().iter().rev() {
            self.backprop_op(op)?;
        }
        Ok(())
    }

    fn backprop_op(&mut self, op: &Operation) -> AutogradResult<()> {
        let grads: Vec<Option<VarId>> = op.outputs().iter().map(|o| self.gmap.get(o).copied()).collect();
        if grads.iter().all(Option::is_none) || !op.inputs().iter().any(|&i| self.wants(i)) {
            return Ok(());
        }

        if let OpKind::If {
            cond,
            then_branch,
            else_branch,
        } = op.kind()
        {
            for (input, g) in self.if_backward(op, cond, then_branch, else_branch, &grads)? {
                self.acc(input, g)?;
            }
            return Ok(());
        }
        if let OpKind::While { .. } = op.kind() {
            warn!(op = op.name(), "gradients do not propagate through while loops");
            return Ok(());
        }

        let Some(g) = grads[0] else {
            return Ok(());
        };
        let x = op.inputs()[0];
        let y = op.inputs().get(1).copied();
        let z = op.outputs()[0];
        let dtype = self.src.variables()[z].dtype();
        let mut contributions: Vec<(VarId, VarId)> = Vec::new();

        match op.kind() {
            // -------- BINARY --------
            OpKind::Add | OpKind::Sub => {
                if self.wants(x) {
                    let gx = self.reduce_to(g, z, x)?;
                    contributions.push((x, gx));
                }
                if let Some(y) = y.filter(|&y| self.wants(y)) {
                    let g = if matches!(op.kind(), OpKind::Sub) {
                        self.add_op(OpKind::Neg, &[g])?
                    } else {
                        g
                    };
                    let gy = self.reduce_to(g, z, y)?;
                    contributions.push((y, gy));
                }
            }
            OpKind::Mul => {
                let y = y.unwrap_or(x);
                if self.wants(x) {
                    let y_im = self.reuse(y)?;
                    let gx = self.add_op(OpKind::Mul, &[g, y_im])?;
                    contributions.push((x, self.reduce_to(gx, z, x)?));
                }
                if self.wants(y) {
                    let x_im = self.reuse(x)?;
                    let gy = self.add_op(OpKind::Mul, &[g, x_im])?;
                    contributions.push((y, self.reduce_to(gy, z, y)?));
                }
            }
            OpKind::Div => {
                let y = y.unwrap_or(x);
                if self.wants(x) {
                    let y_im = self.reuse(y)?;
                    let gx = self.add_op(OpKind::Div, &[g, y_im])?;
                    contributions.push((x, self.reduce_to(gx, z, x)?));
                }
                if self.wants(y) {
                    // g_y = -g * z / y
                    let z_im = self.reuse(z)?;
                    let y_im = self.reuse(y)?;
                    let gz = self.add_op(OpKind::Mul, &[g, z_im])?;
                    let ratio = self.add_op(OpKind::Div, &[gz, y_im])?;
                    let gy = self.add_op(OpKind::Neg, &[ratio])?;
                    contributions.push((y, self.reduce_to(gy, z, y)?));
                }
            }
            OpKind::MatMul => {
                let y = y.unwrap_or(x);
                if self.wants(x) {
                    let y_im = self.reuse(y)?;
                    let yt = self.add_op(OpKind::Transpose { perm: None }, &[y_im])?;
                    contributions.push((x, self.add_op(OpKind::MatMul, &[g, yt])?));
                }
                if self.wants(y) {
                    let x_im = self.reuse(x)?;
                    let xt = self.add_op(OpKind::Transpose { perm: None }, &[x_im])?;
                    contributions.push((y, self.add_op(OpKind::MatMul, &[xt, g])?));
                }
            }

            // -------- UNARY --------
            OpKind::Pow { exponent } => {
                let x_im = self.reuse(x)?;
                let lowered = self.add_op(OpKind::Pow { exponent: exponent - 1.0 }, &[x_im])?;
                let factor = self.lit_scalar(dtype, *exponent)?;
                let local = self.add_op(OpKind::Mul, &[lowered, factor])?;
                contributions.push((x, self.add_op(OpKind::Mul, &[g, local])?));
            }
            OpKind::Neg => contributions.push((x, self.add_op(OpKind::Neg, &[g])?)),
            OpKind::Abs => {
                let x_im = self.reuse(x)?;
                let sign = self.add_op(OpKind::Sign, &[x_im])?;
                contributions.push((x, self.add_op(OpKind::Mul, &[g, sign])?));
            }
            OpKind::Exp => {
                let z_im = self.reuse(z)?;
                contributions.push((x, self.add_op(OpKind::Mul, &[g, z_im])?));
            }
            OpKind::Log => {
                let x_im = self.reuse(x)?;
                contributions.push((x, self.add_op(OpKind::Div, &[g, x_im])?));
            }
            OpKind::Sqrt => {
                let z_im = self.reuse(z)?;
                let two = self.lit_scalar(dtype, 2.0)?;
                let denom = self.add_op(OpKind::Mul, &[z_im, two])?;
                contributions.push((x, self.add_op(OpKind::Div, &[g, denom])?));
            }
            OpKind::Square => {
                let x_im = self.reuse(x)?;
                let two = self.lit_scalar(dtype, 2.0)?;
                let local = self.add_op(OpKind::Mul, &[x_im, two])?;
                contributions.push((x, self.add_op(OpKind::Mul, &[g, local])?));
            }
            OpKind::Tanh => {
                // g * (1 - z^2)
                let z_im = self.reuse(z)?;
                let one = self.lit_scalar(dtype, 1.0)?;
                let z2 = self.add_op(OpKind::Square, &[z_im])?;
                let local = self.add_op(OpKind::Sub, &[one, z2])?;
                contributions.push((x, self.add_op(OpKind::Mul, &[g, local])?));
            }
            OpKind::Sigmoid => {
                // g * z * (1 - z)
                let z_im = self.reuse(z)?;
                let one = self.lit_scalar(dtype, 1.0)?;
                let complement = self.add_op(OpKind::Sub, &[one, z_im])?;
                let local = self.add_op(OpKind::Mul, &[z_im, complement])?;
                contributions.push((x, self.add_op(OpKind::Mul, &[g, local])?));
            }
            OpKind::Relu => {
                let x_im = self.reuse(x)?;
                contributions.push((x, self.add_op(OpKind::ReluBp, &[g, x_im])?));
            }
            OpKind::Identity => contributions.push((x, g)),
            OpKind::Softmax { axis } => {
                let z_im = self.reuse(z)?;
                contributions.push((x, self.add_op(OpKind::SoftmaxBp { axis: *axis }, &[g, z_im])?));
            }

            // -------- REDUCTIONS --------
            OpKind::Sum { axes, keep_dims } | OpKind::Mean { axes, keep_dims } => {
                let x_im = self.reuse(x)?;
                let kind = OpKind::ReduceBp {
                    axes: axes.clone(),
                    keep_dims: *keep_dims,
                    mean: matches!(op.kind(), OpKind::Mean { .. }),
                };
                contributions.push((x, self.add_op(kind, &[g, x_im])?));
            }

            // -------- SHAPE --------
            OpKind::Reshape { .. } => {
                let x_im = self.reuse(x)?;
                contributions.push((x, self.add_op(OpKind::ReshapeLike, &[g, x_im])?));
            }
            OpKind::Transpose { perm } => {
                let inverse = perm.as_ref().map(|perm| {
                    let mut inverse = vec![0; perm.len()];
                    for (i, &p) in perm.iter().enumerate() {
                        inverse[p] = i;
                    }
                    inverse
                });
                contributions.push((x, self.add_op(OpKind::Transpose { perm: inverse }, &[g])?));
            }
            OpKind::Cast { dtype } if dtype.is_floating_point() => {
                let source = self.src.variables()[x].dtype();
                contributions.push((x, self.add_op(OpKind::Cast { dtype: source }, &[g])?));
            }

            // Zero derivative or not differentiable
            OpKind::Cast { .. }
            | OpKind::Sign
            | OpKind::Shape
            | OpKind::ZerosLike
            | OpKind::OnesLike
            | OpKind::Gt
            | OpKind::Lt
            | OpKind::Eq
            | OpKind::SequenceLength
            | OpKind::SequenceAt { .. }
            | OpKind::ReduceSumLike
            | OpKind::ReshapeLike
            | OpKind::ReduceBp { .. }
            | OpKind::ReluBp
            | OpKind::SoftmaxBp { .. } => {}

            OpKind::If { .. } | OpKind::While { .. } => {}
        }

        for (input, contribution) in contributions {
            if self.wants(input) {
                self.acc(input, contribution)?;
            }
        }
        Ok(())
    }

    /// Emits an `If` choosing between the backward graphs of both branches.
    /// Returns one gradient per differentiable operand.
    fn if_backward(
        &mut self,
        op: &Operation,
        cond: &SubGraph,
        then_branch: &SubGraph,
        else_branch: &SubGraph,
        grads: &[Option<VarId>],
    ) -> AutogradResult<Vec<(VarId, VarId)>> {
        let mut seeds = Vec::with_capacity(grads.len());
        let mut seed_dtypes = Vec::with_capacity(grads.len());
        for (&out, g) in op.outputs().iter().zip(grads) {
            let seed = match g {
                Some(g) => *g,
                None => {
                    let out_im = self.reuse(out)?;
                    self.add_op(OpKind::ZerosLike, &[out_im])?
                }
            };
            seeds.push(seed);
            seed_dtypes.push(self.src.variables()[out].dtype());
        }

        let then_bp = branch_backward(then_branch, &seed_dtypes)?;
        let else_bp = branch_backward(else_branch, &seed_dtypes)?;
        let cond_bp = with_extra_inputs(cond, &seed_dtypes)?;

        let mut inputs = Vec::with_capacity(op.inputs().len() + seeds.len());
        for &input in op.inputs() {
            inputs.push(self.reuse(input)?);
        }
        inputs.extend(seeds);

        let name = self.fresh(&format!("grad/{}", op.name()));
        let kind = OpKind::If {
            cond: cond_bp,
            then_branch: then_bp,
            else_branch: else_bp,
        };
        let outputs = self.grad.add_op(Some(&name), kind, &inputs)?;
        Ok(op
            .inputs()
            .iter()
            .copied()
            .zip(outputs)
            .filter(|&(input, _)| self.wants(input))
            .collect())
    }
}

/// Backward graph of a control flow body. Inputs are the body's inputs
/// followed by one gradient seed per body output; outputs are the gradients
/// of the body's inputs (zeros where there is no path).
fn branch_backward(body: &SubGraph, seed_dtypes: &[DType]) -> AutogradResult<SubGraph> {
    let mut autograd = Autograd::inline(&body.graph);
    let mut seed_names = Vec::with_capacity(body.outputs.len());
    for (output, &dtype) in body.outputs.iter().zip(seed_dtypes) {
        let name = autograd.fresh(&format!("{}-seed", output));
        let seed = autograd.grad.add_placeholder(&name, dtype, None)?;
        seed_names.push(name);
        let out_id = body.graph.id_of(output)?;
        if autograd.wants(out_id) {
            autograd.acc(out_id, seed)?;
        }
    }
    autograd.backprop()?;

    let mut outputs = Vec::with_capacity(body.inputs.len());
    for input in &body.inputs {
        let id = body.graph.id_of(input)?;
        let g = match autograd.gmap.get(&id).copied() {
            Some(g) => g,
            None => autograd.add_op(OpKind::ZerosLike, &[id])?,
        };
        outputs.push(autograd.grad.variables()[g].name().to_string());
    }
    let mut inputs = body.inputs.clone();
    inputs.extend(seed_names);
    Ok(SubGraph::new(autograd.grad, inputs, outputs))
}

/// Copy of `body` accepting (and ignoring) extra trailing inputs.
fn with_extra_inputs(body: &SubGraph, dtypes: &[DType]) -> AutogradResult<SubGraph> {
    let mut extended = body.clone();
    for &dtype in dtypes {
        let name = extended.graph.unique_name("unused-seed");
        extended.graph.add_placeholder(&name, dtype, None)?;
        extended.inputs.push(name);
    }
    Ok(extended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_names_follow_forward_names() {
        let mut g = Graph::new();
        let w = g
            .add_variable(
                "w",
                VariableType::Variable,
                DType::F64,
                None,
                Some(Value::from_f64(&[2], vec![1.0, 2.0]).unwrap()),
            )
            .unwrap();
        let sq = g.add_op(None, OpKind::Square, &[w]).unwrap()[0];
        g.add_op(
            Some("loss"),
            OpKind::Sum {
                axes: vec![],
                keep_dims: false,
            },
            &[sq],
        )
        .unwrap();
        let grads = GradientGraph::build(&g, &["loss".to_string()], &BTreeSet::new(), true).unwrap();
        assert_eq!(grads.gradient_name("w"), Some("w-grad"));
        assert_eq!(grads.gradient_name("loss"), Some("loss-grad"));
        assert!(grads.graph().has_variable("w"));
    }

    #[test]
    fn empty_loss_set_is_rejected() {
        let g = Graph::new();
        assert_eq!(
            GradientGraph::build(&g, &[], &BTreeSet::new(), true).unwrap_err(),
            GradientError::NoLossVariables
        );
    }
}
