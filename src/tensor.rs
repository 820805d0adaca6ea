//! Module defining `SameDiff`, `GraphContext` and `Tensor`.
//!
//! `Tensor` does not hold data. It is a lightweight handle to one variable of
//! a graph: every operation on it (`add`, `mmul`, ...) appends an op to the
//! graph instead of computing anything.
//!
//! `GraphContext` owns the graph together with everything derived from it:
//! loss variables, the lazily built gradient graph, the training
//! configuration and updater state. `SameDiff` is the shared handle to it.

use crate::autograd::{GradientError, GradientGraph};
use crate::error::Result;
use crate::graph::{DType, Graph, GraphError, OpKind, Value, VarId, Variable, VariableType};
use crate::init::WeightInit;
use crate::optimizers::GradientUpdater;
use crate::runtime::{Backend, CpuBackend, InferenceSession};
use crate::train::{Listener, TrainingConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{Ref, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;
use tracing::debug;

/// Owns one graph and the state derived from it.
pub struct GraphContext {
    pub(crate) graph: Graph,
    pub(crate) loss_variables: Vec<String>,
    /// Placeholders whose gradients were explicitly requested.
    pub(crate) required_placeholders: BTreeSet<String>,
    pub(crate) gradient: Option<GradientGraph>,
    pub(crate) training_config: Option<TrainingConfig>,
    pub(crate) updater: Option<Box<dyn GradientUpdater>>,
    pub(crate) listeners: Vec<Box<dyn Listener>>,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) rng: StdRng,
}

impl GraphContext {
    pub fn new(backend: Box<dyn Backend>, rng: StdRng) -> Self {
        Self {
            graph: Graph::new(),
            loss_variables: Vec::new(),
            required_placeholders: BTreeSet::new(),
            gradient: None,
            training_config: None,
            updater: None,
            listeners: Vec::new(),
            backend,
            rng,
        }
    }

    pub(crate) fn minimize(&self) -> bool {
        self.training_config.as_ref().map_or(true, |c| c.minimize)
    }

    /// Drops the gradient graph after a structural edit.
    pub(crate) fn invalidate(&mut self) {
        if self.gradient.take().is_some() {
            debug!("gradient graph invalidated");
        }
    }

    /// Builds the gradient graph unless the current one matches the loss set.
    pub(crate) fn ensure_gradient(&mut self) -> std::result::Result<&GradientGraph, GradientError> {
        if self.loss_variables.is_empty() {
            return Err(GradientError::NoLossVariables);
        }
        let minimize = self.minimize();
        let current = self
            .gradient
            .as_ref()
            .map_or(false, |g| g.is_built_for(&self.loss_variables, &self.required_placeholders, minimize));
        if !current {
            debug!(losses = ?self.loss_variables, "building gradient graph");
            self.gradient = Some(GradientGraph::build(
                &self.graph,
                &self.loss_variables,
                &self.required_placeholders,
                minimize,
            )?);
        }
        self.gradient.as_ref().ok_or(GradientError::NoLossVariables)
    }

    /// Forward values and gradients from one forward pass.
    pub(crate) fn compute_gradients(
        &mut self,
        placeholders: &HashMap<String, Value>,
        outputs: &[String],
        variables: &[String],
    ) -> Result<(HashMap<String, Value>, HashMap<String, Value>)> {
        let mut output_ids = Vec::with_capacity(outputs.len());
        for name in outputs {
            output_ids.push(self.graph.id_of(name)?);
        }
        self.ensure_gradient()?;
        let GraphContext {
            graph,
            gradient,
            listeners,
            backend,
            ..
        } = self;
        let gradient = gradient.as_ref().ok_or(GradientError::NoLossVariables)?;
        let mut session = InferenceSession::with_listeners(&**backend, listeners);
        let (memo, gradients) = gradient.compute(graph, &mut session, placeholders, variables, &output_ids)?;
        let values = outputs
            .iter()
            .zip(&output_ids)
            .filter_map(|(name, id)| memo.get(id).map(|v| (name.clone(), v.clone())))
            .collect();
        Ok((values, gradients))
    }
}

/// Shared handle to a [`GraphContext`].
///
/// Cloning the handle does not copy the graph; all clones build into the same
/// graph. Not `Send`: a graph is used from one thread.
#[derive(Clone)]
pub struct SameDiff {
    pub(crate) ctx: Rc<RefCell<GraphContext>>,
}

impl Default for SameDiff {
    fn default() -> Self {
        Self::create()
    }
}

impl fmt::Debug for SameDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ctx.try_borrow() {
            Ok(ctx) => f
                .debug_struct("SameDiff")
                .field("variables", &ctx.graph.variables().len())
                .field("ops", &ctx.graph.ops().len())
                .field("loss_variables", &ctx.loss_variables)
                .finish(),
            Err(_) => f.write_str("SameDiff { <borrowed> }"),
        }
    }
}

impl SameDiff {
    /// An empty graph executed on the CPU backend.
    pub fn create() -> Self {
        Self::with_backend(Box::new(CpuBackend::new()), StdRng::from_entropy())
    }

    /// Like [`create`](Self::create) with a deterministic initializer RNG.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_backend(Box::new(CpuBackend::new()), StdRng::seed_from_u64(seed))
    }

    pub fn with_backend(backend: Box<dyn Backend>, rng: StdRng) -> Self {
        Self {
            ctx: Rc::new(RefCell::new(GraphContext::new(backend, rng))),
        }
    }

    pub(crate) fn from_graph(graph: Graph) -> Self {
        let sd = Self::create();
        sd.ctx.borrow_mut().graph = graph;
        sd
    }

    fn tensor(&self, id: VarId) -> Tensor {
        Tensor {
            id,
            sd: self.clone(),
        }
    }

    /// Id of `tensor` in this graph, rejecting handles from other graphs.
    fn own(&self, tensor: &Tensor) -> Result<VarId> {
        if Rc::ptr_eq(&self.ctx, &tensor.sd.ctx) {
            Ok(tensor.id)
        } else {
            Err(GraphError::ForeignVariable(tensor.name()).into())
        }
    }

    /// Read access to the graph.
    pub fn graph(&self) -> Ref<'_, Graph> {
        Ref::map(self.ctx.borrow(), |ctx| &ctx.graph)
    }

    /// The current gradient graph, if one has been built and not invalidated.
    pub fn gradient_graph(&self) -> Option<Ref<'_, GradientGraph>> {
        Ref::filter_map(self.ctx.borrow(), |ctx| ctx.gradient.as_ref()).ok()
    }

    fn add_leaf(
        &self,
        name: &str,
        var_type: VariableType,
        dtype: DType,
        shape: Option<Vec<i64>>,
        array: Option<Value>,
    ) -> Result<Tensor> {
        let mut ctx = self.ctx.borrow_mut();
        let id = ctx.graph.add_variable(name, var_type, dtype, shape, array)?;
        ctx.invalidate();
        drop(ctx);
        Ok(self.tensor(id))
    }

    // --- Variable creation ---

    /// Input bound at execution time; `-1` marks a dimension that may vary.
    pub fn placeholder(&self, name: &str, dtype: DType, shape: &[i64]) -> Result<Tensor> {
        self.add_leaf(name, VariableType::Placeholder, dtype, Some(shape.to_vec()), None)
    }

    /// Placeholder accepting arrays of any rank.
    pub fn placeholder_any_shape(&self, name: &str, dtype: DType) -> Result<Tensor> {
        self.add_leaf(name, VariableType::Placeholder, dtype, None, None)
    }

    /// Trainable variable holding `value`.
    pub fn var(&self, name: &str, value: Value) -> Result<Tensor> {
        self.add_leaf(name, VariableType::Variable, value.dtype(), None, Some(value))
    }

    /// Trainable variable initialized with `init`.
    pub fn var_init(&self, name: &str, dtype: DType, shape: &[usize], init: WeightInit) -> Result<Tensor> {
        let value = {
            let mut ctx = self.ctx.borrow_mut();
            init.sample(dtype, shape, &mut ctx.rng)
                .map_err(|message| GraphError::InvalidInitializer {
                    name: name.to_string(),
                    message,
                })?
        };
        self.var(name, value)
    }

    pub fn constant(&self, name: &str, value: Value) -> Result<Tensor> {
        self.add_leaf(name, VariableType::Constant, value.dtype(), None, Some(value))
    }

    pub fn scalar(&self, name: &str, dtype: DType, value: f64) -> Result<Tensor> {
        self.constant(name, Value::scalar(dtype, value))
    }

    /// Sequence input: an ordered list of arrays bound at execution time.
    pub fn sequence(&self, name: &str, dtype: DType) -> Result<Tensor> {
        self.add_leaf(name, VariableType::Sequence, dtype, None, None)
    }

    /// Appends an op and returns handles to all of its outputs.
    pub fn op(&self, name: Option<&str>, kind: OpKind, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let ids = inputs.iter().map(|t| self.own(t)).collect::<Result<Vec<_>>>()?;
        let mut ctx = self.ctx.borrow_mut();
        let outputs = ctx.graph.add_op(name, kind, &ids)?;
        ctx.invalidate();
        drop(ctx);
        Ok(outputs.into_iter().map(|id| self.tensor(id)).collect())
    }

    /// Single-output variant of [`op`](Self::op).
    pub fn op1(&self, name: Option<&str>, kind: OpKind, inputs: &[&Tensor]) -> Result<Tensor> {
        let kind_name = kind.type_name();
        self.op(name, kind, inputs)?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::UnknownVariable(kind_name.to_string()).into())
    }

    // --- Lookup ---

    pub fn get_variable(&self, name: &str) -> Option<Tensor> {
        let id = self.ctx.borrow().graph.get_variable(name).map(Variable::id)?;
        Some(self.tensor(id))
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.ctx.borrow().graph.has_variable(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.ctx.borrow().graph.variable_names()
    }

    /// Handles to all trainable floating point variables.
    pub fn trainable_variables(&self) -> Vec<Tensor> {
        let ids = self.ctx.borrow().graph.trainable_variables();
        ids.into_iter().map(|id| self.tensor(id)).collect()
    }

    pub fn summary(&self) -> String {
        self.ctx.borrow().graph.summary()
    }

    // --- Arrays ---

    pub fn set_array(&self, name: &str, value: Value) -> Result<()> {
        Ok(self.ctx.borrow_mut().graph.set_array(name, value)?)
    }

    pub fn get_array(&self, name: &str) -> Option<Value> {
        self.ctx.borrow().graph.array(name).cloned()
    }

    // --- Execution ---

    /// Computes the named variables.
    pub fn output(&self, placeholders: &HashMap<String, Value>, outputs: &[&str]) -> Result<HashMap<String, Value>> {
        let names: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
        let mut guard = self.ctx.borrow_mut();
        let ctx = &mut *guard;
        let mut session = InferenceSession::with_listeners(&*ctx.backend, &mut ctx.listeners);
        Ok(session.output(&ctx.graph, placeholders, &names)?)
    }

    /// Computes one variable.
    pub fn output_single(&self, placeholders: &HashMap<String, Value>, output: &str) -> Result<Value> {
        let mut values = self.output(placeholders, &[output])?;
        values
            .remove(output)
            .ok_or_else(|| GraphError::UnknownVariable(output.to_string()).into())
    }

    /// Computes every op output that no other op consumes.
    pub fn output_all(&self, placeholders: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let names: Vec<String> = {
            let ctx = self.ctx.borrow();
            ctx.graph
                .output_variables()
                .into_iter()
                .map(|id| ctx.graph.variables()[id].name().to_string())
                .collect()
        };
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.output(placeholders, &refs)
    }

    // --- Loss variables and gradients ---

    pub fn loss_variables(&self) -> Vec<String> {
        self.ctx.borrow().loss_variables.clone()
    }

    /// Replaces the loss set. The gradient graph is rebuilt on next use.
    pub fn set_loss_variables(&self, names: &[&str]) -> Result<()> {
        let mut ctx = self.ctx.borrow_mut();
        let mut losses = Vec::with_capacity(names.len());
        for name in names {
            check_loss(&ctx.graph, name)?;
            if !losses.iter().any(|l: &String| l == *name) {
                losses.push(name.to_string());
            }
        }
        ctx.loss_variables = losses;
        Ok(())
    }

    pub fn add_loss_variable(&self, name: &str) -> Result<()> {
        let mut ctx = self.ctx.borrow_mut();
        check_loss(&ctx.graph, name)?;
        if !ctx.loss_variables.iter().any(|l| l == name) {
            ctx.loss_variables.push(name.to_string());
        }
        Ok(())
    }

    /// Builds the gradient graph now (it is otherwise built on first use).
    pub fn create_grad_function(&self) -> Result<()> {
        self.ctx.borrow_mut().ensure_gradient()?;
        Ok(())
    }

    /// Builds the gradient graph, also differentiating the given placeholders.
    pub fn create_grad_function_for(&self, placeholders: &[&str]) -> Result<()> {
        let mut ctx = self.ctx.borrow_mut();
        for name in placeholders {
            let var = ctx
                .graph
                .get_variable(name)
                .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
            if var.var_type() != VariableType::Placeholder {
                return Err(crate::runtime::RuntimeError::NotAPlaceholder(name.to_string()).into());
            }
        }
        ctx.required_placeholders = placeholders.iter().map(|s| s.to_string()).collect();
        ctx.ensure_gradient()?;
        Ok(())
    }

    /// The gradient variable of `name`.
    ///
    /// `Ok(None)` for a floating point variable without a gradient (not an
    /// ancestor of a loss, a constant, or a placeholder that was not
    /// requested). Fails for non floating point variables.
    pub fn grad(&self, name: &str) -> Result<Option<Variable>> {
        let mut ctx = self.ctx.borrow_mut();
        let var = ctx
            .graph
            .get_variable(name)
            .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
        if !var.dtype().is_floating_point() || var.var_type() == VariableType::Sequence {
            return Err(GradientError::NotFloatingPoint {
                name: name.to_string(),
                dtype: var.dtype(),
            }
            .into());
        }
        let gradient = ctx.ensure_gradient()?;
        Ok(gradient.gradient_variable(name).cloned())
    }

    /// Gradients of the named variables. Variables without a gradient are
    /// absent from the result.
    pub fn calculate_gradients(
        &self,
        placeholders: &HashMap<String, Value>,
        variables: &[&str],
    ) -> Result<HashMap<String, Value>> {
        Ok(self.calculate_gradients_and_outputs(placeholders, &[], variables)?.1)
    }

    /// Forward outputs and gradients from a single forward pass.
    pub fn calculate_gradients_and_outputs(
        &self,
        placeholders: &HashMap<String, Value>,
        outputs: &[&str],
        variables: &[&str],
    ) -> Result<(HashMap<String, Value>, HashMap<String, Value>)> {
        let mut ctx = self.ctx.borrow_mut();
        for name in variables {
            let var = ctx
                .graph
                .get_variable(name)
                .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
            if !var.dtype().is_floating_point() || var.var_type() == VariableType::Sequence {
                return Err(GradientError::NotFloatingPoint {
                    name: name.to_string(),
                    dtype: var.dtype(),
                }
                .into());
            }
            if var.var_type() == VariableType::Placeholder {
                ctx.required_placeholders.insert(name.to_string());
            }
        }
        let outputs: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
        let variables: Vec<String> = variables.iter().map(|s| s.to_string()).collect();
        ctx.compute_gradients(placeholders, &outputs, &variables)
    }

    // --- Graph edits ---

    /// Renames a variable everywhere it is referenced: ops, loss variables,
    /// training config, updater state and the gradient graph.
    pub fn rename_variable(&self, from: &str, to: &str) -> Result<()> {
        let mut guard = self.ctx.borrow_mut();
        let ctx = &mut *guard;
        ctx.graph.rename_variable(from, to)?;
        for loss in ctx.loss_variables.iter_mut().filter(|l| l.as_str() == from) {
            *loss = to.to_string();
        }
        if ctx.required_placeholders.remove(from) {
            ctx.required_placeholders.insert(to.to_string());
        }
        if let Some(config) = ctx.training_config.as_mut() {
            config.rename_variable(from, to);
        }
        if let Some(updater) = ctx.updater.as_mut() {
            updater.rename_parameter(from, to);
        }
        let kept = ctx.gradient.as_mut().map_or(true, |g| g.rename(from, to));
        if !kept {
            ctx.invalidate();
        }
        Ok(())
    }

    pub fn convert_to_constant(&self, name: &str) -> Result<()> {
        self.convert_to_constants(&[name])
    }

    pub fn convert_to_constants(&self, names: &[&str]) -> Result<()> {
        let mut ctx = self.ctx.borrow_mut();
        for name in names {
            ctx.graph.convert_to_constant(name)?;
            ctx.required_placeholders.remove(*name);
        }
        ctx.invalidate();
        Ok(())
    }

    pub fn convert_to_variable(&self, name: &str) -> Result<()> {
        self.convert_to_variables(&[name])
    }

    pub fn convert_to_variables(&self, names: &[&str]) -> Result<()> {
        let mut ctx = self.ctx.borrow_mut();
        for name in names {
            ctx.graph.convert_to_variable(name)?;
        }
        ctx.invalidate();
        Ok(())
    }

    /// Changes the dtype of leaf variables and re-infers computed variables.
    pub fn convert_data_types(&self, dtypes: &HashMap<String, DType>) -> Result<()> {
        let mut ctx = self.ctx.borrow_mut();
        ctx.graph.convert_data_types(dtypes)?;
        ctx.invalidate();
        Ok(())
    }

    // --- Listeners ---

    pub fn add_listener(&self, listener: Box<dyn Listener>) {
        self.ctx.borrow_mut().listeners.push(listener);
    }

    pub fn clear_listeners(&self) {
        self.ctx.borrow_mut().listeners.clear();
    }
}

fn check_loss(graph: &Graph, name: &str) -> Result<()> {
    let var = graph
        .get_variable(name)
        .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))?;
    if !var.dtype().is_floating_point() || var.var_type() == VariableType::Sequence {
        return Err(GradientError::InvalidLossVariable {
            name: name.to_string(),
            dtype: var.dtype(),
        }
        .into());
    }
    Ok(())
}

/// Symbolic handle to one variable of a graph.
///
/// The handle stores the variable id, so it stays valid across renames.
#[derive(Clone)]
pub struct Tensor {
    pub(crate) id: VarId,
    pub(crate) sd: SameDiff,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .sd
            .ctx
            .try_borrow()
            .ok()
            .and_then(|ctx| ctx.graph.variables().get(self.id).map(|v| v.name().to_string()));
        f.debug_struct("Tensor").field("id", &self.id).field("name", &name).finish()
    }
}

impl Tensor {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn same_diff(&self) -> &SameDiff {
        &self.sd
    }

    fn with_variable<T>(&self, f: impl FnOnce(&Variable) -> T) -> T {
        let ctx = self.sd.ctx.borrow();
        f(&ctx.graph.variables()[self.id])
    }

    /// Current name of the variable.
    pub fn name(&self) -> String {
        self.with_variable(|v| v.name().to_string())
    }

    pub fn dtype(&self) -> DType {
        self.with_variable(Variable::dtype)
    }

    pub fn shape(&self) -> Option<Vec<i64>> {
        self.with_variable(|v| v.shape().map(<[i64]>::to_vec))
    }

    pub fn var_type(&self) -> VariableType {
        self.with_variable(Variable::var_type)
    }

    pub fn get_array(&self) -> Option<Value> {
        self.with_variable(|v| v.array().cloned())
    }

    pub fn set_array(&self, value: Value) -> Result<()> {
        let name = self.name();
        self.sd.set_array(&name, value)
    }

    /// Renames the variable, returning the handle for chaining.
    pub fn rename(self, name: &str) -> Result<Tensor> {
        let current = self.name();
        self.sd.rename_variable(&current, name)?;
        Ok(self)
    }

    /// Adds this variable to the loss set.
    pub fn mark_as_loss(&self) -> Result<()> {
        self.sd.add_loss_variable(&self.name())
    }

    /// Gradient variable of this variable, see [`SameDiff::grad`].
    pub fn gradient(&self) -> Result<Option<Variable>> {
        self.sd.grad(&self.name())
    }

    /// Computes this variable.
    pub fn eval(&self, placeholders: &HashMap<String, Value>) -> Result<Value> {
        self.sd.output_single(placeholders, &self.name())
    }

    fn unary(&self, kind: OpKind) -> Result<Tensor> {
        self.sd.op1(None, kind, &[self])
    }

    fn binary(&self, kind: OpKind, other: &Tensor) -> Result<Tensor> {
        self.sd.op1(None, kind, &[self, other])
    }

    /// Scalar constant of this tensor's dtype.
    fn scalar_like(&self, value: f64) -> Result<Tensor> {
        let name = self.sd.graph().unique_name("scalar");
        self.sd.scalar(&name, self.dtype(), value)
    }

    // --- Math ---

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Add, other)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Sub, other)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Mul, other)
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Div, other)
    }

    pub fn add_scalar(&self, value: f64) -> Result<Tensor> {
        self.add(&self.scalar_like(value)?)
    }

    pub fn sub_scalar(&self, value: f64) -> Result<Tensor> {
        self.sub(&self.scalar_like(value)?)
    }

    pub fn mul_scalar(&self, value: f64) -> Result<Tensor> {
        self.mul(&self.scalar_like(value)?)
    }

    pub fn div_scalar(&self, value: f64) -> Result<Tensor> {
        self.div(&self.scalar_like(value)?)
    }

    /// Matrix product of two rank 2 tensors.
    pub fn mmul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::MatMul, other)
    }

    pub fn pow(&self, exponent: f64) -> Result<Tensor> {
        self.unary(OpKind::Pow { exponent })
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.unary(OpKind::Neg)
    }

    pub fn abs(&self) -> Result<Tensor> {
        self.unary(OpKind::Abs)
    }

    pub fn sign(&self) -> Result<Tensor> {
        self.unary(OpKind::Sign)
    }

    pub fn exp(&self) -> Result<Tensor> {
        self.unary(OpKind::Exp)
    }

    pub fn log(&self) -> Result<Tensor> {
        self.unary(OpKind::Log)
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        self.unary(OpKind::Sqrt)
    }

    pub fn square(&self) -> Result<Tensor> {
        self.unary(OpKind::Square)
    }

    pub fn identity(&self) -> Result<Tensor> {
        self.unary(OpKind::Identity)
    }

    // --- Activations ---

    pub fn tanh(&self) -> Result<Tensor> {
        self.unary(OpKind::Tanh)
    }

    pub fn sigmoid(&self) -> Result<Tensor> {
        self.unary(OpKind::Sigmoid)
    }

    pub fn relu(&self) -> Result<Tensor> {
        self.unary(OpKind::Relu)
    }

    pub fn softmax(&self, axis: isize) -> Result<Tensor> {
        self.unary(OpKind::Softmax { axis })
    }

    // --- Reductions ---

    pub fn sum(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor> {
        self.unary(OpKind::Sum {
            axes: axes.to_vec(),
            keep_dims,
        })
    }

    pub fn mean(&self, axes: &[isize], keep_dims: bool) -> Result<Tensor> {
        self.unary(OpKind::Mean {
            axes: axes.to_vec(),
            keep_dims,
        })
    }

    /// Sum over every element, producing a scalar.
    pub fn sum_all(&self) -> Result<Tensor> {
        self.sum(&[], false)
    }

    /// Mean over every element, producing a scalar.
    pub fn mean_all(&self) -> Result<Tensor> {
        self.mean(&[], false)
    }

    // --- Shape ---

    /// A single `-1` entry is inferred from the element count.
    pub fn reshape(&self, shape: &[i64]) -> Result<Tensor> {
        self.unary(OpKind::Reshape { shape: shape.to_vec() })
    }

    /// Reverses the axes.
    pub fn transpose(&self) -> Result<Tensor> {
        self.unary(OpKind::Transpose { perm: None })
    }

    pub fn permute(&self, perm: &[usize]) -> Result<Tensor> {
        self.unary(OpKind::Transpose {
            perm: Some(perm.to_vec()),
        })
    }

    /// Runtime shape as an `I64` vector.
    pub fn shape_of(&self) -> Result<Tensor> {
        self.unary(OpKind::Shape)
    }

    pub fn cast(&self, dtype: DType) -> Result<Tensor> {
        self.unary(OpKind::Cast { dtype })
    }

    pub fn zeros_like(&self) -> Result<Tensor> {
        self.unary(OpKind::ZerosLike)
    }

    pub fn ones_like(&self) -> Result<Tensor> {
        self.unary(OpKind::OnesLike)
    }

    // --- Comparisons ---

    pub fn gt(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Gt, other)
    }

    pub fn lt(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Lt, other)
    }

    pub fn eq(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Eq, other)
    }

    pub fn gt_scalar(&self, value: f64) -> Result<Tensor> {
        self.gt(&self.scalar_like(value)?)
    }

    pub fn lt_scalar(&self, value: f64) -> Result<Tensor> {
        self.lt(&self.scalar_like(value)?)
    }

    // --- Sequences ---

    pub fn sequence_length(&self) -> Result<Tensor> {
        self.unary(OpKind::SequenceLength)
    }

    /// Element of a sequence; negative indices count from the end.
    pub fn sequence_at(&self, index: i64) -> Result<Tensor> {
        self.unary(OpKind::SequenceAt { index })
    }
}

// Operators for the `&a + &b` syntax. Building can fail, so they yield `Result`.

impl Add<&Tensor> for &Tensor {
    type Output = Result<Tensor>;
    fn add(self, rhs: &Tensor) -> Self::Output {
        Tensor::add(self, rhs)
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Result<Tensor>;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        Tensor::sub(self, rhs)
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Result<Tensor>;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        Tensor::mul(self, rhs)
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Result<Tensor>;
    fn div(self, rhs: &Tensor) -> Self::Output {
        Tensor::div(self, rhs)
    }
}

impl Neg for &Tensor {
    type Output = Result<Tensor>;
    fn neg(self) -> Self::Output {
        Tensor::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn feed(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn operators_build_ops() {
        let sd = SameDiff::create();
        let a = sd.placeholder("a", DType::F64, &[2]).unwrap();
        let b = sd.constant("b", Value::from_f64(&[2], vec![1.0, 2.0]).unwrap()).unwrap();
        let c = (&a * &b).unwrap().rename("c").unwrap();
        let out = c
            .eval(&feed(vec![("a", Value::from_f64(&[2], vec![3.0, 4.0]).unwrap())]))
            .unwrap();
        assert_eq!(out, Value::from_f64(&[2], vec![3.0, 8.0]).unwrap());
        assert_eq!(c.name(), "c");
    }

    #[test]
    fn foreign_tensors_are_rejected() {
        let sd1 = SameDiff::create();
        let sd2 = SameDiff::create();
        let a = sd1.placeholder("a", DType::F32, &[1]).unwrap();
        let b = sd2.placeholder("b", DType::F32, &[1]).unwrap();
        let err = a.add(&b).unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::ForeignVariable(_))));
    }

    #[test]
    fn structural_edits_invalidate_gradients() {
        let sd = SameDiff::create();
        let w = sd.var("w", Value::from_f64(&[2], vec![1.0, 2.0]).unwrap()).unwrap();
        let loss = w.square().unwrap().sum_all().unwrap();
        loss.mark_as_loss().unwrap();
        sd.create_grad_function().unwrap();
        assert!(sd.gradient_graph().is_some());
        w.exp().unwrap();
        assert!(sd.gradient_graph().is_none());
    }

    #[test]
    fn integer_loss_is_rejected() {
        let sd = SameDiff::create();
        let i = sd.constant("i", Value::scalar_i64(3)).unwrap();
        let err = sd.add_loss_variable(&i.name()).unwrap_err();
        assert!(matches!(err, Error::Gradient(GradientError::InvalidLossVariable { .. })));
    }
}
