//! The symbolic graph: variables, operations and the name registry.
//!
//! A [`Graph`] owns its variables and ops. Ops are stored in insertion order;
//! because an op may only consume variables that already exist, insertion
//! order is always a valid topological order. Variable ids are indices into
//! the variable table and stay stable when a variable is renamed.

pub mod ops;
pub mod value;

pub use ops::{OpKind, SubGraph};
pub use value::{DType, Value};

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError, TensorMeta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write};
use thiserror::Error;

/// Identifier of a variable inside one graph.
pub type VarId = usize;

/// Marks a dimension whose size is only known at execution time.
pub const UNKNOWN_DIM: i64 = -1;

pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Variable with name \"{0}\" already exists")]
    DuplicateName(String),

    #[error("No variable with name \"{0}\" exists in this graph")]
    UnknownVariable(String),

    #[error("Variable id {0} does not exist in this graph")]
    UnknownVariableId(VarId),

    #[error("Variable \"{0}\" belongs to a different graph. \
             Values used inside a control flow body must be passed in as explicit inputs.")]
    ForeignVariable(String),

    #[error("Invalid operation \"{op}\": {source}")]
    Inference {
        op: String,
        #[source]
        source: ShapeInferenceError,
    },

    #[error("Cannot convert variable \"{name}\" of type {from} to {to}")]
    InvalidConversion {
        name: String,
        from: VariableType,
        to: VariableType,
    },

    #[error("Cannot change the dtype of \"{0}\": its dtype is derived from the op that produces it")]
    DerivedDType(String),

    #[error("Array for \"{name}\" has dtype {actual} but the variable is declared as {expected}")]
    DTypeMismatch {
        name: String,
        expected: DType,
        actual: DType,
    },

    #[error("Placeholder \"{name}\" was declared with shape {expected:?} but was given an array of shape {actual:?}. \
             Only dimensions declared as -1 may vary.")]
    PlaceholderShape {
        name: String,
        expected: Vec<i64>,
        actual: Vec<usize>,
    },

    #[error("Cannot set an array on \"{name}\": {var_type} variables are computed by the graph")]
    NotSettable { name: String, var_type: VariableType },

    #[error("Invalid control flow construct \"{name}\": {message}")]
    InvalidControlFlow { name: String, message: String },

    #[error("Cannot initialize \"{name}\": {message}")]
    InvalidInitializer { name: String, message: String },

    #[error("Malformed graph description: {0}")]
    Malformed(String),
}

/// Role of a variable in the graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    /// Input bound at execution time.
    Placeholder,
    /// Fixed array, never trained.
    Constant,
    /// Trainable parameter.
    Variable,
    /// Output of an op.
    Array,
    /// Ordered list of arrays bound at execution time.
    Sequence,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableType::Placeholder => "PLACEHOLDER",
            VariableType::Constant => "CONSTANT",
            VariableType::Variable => "VARIABLE",
            VariableType::Array => "ARRAY",
            VariableType::Sequence => "SEQUENCE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub(crate) id: VarId,
    pub(crate) name: String,
    pub(crate) var_type: VariableType,
    pub(crate) dtype: DType,
    pub(crate) shape: Option<Vec<i64>>,
    /// Stored separately from the graph description when saving.
    #[serde(skip)]
    pub(crate) array: Option<Value>,
    /// Index of the op producing this variable (ARRAY only).
    pub(crate) producer: Option<usize>,
}

impl Variable {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn var_type(&self) -> VariableType {
        self.var_type
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Declared or inferred shape; `-1` marks a dynamic dimension.
    pub fn shape(&self) -> Option<&[i64]> {
        self.shape.as_deref()
    }

    pub fn array(&self) -> Option<&Value> {
        self.array.as_ref()
    }

    pub fn producer(&self) -> Option<usize> {
        self.producer
    }

    /// Leaves are bound from outside the graph rather than computed.
    pub fn is_leaf(&self) -> bool {
        self.producer.is_none()
    }

    pub fn meta(&self) -> TensorMeta {
        if self.var_type == VariableType::Sequence {
            TensorMeta::sequence(self.dtype)
        } else {
            TensorMeta::new(self.dtype, self.shape.clone())
        }
    }

    /// Checks an array bound to a placeholder or sequence variable.
    pub fn validate_binding(&self, value: &Value) -> GraphResult<()> {
        if value.dtype() != self.dtype || value.is_sequence() != (self.var_type == VariableType::Sequence) {
            return Err(GraphError::DTypeMismatch {
                name: self.name.clone(),
                expected: self.dtype,
                actual: value.dtype(),
            });
        }
        if self.var_type != VariableType::Placeholder {
            return Ok(());
        }
        if let Some(expected) = &self.shape {
            let actual = value.shape();
            let matches = expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(&actual)
                    .all(|(&e, &a)| e == UNKNOWN_DIM || e == a as i64);
            if !matches {
                return Err(GraphError::PlaceholderShape {
                    name: self.name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// A named node applying one [`OpKind`] to its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub(crate) name: String,
    pub(crate) kind: OpKind,
    pub(crate) inputs: Vec<VarId>,
    pub(crate) outputs: Vec<VarId>,
}

impl Operation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }
}

/// Serialized form of a graph; the name indexes are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GraphDef {
    variables: Vec<Variable>,
    ops: Vec<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDef", into = "GraphDef")]
pub struct Graph {
    pub(crate) variables: Vec<Variable>,
    pub(crate) ops: Vec<Operation>,
    names: HashMap<String, VarId>,
    op_names: HashSet<String>,
}

impl TryFrom<GraphDef> for Graph {
    type Error = GraphError;

    fn try_from(def: GraphDef) -> GraphResult<Self> {
        let mut graph = Graph {
            variables: def.variables,
            ops: def.ops,
            names: HashMap::new(),
            op_names: HashSet::new(),
        };
        graph.validate()?;
        graph.reindex();
        Ok(graph)
    }
}

impl From<Graph> for GraphDef {
    fn from(graph: Graph) -> Self {
        GraphDef {
            variables: graph.variables,
            ops: graph.ops,
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the invariants `add_variable` and `add_op` maintain. Bodies of
    /// control flow ops are checked when they are themselves deserialized.
    fn validate(&self) -> GraphResult<()> {
        let malformed = |message: String| Err(GraphError::Malformed(message));
        let mut names = HashSet::new();
        for (index, var) in self.variables.iter().enumerate() {
            if var.id != index {
                return malformed(format!("variable \"{}\" has id {} at position {}", var.name, var.id, index));
            }
            if !names.insert(var.name.as_str()) {
                return malformed(format!("variable name \"{}\" is used twice", var.name));
            }
            let computed = var.var_type == VariableType::Array;
            let leaf_only = matches!(
                var.var_type,
                VariableType::Placeholder | VariableType::Constant | VariableType::Variable
            );
            match var.producer {
                Some(op_index) if leaf_only => {
                    return malformed(format!("{} \"{}\" names producer op {}", var.var_type, var.name, op_index))
                }
                Some(op_index) if self.ops.get(op_index).map_or(true, |op| !op.outputs.contains(&index)) => {
                    return malformed(format!("variable \"{}\" is not an output of op {}", var.name, op_index))
                }
                None if computed => return malformed(format!("ARRAY \"{}\" has no producer", var.name)),
                _ => {}
            }
        }

        let mut op_names = HashSet::new();
        for (index, op) in self.ops.iter().enumerate() {
            if !op_names.insert(op.name.as_str()) {
                return malformed(format!("op name \"{}\" is used twice", op.name));
            }
            if let Some(expected) = op.kind.arity() {
                if op.inputs.len() != expected {
                    return malformed(format!(
                        "op \"{}\" has {} input(s), {} takes {}",
                        op.name,
                        op.inputs.len(),
                        op.kind.type_name(),
                        expected
                    ));
                }
            }
            for &id in &op.inputs {
                match self.variables.get(id) {
                    None => return malformed(format!("op \"{}\" reads unknown variable id {}", op.name, id)),
                    Some(var) if var.producer.map_or(false, |p| p >= index) => {
                        return malformed(format!("op \"{}\" reads \"{}\" before it is computed", op.name, var.name))
                    }
                    Some(_) => {}
                }
            }
            for &id in &op.outputs {
                if self.variables.get(id).and_then(|v| v.producer) != Some(index) {
                    return malformed(format!("op \"{}\" lists output id {} it does not produce", op.name, id));
                }
            }
            for (role, body) in op.kind.sub_graphs() {
                if let Some(missing) = body
                    .inputs
                    .iter()
                    .chain(&body.outputs)
                    .find(|name| !body.graph.has_variable(name))
                {
                    return malformed(format!("{} body of \"{}\" has no variable \"{}\"", role, op.name, missing));
                }
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.names = self.variables.iter().map(|v| (v.name.clone(), v.id)).collect();
        self.op_names = self.ops.iter().map(|op| op.name.clone()).collect();
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn variable(&self, id: VarId) -> GraphResult<&Variable> {
        self.variables.get(id).ok_or(GraphError::UnknownVariableId(id))
    }

    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.names.get(name).map(|&id| &self.variables[id])
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn id_of(&self, name: &str) -> GraphResult<VarId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownVariable(name.to_string()))
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// `base`, or `base_<n>` with the smallest free `n`.
    pub fn unique_name(&self, base: &str) -> String {
        let taken = |name: &str| self.names.contains_key(name) || self.op_names.contains(name);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Registers a leaf variable. Constants and variables take their shape from `array`.
    pub fn add_variable(
        &mut self,
        name: &str,
        var_type: VariableType,
        dtype: DType,
        shape: Option<Vec<i64>>,
        array: Option<Value>,
    ) -> GraphResult<VarId> {
        if self.names.contains_key(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        if let Some(array) = &array {
            if array.dtype() != dtype {
                return Err(GraphError::DTypeMismatch {
                    name: name.to_string(),
                    expected: dtype,
                    actual: array.dtype(),
                });
            }
        }
        let shape = match (&array, var_type) {
            (Some(array), VariableType::Constant | VariableType::Variable) => {
                Some(array.shape().into_iter().map(|d| d as i64).collect())
            }
            (_, VariableType::Sequence) => None,
            _ => shape,
        };
        let id = self.variables.len();
        self.variables.push(Variable {
            id,
            name: name.to_string(),
            var_type,
            dtype,
            shape,
            array,
            producer: None,
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_placeholder(&mut self, name: &str, dtype: DType, shape: Option<Vec<i64>>) -> GraphResult<VarId> {
        self.add_variable(name, VariableType::Placeholder, dtype, shape, None)
    }

    /// Appends an op. Output variables are named after the op (`name`,
    /// `name:1`, `name:2`, ...); without an explicit name the op type is used.
    pub fn add_op(&mut self, name: Option<&str>, kind: OpKind, inputs: &[VarId]) -> GraphResult<Vec<VarId>> {
        for &id in inputs {
            self.variable(id)?;
        }
        let op_name = match name {
            Some(name) => {
                if self.names.contains_key(name) || self.op_names.contains(name) {
                    return Err(GraphError::DuplicateName(name.to_string()));
                }
                name.to_string()
            }
            None => self.unique_name(kind.type_name()),
        };
        let metas: Vec<TensorMeta> = inputs.iter().map(|&id| self.variables[id].meta()).collect();
        let inferred = ShapeInference::infer_op(&kind, &metas).map_err(|source| GraphError::Inference {
            op: op_name.clone(),
            source,
        })?;

        let output_names: Vec<String> = (0..inferred.len())
            .map(|k| if k == 0 { op_name.clone() } else { format!("{}:{}", op_name, k) })
            .collect();
        if let Some(taken) = output_names.iter().find(|n| self.names.contains_key(n.as_str())) {
            return Err(GraphError::DuplicateName(taken.clone()));
        }

        let op_index = self.ops.len();
        let mut outputs = Vec::with_capacity(inferred.len());
        for (var_name, meta) in output_names.into_iter().zip(inferred) {
            let id = self.variables.len();
            let var_type = if meta.is_sequence {
                VariableType::Sequence
            } else {
                VariableType::Array
            };
            self.variables.push(Variable {
                id,
                name: var_name.clone(),
                var_type,
                dtype: meta.dtype,
                shape: meta.shape,
                array: None,
                producer: Some(op_index),
            });
            self.names.insert(var_name, id);
            outputs.push(id);
        }
        self.op_names.insert(op_name.clone());
        self.ops.push(Operation {
            name: op_name,
            kind,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    /// Renames a variable. Ops reference variables by id, so no op is touched.
    pub fn rename_variable(&mut self, from: &str, to: &str) -> GraphResult<()> {
        if from == to {
            return Ok(());
        }
        let id = self.id_of(from)?;
        let own_op = self.variables[id].producer.map_or(false, |p| self.ops[p].name == to);
        if self.names.contains_key(to) || (self.op_names.contains(to) && !own_op) {
            return Err(GraphError::DuplicateName(to.to_string()));
        }
        self.names.remove(from);
        self.names.insert(to.to_string(), id);
        self.variables[id].name = to.to_string();
        Ok(())
    }

    /// Stores an array on a leaf variable. Placeholder arrays act as defaults
    /// and are validated against the declared shape.
    pub fn set_array(&mut self, name: &str, value: Value) -> GraphResult<()> {
        let id = self.id_of(name)?;
        let var = &self.variables[id];
        match var.var_type {
            VariableType::Array => {
                return Err(GraphError::NotSettable {
                    name: name.to_string(),
                    var_type: var.var_type,
                })
            }
            VariableType::Placeholder | VariableType::Sequence => var.validate_binding(&value)?,
            VariableType::Constant | VariableType::Variable => {
                if value.dtype() != var.dtype {
                    return Err(GraphError::DTypeMismatch {
                        name: name.to_string(),
                        expected: var.dtype,
                        actual: value.dtype(),
                    });
                }
            }
        }
        let var = &mut self.variables[id];
        if matches!(var.var_type, VariableType::Constant | VariableType::Variable) {
            var.shape = Some(value.shape().into_iter().map(|d| d as i64).collect());
        }
        var.array = Some(value);
        Ok(())
    }

    pub fn array(&self, name: &str) -> Option<&Value> {
        self.get_variable(name).and_then(Variable::array)
    }

    pub(crate) fn array_mut(&mut self, id: VarId) -> Option<&mut Value> {
        self.variables.get_mut(id).and_then(|v| v.array.as_mut())
    }

    /// Turns a trainable variable, or a placeholder holding an array, into a constant.
    pub fn convert_to_constant(&mut self, name: &str) -> GraphResult<()> {
        let id = self.id_of(name)?;
        let var = &mut self.variables[id];
        let convertible = matches!(var.var_type, VariableType::Variable | VariableType::Constant)
            || (var.var_type == VariableType::Placeholder && var.array.is_some());
        if !convertible {
            return Err(GraphError::InvalidConversion {
                name: name.to_string(),
                from: var.var_type,
                to: VariableType::Constant,
            });
        }
        var.var_type = VariableType::Constant;
        Ok(())
    }

    /// Turns a constant into a trainable variable.
    pub fn convert_to_variable(&mut self, name: &str) -> GraphResult<()> {
        let id = self.id_of(name)?;
        let var = &mut self.variables[id];
        let convertible = matches!(var.var_type, VariableType::Constant | VariableType::Variable) && var.dtype.is_floating_point();
        if !convertible {
            return Err(GraphError::InvalidConversion {
                name: name.to_string(),
                from: var.var_type,
                to: VariableType::Variable,
            });
        }
        var.var_type = VariableType::Variable;
        Ok(())
    }

    /// Changes the dtype of leaf variables (casting their arrays) and
    /// re-infers the dtype of every computed variable. All-or-nothing.
    pub fn convert_data_types(&mut self, dtypes: &HashMap<String, DType>) -> GraphResult<()> {
        let mut converted = self.clone();
        for (name, &dtype) in dtypes {
            let id = converted.id_of(name)?;
            let var = &mut converted.variables[id];
            if !matches!(
                var.var_type,
                VariableType::Placeholder | VariableType::Constant | VariableType::Variable
            ) {
                return Err(GraphError::DerivedDType(name.clone()));
            }
            var.dtype = dtype;
            var.array = var.array.take().map(|a| a.cast(dtype));
        }
        ShapeInference::run(&mut converted)?;
        *self = converted;
        Ok(())
    }

    /// Ops needed to compute `targets` (ascending, i.e. in execution order)
    /// and the leaf variables they read.
    pub fn required(&self, targets: &[VarId]) -> (Vec<usize>, BTreeSet<VarId>) {
        let mut ops = BTreeSet::new();
        let mut leaves = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<VarId> = targets.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            match self.variables[id].producer {
                Some(op_index) => {
                    if ops.insert(op_index) {
                        stack.extend(self.ops[op_index].inputs.iter().copied());
                    }
                }
                None => {
                    leaves.insert(id);
                }
            }
        }
        (ops.into_iter().collect(), leaves)
    }

    /// Computed variables that no op consumes.
    pub fn output_variables(&self) -> Vec<VarId> {
        let consumed: HashSet<VarId> = self.ops.iter().flat_map(|op| op.inputs.iter().copied()).collect();
        self.variables
            .iter()
            .filter(|v| v.var_type == VariableType::Array && !consumed.contains(&v.id))
            .map(|v| v.id)
            .collect()
    }

    /// Floating point VARIABLEs, the parameters an updater trains.
    pub fn trainable_variables(&self) -> Vec<VarId> {
        self.variables
            .iter()
            .filter(|v| v.var_type == VariableType::Variable && v.dtype.is_floating_point())
            .map(|v| v.id)
            .collect()
    }

    pub fn variables_of_type(&self, var_type: VariableType) -> Vec<VarId> {
        self.variables
            .iter()
            .filter(|v| v.var_type == var_type)
            .map(|v| v.id)
            .collect()
    }

    /// Human readable table of variables and ops.
    pub fn summary(&self) -> String {
        let mut consumers: HashMap<VarId, Vec<&str>> = HashMap::new();
        for op in &self.ops {
            for &input in &op.inputs {
                consumers.entry(input).or_default().push(&op.name);
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "--- Summary ---");
        let _ = writeln!(out, "Variables:   {}", self.variables.len());
        for var_type in [
            VariableType::Placeholder,
            VariableType::Constant,
            VariableType::Variable,
            VariableType::Array,
            VariableType::Sequence,
        ] {
            let count = self.variables_of_type(var_type).len();
            if count > 0 {
                let _ = writeln!(out, "  {:<12} {}", var_type.to_string(), count);
            }
        }
        let _ = writeln!(out, "Ops:         {}", self.ops.len());
        let _ = writeln!(out);
        let _ = writeln!(out, "--- Variables ---");
        let _ = writeln!(
            out,
            "{:<24} {:<12} {:<8} {:<16} {:<20} {}",
            "Name", "Type", "DType", "Shape", "Output of", "Inputs to"
        );
        for v in &self.variables {
            let shape = v.shape.as_ref().map_or_else(|| "?".to_string(), |s| format!("{:?}", s));
            let producer = v.producer.map_or("-", |i| self.ops[i].name.as_str());
            let used_by = consumers.get(&v.id).map_or_else(|| "-".to_string(), |c| c.join(", "));
            let _ = writeln!(
                out,
                "{:<24} {:<12} {:<8} {:<16} {:<20} {}",
                v.name,
                v.var_type.to_string(),
                v.dtype.to_string(),
                shape,
                producer,
                used_by
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "--- Ops ---");
        let _ = writeln!(out, "{:<24} {:<16} {:<32} {}", "Name", "Type", "Inputs", "Outputs");
        for op in &self.ops {
            let names = |ids: &[VarId]| {
                ids.iter()
                    .map(|&id| self.variables[id].name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = writeln!(
                out,
                "{:<24} {:<16} {:<32} {}",
                op.name,
                op.kind.type_name(),
                format!("[{}]", names(&op.inputs)),
                format!("[{}]", names(&op.outputs))
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_array(shape: &[usize], data: Vec<f32>) -> Value {
        Value::from_f32(shape, data).unwrap()
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut g = Graph::new();
        g.add_placeholder("in", DType::F32, Some(vec![-1, 3])).unwrap();
        let err = g.add_placeholder("in", DType::F32, None).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn ops_get_unique_names() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F32, Some(vec![2])).unwrap();
        let first = g.add_op(None, OpKind::Exp, &[a]).unwrap();
        let second = g.add_op(None, OpKind::Exp, &[a]).unwrap();
        assert_eq!(g.variable(first[0]).unwrap().name(), "exp");
        assert_eq!(g.variable(second[0]).unwrap().name(), "exp_1");
        assert_eq!(g.variable(second[0]).unwrap().producer(), Some(1));
    }

    #[test]
    fn required_prunes_unrelated_ops() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F32, Some(vec![2])).unwrap();
        let b = g.add_placeholder("b", DType::F32, Some(vec![2])).unwrap();
        let exp = g.add_op(None, OpKind::Exp, &[a]).unwrap()[0];
        let _unused = g.add_op(None, OpKind::Neg, &[b]).unwrap();
        let (ops, leaves) = g.required(&[exp]);
        assert_eq!(ops, vec![0]);
        assert_eq!(leaves.into_iter().collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn rename_keeps_ids() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F32, None).unwrap();
        g.rename_variable("a", "input").unwrap();
        assert_eq!(g.id_of("input").unwrap(), a);
        assert!(!g.has_variable("a"));
    }

    #[test]
    fn placeholder_arrays_are_shape_checked() {
        let mut g = Graph::new();
        g.add_placeholder("in", DType::F32, Some(vec![-1, 3])).unwrap();
        g.set_array("in", f32_array(&[5, 3], vec![0.0; 15])).unwrap();
        let err = g.set_array("in", f32_array(&[5, 4], vec![0.0; 20])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("in") && message.contains("[-1, 3]") && message.contains("[5, 4]"));
    }

    #[test]
    fn convert_data_types_reinfers_arrays() {
        let mut g = Graph::new();
        let w = g
            .add_variable("w", VariableType::Variable, DType::F32, None, Some(f32_array(&[2], vec![1.0, 2.0])))
            .unwrap();
        let out = g.add_op(None, OpKind::Square, &[w]).unwrap()[0];
        let mut map = HashMap::new();
        map.insert("w".to_string(), DType::F64);
        g.convert_data_types(&map).unwrap();
        assert_eq!(g.variable(out).unwrap().dtype(), DType::F64);
        assert_eq!(g.array("w").unwrap().dtype(), DType::F64);
    }

    #[test]
    fn graph_json_round_trip_rebuilds_index() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F64, Some(vec![2, 2])).unwrap();
        g.add_op(Some("t"), OpKind::Transpose { perm: None }, &[a]).unwrap();
        let json = serde_json::to_string(&g).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id_of("t").unwrap(), 1);
        assert_eq!(back, g);
    }

    fn tampered(g: &Graph, edit: impl FnOnce(&mut serde_json::Value)) -> String {
        let mut json = serde_json::to_value(g).unwrap();
        edit(&mut json);
        serde_json::from_value::<Graph>(json).unwrap_err().to_string()
    }

    #[test]
    fn malformed_descriptions_are_rejected() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F64, Some(vec![2])).unwrap();
        let e = g.add_op(Some("e"), OpKind::Exp, &[a]).unwrap()[0];
        g.add_op(Some("n"), OpKind::Neg, &[e]).unwrap();

        let err = tampered(&g, |j| j["ops"][0]["inputs"][0] = 7.into());
        assert!(err.contains("unknown variable id 7"), "{err}");
        let err = tampered(&g, |j| j["ops"][0]["inputs"][0] = 2.into());
        assert!(err.contains("before it is computed"), "{err}");
        let err = tampered(&g, |j| j["variables"][1]["id"] = 0.into());
        assert!(err.contains("has id 0 at position 1"), "{err}");
        let err = tampered(&g, |j| j["variables"][2]["producer"] = 9.into());
        assert!(err.contains("not an output of op 9"), "{err}");
        let err = tampered(&g, |j| j["variables"][2]["name"] = "e".into());
        assert!(err.contains("used twice"), "{err}");
        let err = tampered(&g, |j| {
            j["ops"][1]["inputs"].as_array_mut().unwrap().push(0.into());
        });
        assert!(err.contains("takes 1"), "{err}");
    }

    #[test]
    fn rename_onto_an_op_name_is_rejected() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F64, None).unwrap();
        g.add_op(Some("first"), OpKind::Exp, &[a]).unwrap();
        let second = g.add_op(Some("second"), OpKind::Neg, &[a]).unwrap()[0];
        g.rename_variable("first", "out").unwrap();

        let err = g.rename_variable("second", "first").unwrap_err();
        assert_eq!(err, GraphError::DuplicateName("first".to_string()));
        g.rename_variable("out", "first").unwrap();
        assert_eq!(g.variable(second).unwrap().name(), "second");
    }

    #[test]
    fn summary_counts_variables_by_type() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F32, Some(vec![2])).unwrap();
        g.add_variable("w", VariableType::Variable, DType::F32, None, Some(f32_array(&[2], vec![1.0, 2.0])))
            .unwrap();
        g.add_op(None, OpKind::Exp, &[a]).unwrap();
        assert_eq!(g.variables_of_type(VariableType::Placeholder), vec![a]);
        assert!(g.variables_of_type(VariableType::Constant).is_empty());

        let summary = g.summary();
        assert!(summary.contains("PLACEHOLDER  1"), "{summary}");
        assert!(summary.contains("ARRAY        1"), "{summary}");
        assert!(!summary.contains("CONSTANT     "), "{summary}");
    }
}
