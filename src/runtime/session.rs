//! Graph execution: placeholder binding, dependency pruning, op scheduling
//! and control flow evaluation.
//!
//! Only the ops needed for the requested outputs are run, in insertion order.
//! Every leaf is resolved before the first op executes, so a missing
//! placeholder is reported without doing any work.

use super::backend::{Backend, RuntimeError};
use crate::graph::{Graph, GraphError, OpKind, Operation, SubGraph, Value, VarId, VariableType};
use crate::train::listeners::Listener;
use std::collections::HashMap;
use tracing::{debug, trace};

type Result<T> = std::result::Result<T, RuntimeError>;

/// Values computed during one execution, keyed by variable id.
pub type Memo = HashMap<VarId, Value>;

pub struct InferenceSession<'a> {
    backend: &'a dyn Backend,
    listeners: &'a mut [Box<dyn Listener>],
}

impl<'a> InferenceSession<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            listeners: &mut [],
        }
    }

    /// A session that reports every executed op to `listeners`.
    pub fn with_listeners(backend: &'a dyn Backend, listeners: &'a mut [Box<dyn Listener>]) -> Self {
        Self { backend, listeners }
    }

    /// Computes `targets`, returning every value produced along the way
    /// (including the leaves that were read).
    pub fn execute(&mut self, graph: &Graph, placeholders: &HashMap<String, Value>, targets: &[VarId]) -> Result<Memo> {
        for name in placeholders.keys() {
            let var = graph
                .get_variable(name)
                .ok_or_else(|| GraphError::UnknownVariable(name.clone()))?;
            if !matches!(var.var_type(), VariableType::Placeholder | VariableType::Sequence) {
                return Err(RuntimeError::NotAPlaceholder(name.clone()));
            }
        }
        for &id in targets {
            graph.variable(id)?;
        }

        let (ops, leaves) = graph.required(targets);
        let mut memo = Memo::with_capacity(leaves.len() + ops.len());
        for id in leaves {
            let var = graph.variable(id)?;
            let value = match var.var_type() {
                VariableType::Placeholder | VariableType::Sequence => match placeholders.get(var.name()) {
                    Some(value) => {
                        var.validate_binding(value)?;
                        value.clone()
                    }
                    None => var
                        .array()
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingPlaceholder(var.name().to_string()))?,
                },
                VariableType::Constant | VariableType::Variable | VariableType::Array => var
                    .array()
                    .cloned()
                    .ok_or_else(|| RuntimeError::MissingArray(var.name().to_string()))?,
            };
            memo.insert(id, value);
        }

        for op_index in ops {
            let op = &graph.ops()[op_index];
            let inputs = op
                .inputs()
                .iter()
                .map(|id| {
                    memo.get(id)
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingArray(graph.variables()[*id].name().to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let outputs = match op.kind() {
                OpKind::If {
                    cond,
                    then_branch,
                    else_branch,
                } => self.run_if(op, cond, then_branch, else_branch, inputs)?,
                OpKind::While {
                    cond,
                    body,
                    max_iterations,
                } => self.run_while(op, cond, body, *max_iterations, inputs)?,
                kind => self.backend.execute(kind, &inputs)?,
            };
            if outputs.len() != op.outputs().len() {
                return Err(RuntimeError::ShapeError {
                    op: op.name().to_string(),
                    message: format!("produced {} output(s), expected {}", outputs.len(), op.outputs().len()),
                });
            }
            trace!(op = op.name(), backend = self.backend.name(), "executed op");
            for listener in self.listeners.iter_mut() {
                listener.op_executed(op, &outputs);
            }
            for (&id, value) in op.outputs().iter().zip(outputs) {
                memo.insert(id, value);
            }
        }
        Ok(memo)
    }

    /// Computes the named variables.
    pub fn output(
        &mut self,
        graph: &Graph,
        placeholders: &HashMap<String, Value>,
        outputs: &[String],
    ) -> Result<HashMap<String, Value>> {
        let ids = outputs
            .iter()
            .map(|name| graph.id_of(name))
            .collect::<std::result::Result<Vec<_>, GraphError>>()?;
        let memo = self.execute(graph, placeholders, &ids)?;
        Ok(outputs
            .iter()
            .zip(ids)
            .filter_map(|(name, id)| memo.get(&id).map(|v| (name.clone(), v.clone())))
            .collect())
    }

    fn run_subgraph(&mut self, body: &SubGraph, inputs: Vec<Value>) -> Result<Vec<Value>> {
        let bindings: HashMap<String, Value> = body.inputs.iter().cloned().zip(inputs).collect();
        let ids = body
            .outputs
            .iter()
            .map(|name| body.graph.id_of(name))
            .collect::<std::result::Result<Vec<_>, GraphError>>()?;
        let memo = self.execute(&body.graph, &bindings, &ids)?;
        ids.iter()
            .map(|id| {
                memo.get(id)
                    .cloned()
                    .ok_or_else(|| RuntimeError::MissingArray(body.graph.variables()[*id].name().to_string()))
            })
            .collect()
    }

    fn predicate(&mut self, op: &Operation, cond: &SubGraph, inputs: &[Value]) -> Result<bool> {
        let outputs = self.run_subgraph(cond, inputs.to_vec())?;
        outputs
            .first()
            .and_then(Value::as_predicate)
            .ok_or_else(|| RuntimeError::InvalidPredicate(op.name().to_string()))
    }

    fn run_if(
        &mut self,
        op: &Operation,
        cond: &SubGraph,
        then_branch: &SubGraph,
        else_branch: &SubGraph,
        inputs: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let predicate = self.predicate(op, cond, &inputs)?;
        debug!(op = op.name(), predicate, "conditional branch selected");
        let branch = if predicate { then_branch } else { else_branch };
        self.run_subgraph(branch, inputs)
    }

    fn run_while(
        &mut self,
        op: &Operation,
        cond: &SubGraph,
        body: &SubGraph,
        max_iterations: Option<usize>,
        inputs: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let mut values = inputs;
        let mut iterations = 0usize;
        while self.predicate(op, cond, &values)? {
            if let Some(limit) = max_iterations {
                if iterations >= limit {
                    return Err(RuntimeError::LoopLimitExceeded {
                        op: op.name().to_string(),
                        limit,
                    });
                }
            }
            values = self.run_subgraph(body, values)?;
            iterations += 1;
        }
        debug!(op = op.name(), iterations, "loop finished");
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DType;
    use crate::runtime::cpu_backend::CpuBackend;

    #[test]
    fn missing_placeholder_is_reported_before_execution() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F32, Some(vec![2])).unwrap();
        let out = g.add_op(None, OpKind::Exp, &[a]).unwrap()[0];
        let backend = CpuBackend;
        let err = InferenceSession::new(&backend)
            .execute(&g, &HashMap::new(), &[out])
            .unwrap_err();
        assert_eq!(err, RuntimeError::MissingPlaceholder("a".to_string()));
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn unrelated_placeholders_are_not_required() {
        let mut g = Graph::new();
        let a = g.add_placeholder("a", DType::F64, Some(vec![2])).unwrap();
        let b = g.add_placeholder("b", DType::F64, Some(vec![2])).unwrap();
        let out = g.add_op(Some("out"), OpKind::Square, &[a]).unwrap()[0];
        g.add_op(None, OpKind::Neg, &[b]).unwrap();
        let mut feed = HashMap::new();
        feed.insert("a".to_string(), Value::from_f64(&[2], vec![2.0, 3.0]).unwrap());
        let backend = CpuBackend;
        let memo = InferenceSession::new(&backend).execute(&g, &feed, &[out]).unwrap();
        assert_eq!(memo[&out], Value::from_f64(&[2], vec![4.0, 9.0]).unwrap());
    }

    #[test]
    fn placeholder_shape_is_validated_at_binding() {
        let mut g = Graph::new();
        let a = g.add_placeholder("in", DType::F32, Some(vec![-1, 3])).unwrap();
        let mut feed = HashMap::new();
        feed.insert("in".to_string(), Value::zeros(DType::F32, &[2, 4]));
        let backend = CpuBackend;
        let err = InferenceSession::new(&backend).execute(&g, &feed, &[a]).unwrap_err();
        assert!(matches!(err, RuntimeError::Graph(GraphError::PlaceholderShape { .. })));
    }
}
