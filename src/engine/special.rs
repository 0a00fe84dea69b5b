use log::debug;

use super::depend::DependStatus;
use super::{EngineError, SymbolEngine};
use crate::graph::{CallKind, CalledFunction, FunctionId, Graph, NodeId};
use crate::op_registry::OpRegistry;
use crate::value::{prim, Primitive, Value};

/// An apply node whose callee is computed by another node.
///
/// These are matched against known structures when depend statuses are
/// computed. When their symbols are built, they are treated as an apply of a
/// pseudo-primitive to inputs taken from elsewhere in the graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpecialNode {
    /// `Switch(cond, on_true, on_false)(..)`, where the branches are function
    /// references or partial applications.
    ControlFlowJoin { switch: NodeId },

    /// `TupleGetItem(J(f)(args..), 1)(..)`, which calls the function produced
    /// by a `J` transform.
    JFuncCaller { call_j: NodeId },

    /// A special node with an unrecognized structure.
    Unsupported,
}

impl SpecialNode {
    /// Match `node` against the known special structures, in order.
    pub fn match_node(graph: &Graph, node: NodeId) -> SpecialNode {
        let Some(&callee) = graph.node(node).inputs().and_then(|inputs| inputs.first()) else {
            return SpecialNode::Unsupported;
        };

        if graph.is_primitive_apply(callee, prim::SWITCH)
            && graph.node(callee).inputs().map(|i| i.len()) == Some(4)
        {
            return SpecialNode::ControlFlowJoin { switch: callee };
        }

        if let Some(call_j) = match_j_func_caller(graph, callee) {
            return SpecialNode::JFuncCaller { call_j };
        }

        debug!("Special node {} is not supported", graph.node_name(node));
        SpecialNode::Unsupported
    }

    /// Propagate the status of the special node `node` to the nodes its
    /// symbols are built from.
    pub(super) fn set_depend_status(
        &self,
        engine: &mut SymbolEngine,
        graph: &Graph,
        node: NodeId,
        status: DependStatus,
        registry: &OpRegistry,
    ) {
        match *self {
            SpecialNode::ControlFlowJoin { switch } => {
                let &[_, cond, on_true, on_false] = switch_inputs(graph, switch) else {
                    return;
                };
                engine.add_depend_status(cond, DependStatus::VALUE);
                for branch in [on_true, on_false] {
                    if let Some(function) = graph.function_ref(branch) {
                        let called = branch_call(function);
                        engine.pre_build_call(graph, node, &called, status, registry);
                    } else if graph.is_primitive_apply(branch, prim::PARTIAL) {
                        engine.add_depend_status(branch, status);
                    }
                }
            }
            SpecialNode::JFuncCaller { call_j } => {
                let args = graph
                    .node(call_j)
                    .inputs()
                    .map(|inputs| inputs[1..].to_vec())
                    .unwrap_or_default();
                for arg in args {
                    engine.add_depend_status(arg, status);
                }
            }
            SpecialNode::Unsupported => {}
        }
    }

    /// Return the pseudo-primitive to build the special node `node` with, and
    /// the nodes whose abstracts are its inputs.
    ///
    /// Returns `None` if the node's inputs cannot be resolved.
    pub(super) fn extract_inputs(
        &self,
        engine: &mut SymbolEngine,
        graph: &mut Graph,
        node: NodeId,
        registry: &OpRegistry,
    ) -> Result<Option<(Primitive, Vec<NodeId>)>, EngineError> {
        match *self {
            SpecialNode::ControlFlowJoin { switch } => {
                let &[_, cond, on_true, on_false] = switch_inputs(graph, switch) else {
                    return Ok(None);
                };
                let mut inputs = vec![cond];
                for branch in [on_true, on_false] {
                    match branch_output(engine, graph, node, branch, registry)? {
                        Some(output) => inputs.push(output),
                        None => return Ok(None),
                    }
                }
                Ok(Some((Primitive::new(prim::CONTROL_FLOW_JOIN), inputs)))
            }
            SpecialNode::JFuncCaller { call_j } => {
                let args = graph
                    .node(call_j)
                    .inputs()
                    .map(|inputs| inputs[1..].to_vec())
                    .unwrap_or_default();
                Ok(Some((Primitive::new(prim::J_FUNC_CALLER), args)))
            }
            SpecialNode::Unsupported => Ok(None),
        }
    }
}

fn switch_inputs(graph: &Graph, switch: NodeId) -> &[NodeId] {
    graph.node(switch).inputs().unwrap_or_default()
}

/// Return the `J(f)(args..)` node if `callee` is `TupleGetItem(J(f)(args..), 1)`.
fn match_j_func_caller(graph: &Graph, callee: NodeId) -> Option<NodeId> {
    if !graph.is_primitive_apply(callee, prim::TUPLE_GET_ITEM) {
        return None;
    }
    let &[_, call_j, index] = graph.node(callee).inputs()? else {
        return None;
    };
    if graph.node(index).as_constant() != Some(&Value::Int(1)) {
        return None;
    }
    let j = *graph.node(call_j).inputs()?.first()?;
    graph.is_primitive_apply(j, prim::J).then_some(call_j)
}

/// Return how the join node of a conditional calls a branch which is a
/// function reference. The join's inputs after the switch are the branch's
/// arguments.
fn branch_call(function: FunctionId) -> CalledFunction {
    CalledFunction {
        function,
        first_arg: 1,
        kind: CallKind::Branch,
    }
}

/// Return the node which produces the output of a conditional branch, building
/// the branch's function first if needed.
fn branch_output(
    engine: &mut SymbolEngine,
    graph: &mut Graph,
    join: NodeId,
    branch: NodeId,
    registry: &OpRegistry,
) -> Result<Option<NodeId>, EngineError> {
    let function = if let Some(function) = graph.function_ref(branch) {
        engine.build_subgraph(graph, join, &branch_call(function), registry)?;
        function
    } else if let Some(called) = graph
        .called_function(branch)
        .filter(|called| called.kind == CallKind::Partial)
    {
        // The partial application is an input of the switch, so its function
        // was built before this node.
        called.function
    } else {
        return Ok(None);
    };
    Ok(graph.function(function).output())
}
