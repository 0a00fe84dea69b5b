//! Computation graph IR.
//!
//! A [`Graph`] is an arena of nodes grouped into functions. Each function has
//! parameters and an output node. Functions call each other through function
//! constants, partial applications and fused kernel packets.

// The std HashMap/HashSet provide DOS resistance. In this module hash keys are
// `NodeId`s which we allocate ourselves, so this is not a concern.
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

mod builder;
mod node;
mod node_id;

pub use builder::FunctionBuilder;
pub use node::{KernelInfo, Node, NodeKind};
pub use node_id::{FunctionId, NodeId};

use crate::abstract_value::AbstractValue;
use crate::value::{prim, Primitive, Value};

/// Errors reported by graph transformations.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("output node {0} is not part of the extracted nodes")]
    OutputNotExtracted(String),
    #[error("node {0} refers to a function and cannot be extracted")]
    CapturesFunction(String),
    #[error("node {node} has no input {index}")]
    InvalidInput { node: String, index: usize },
}

/// A sub-graph with parameters and an output.
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    params: Vec<NodeId>,
    output: Option<NodeId>,
    kernel_packet: bool,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[NodeId] {
        &self.params
    }

    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    /// Return true if this function is a fused cluster of shape computations.
    pub fn is_kernel_packet(&self) -> bool {
        self.kernel_packet
    }

    pub fn set_kernel_packet(&mut self, kernel_packet: bool) {
        self.kernel_packet = kernel_packet;
    }
}

/// Which edges [`Graph::topo_sort`] follows from a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Successors {
    /// The inputs of apply nodes.
    Incoming,
    /// The inputs of apply nodes, plus the parameters and output of functions
    /// referenced by constants.
    Deeper,
}

/// Decision returned by the predicate passed to [`Graph::topo_sort`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Include {
    /// Include the node and visit its successors.
    Follow,
    /// Include the node but not its successors.
    NoFollow,
    /// Skip the node.
    Exclude,
}

/// How an apply node invokes a function.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// A direct call `f(args..)`.
    Call,
    /// A partial application `Partial(f, args..)`.
    Partial,
    /// A `KernelPacket` primitive wrapping a fused function.
    KernelPacket,
    /// A branch of a conditional. The node which applies the `Switch` passes
    /// its arguments to the branch.
    Branch,
}

impl CallKind {
    /// Return true if the calling node produces the function's output.
    pub fn copies_output(self) -> bool {
        matches!(self, CallKind::Call | CallKind::KernelPacket)
    }
}

/// Function invoked by an apply node, and where its arguments start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CalledFunction {
    pub function: FunctionId,

    /// Index of the first argument in the apply node's inputs.
    pub first_arg: usize,

    pub kind: CallKind,
}

/// Result of [`Graph::extract`].
pub struct Extracted {
    pub graph: Graph,
    pub function: FunctionId,

    /// Nodes of the source graph which correspond to the parameters of the
    /// extracted function, in order.
    pub inputs: Vec<NodeId>,
}

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    functions: Vec<Option<Function>>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Add an empty function to the graph.
    pub fn add_function(&mut self, name: &str) -> FunctionId {
        self.functions.push(Some(Function {
            name: name.to_string(),
            params: Vec::new(),
            output: None,
            kernel_packet: false,
        }));
        FunctionId::from_index(self.functions.len() - 1)
    }

    fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId::from_index(self.nodes.len() - 1)
    }

    /// Append a parameter to a function.
    pub fn add_parameter(
        &mut self,
        function: FunctionId,
        name: Option<&str>,
        abs: AbstractValue,
    ) -> NodeId {
        let id = self.add_node(Node::new(name, function, NodeKind::Parameter, abs));
        self.function_mut(function).params.push(id);
        id
    }

    /// Add a constant node. Its abstract is derived from the value.
    pub fn add_constant(&mut self, function: FunctionId, value: Value) -> NodeId {
        let abs = AbstractValue::from_value(&value);
        self.add_node(Node::new(None, function, NodeKind::Constant(value), abs))
    }

    /// Add a node which applies `inputs[0]` to `inputs[1..]`.
    pub fn add_apply(
        &mut self,
        function: FunctionId,
        name: Option<&str>,
        inputs: &[NodeId],
        abs: AbstractValue,
    ) -> NodeId {
        self.add_node(Node::new(
            name,
            function,
            NodeKind::Apply(inputs.to_vec()),
            abs,
        ))
    }

    /// Add a node which applies a primitive to `args`.
    pub fn add_primitive_apply(
        &mut self,
        function: FunctionId,
        prim: Primitive,
        args: &[NodeId],
        abs: AbstractValue,
    ) -> NodeId {
        let callee = self.add_constant(function, prim.into());
        let mut inputs = vec![callee];
        inputs.extend_from_slice(args);
        self.add_apply(function, None, &inputs, abs)
    }

    /// Add a node which calls `callee` with `args`.
    pub fn add_call(
        &mut self,
        function: FunctionId,
        callee: FunctionId,
        args: &[NodeId],
        abs: AbstractValue,
    ) -> NodeId {
        let callee = self.add_constant(function, Value::Function(callee));
        let mut inputs = vec![callee];
        inputs.extend_from_slice(args);
        self.add_apply(function, None, &inputs, abs)
    }

    pub fn set_output(&mut self, function: FunctionId, output: NodeId) {
        self.function_mut(function).output = Some(output);
    }

    /// Retrieve a node by ID.
    ///
    /// Panics if the node does not exist.
    pub fn node(&self, id: NodeId) -> &Node {
        match self.get_node(id) {
            Some(node) => node,
            None => panic!("node {} does not exist", id),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.nodes.get_mut(id.as_usize()).and_then(|n| n.as_mut()) {
            Some(node) => node,
            None => panic!("node {} does not exist", id),
        }
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).and_then(|n| n.as_ref())
    }

    /// Return the debug name for a node.
    pub fn node_name(&self, id: NodeId) -> String {
        if let Some(name) = self.get_node(id).and_then(|node| node.name()) {
            return name.to_string();
        }
        match self.primitive_of(id) {
            Some(prim) => format!("{}_{}", prim.name(), id),
            None => format!("%{}", id),
        }
    }

    /// Retrieve a function by ID.
    ///
    /// Panics if the function does not exist.
    pub fn function(&self, id: FunctionId) -> &Function {
        match self.get_function(id) {
            Some(func) => func,
            None => panic!("function {} does not exist", id),
        }
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        match self.functions.get_mut(id.as_usize()).and_then(|f| f.as_mut()) {
            Some(func) => func,
            None => panic!("function {} does not exist", id),
        }
    }

    pub fn get_function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.as_usize()).and_then(|f| f.as_ref())
    }

    /// Return the IDs of all functions in the graph.
    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(i, _)| FunctionId::from_index(i))
    }

    /// Return the IDs of all nodes in the graph.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId::from_index(i))
    }

    /// Return the number of nodes in the graph.
    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Return the IDs of all nodes that belong to a function, including
    /// nodes which do not contribute to its output.
    pub fn function_nodes(&self, function: FunctionId) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| self.node(id).function() == function)
            .collect()
    }

    fn successors(&self, id: NodeId, successors: Successors) -> Vec<NodeId> {
        let node = self.node(id);
        match (node.kind(), successors) {
            (NodeKind::Apply(inputs), _) => inputs.clone(),
            (NodeKind::Constant(value), Successors::Deeper) => value
                .functions()
                .into_iter()
                .filter_map(|f| self.get_function(f))
                .flat_map(|f| f.params.iter().copied().chain(f.output))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Sort the nodes reachable from `roots` so that every node comes after
    /// the nodes it depends on.
    ///
    /// `include` decides for each node reached whether it is part of the
    /// result and whether its successors are visited.
    pub fn topo_sort(
        &self,
        roots: &[NodeId],
        successors: Successors,
        include: impl Fn(NodeId) -> Include,
    ) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = FxHashSet::default();

        // Stack of `(node, expanded)` entries. A node is added to the order
        // when it is popped the second time, after its successors.
        let mut stack: Vec<(NodeId, bool)> = roots.iter().rev().map(|&id| (id, false)).collect();
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            match include(id) {
                Include::Exclude => {}
                Include::NoFollow => order.push(id),
                Include::Follow => {
                    stack.push((id, true));
                    for succ in self.successors(id, successors).into_iter().rev() {
                        if !visited.contains(&succ) {
                            stack.push((succ, false));
                        }
                    }
                }
            }
        }
        order
    }

    /// Return the apply nodes that compute a function's output, in execution
    /// order.
    pub fn apply_nodes(&self, function: FunctionId) -> Vec<NodeId> {
        let Some(output) = self.function(function).output else {
            return Vec::new();
        };
        self.topo_sort(&[output], Successors::Incoming, |id| {
            if self.node(id).function() == function {
                Include::Follow
            } else {
                Include::Exclude
            }
        })
        .into_iter()
        .filter(|&id| self.node(id).is_apply())
        .collect()
    }

    /// Return the apply nodes which use `id` as an input.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&user| {
                self.node(user)
                    .inputs()
                    .is_some_and(|inputs| inputs.contains(&id))
            })
            .collect()
    }

    /// Return true if a node is the output of any function.
    pub fn is_function_output(&self, id: NodeId) -> bool {
        self.functions
            .iter()
            .flatten()
            .any(|f| f.output == Some(id))
    }

    /// Replace all uses of `old` with `new`.
    ///
    /// Returns true if any use was replaced.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut replaced = false;
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let Some(node) = node else {
                continue;
            };
            if i != new.as_usize() {
                replaced |= node.replace_input(old, new);
            }
        }
        for func in self.functions.iter_mut().flatten() {
            if func.output == Some(old) {
                func.output = Some(new);
                replaced = true;
            }
        }
        replaced
    }

    /// Replace the input at `index` of an apply node.
    pub fn set_input(&mut self, node: NodeId, index: usize, new: NodeId) -> Result<(), GraphError> {
        let name = self.node_name(node);
        match self.node_mut(node).kind_mut() {
            NodeKind::Apply(inputs) if index < inputs.len() => {
                inputs[index] = new;
                Ok(())
            }
            _ => Err(GraphError::InvalidInput { node: name, index }),
        }
    }

    /// Copy the kernel selection info of one node to another.
    pub fn transplant_kernel_info(&mut self, from: NodeId, to: NodeId) {
        let info = self.node(from).kernel_info().cloned();
        self.node_mut(to).set_kernel_info(info);
    }

    /// Copy a set of apply nodes into a standalone graph with one function.
    ///
    /// Inputs of the nodes which are outside the set become parameters of the
    /// new function, except constants which are copied. Symbolic annotations
    /// are not copied.
    pub fn extract(
        &self,
        nodes: &[NodeId],
        output: NodeId,
        name: &str,
    ) -> Result<Extracted, GraphError> {
        let members: FxHashSet<NodeId> = nodes.iter().copied().collect();
        if !members.contains(&output) {
            return Err(GraphError::OutputNotExtracted(self.node_name(output)));
        }

        let order = self.topo_sort(&[output], Successors::Incoming, |id| {
            if members.contains(&id) {
                Include::Follow
            } else {
                Include::Exclude
            }
        });

        let mut graph = Graph::new();
        let function = graph.add_function(name);
        let mut mapping: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut inputs = Vec::new();

        for id in order {
            let node = self.node(id);
            let Some(old_inputs) = node.inputs() else {
                continue;
            };
            let mut new_inputs = Vec::with_capacity(old_inputs.len());
            for &input in old_inputs {
                if let Some(&mapped) = mapping.get(&input) {
                    new_inputs.push(mapped);
                    continue;
                }
                let input_node = self.node(input);
                let mapped = match input_node.as_constant() {
                    Some(value) if !value.functions().is_empty() => {
                        return Err(GraphError::CapturesFunction(self.node_name(input)));
                    }
                    Some(value) => graph.add_node(Node::new(
                        input_node.name(),
                        function,
                        NodeKind::Constant(value.clone()),
                        input_node.abstract_value().without_symbols(),
                    )),
                    None => {
                        inputs.push(input);
                        graph.add_parameter(
                            function,
                            input_node.name(),
                            input_node.abstract_value().without_symbols(),
                        )
                    }
                };
                mapping.insert(input, mapped);
                new_inputs.push(mapped);
            }

            let new_id = graph.add_apply(
                function,
                node.name(),
                &new_inputs,
                node.abstract_value().without_symbols(),
            );
            graph
                .node_mut(new_id)
                .set_kernel_info(node.kernel_info().cloned());
            mapping.insert(id, new_id);
        }

        if let Some(&new_output) = mapping.get(&output) {
            graph.set_output(function, new_output);
        }

        Ok(Extracted {
            graph,
            function,
            inputs,
        })
    }

    /// Move all nodes and functions of `other` into this graph.
    ///
    /// Returns the new ID of `function`.
    pub fn import_function(&mut self, other: Graph, function: FunctionId) -> FunctionId {
        let mut function_map = FxHashMap::default();
        for (i, func) in other.functions.iter().enumerate() {
            if func.is_some() {
                let new_id = FunctionId::from_index(self.functions.len() + function_map.len());
                function_map.insert(FunctionId::from_index(i), new_id);
            }
        }
        let mut node_map = FxHashMap::default();
        for (i, node) in other.nodes.iter().enumerate() {
            if node.is_some() {
                let new_id = NodeId::from_index(self.nodes.len() + node_map.len());
                node_map.insert(NodeId::from_index(i), new_id);
            }
        }

        let mut map_function = |id: FunctionId| function_map.get(&id).copied().unwrap_or(id);
        for mut node in other.nodes.into_iter().flatten() {
            node.set_function(map_function(node.function()));
            let kind = match node.kind() {
                NodeKind::Parameter => NodeKind::Parameter,
                NodeKind::Constant(value) => NodeKind::Constant(value.map_functions(&mut map_function)),
                NodeKind::Apply(inputs) => {
                    NodeKind::Apply(inputs.iter().map(|id| node_map[id]).collect())
                }
            };
            *node.kind_mut() = kind;
            self.nodes.push(Some(node));
        }
        for func in other.functions.into_iter().flatten() {
            self.functions.push(Some(Function {
                params: func.params.iter().map(|id| node_map[id]).collect(),
                output: func.output.map(|id| node_map[&id]),
                ..func
            }));
        }

        map_function(function)
    }

    /// Return the nodes and functions reachable from a function's output and
    /// parameters, following function references.
    fn reachable(&self, root: FunctionId) -> (FxHashSet<NodeId>, FxHashSet<FunctionId>) {
        let root_func = self.function(root);
        let roots: Vec<NodeId> = root_func
            .params
            .iter()
            .copied()
            .chain(root_func.output)
            .collect();
        let nodes: FxHashSet<NodeId> = self
            .topo_sort(&roots, Successors::Deeper, |_| Include::Follow)
            .into_iter()
            .collect();

        let mut functions = FxHashSet::default();
        functions.insert(root);
        for &id in &nodes {
            let node = self.node(id);
            functions.insert(node.function());
            if let Some(value) = node.as_constant() {
                functions.extend(value.functions());
            }
        }
        (nodes, functions)
    }

    /// Return the functions reachable from `root`, including `root`.
    pub fn reachable_functions(&self, root: FunctionId) -> Vec<FunctionId> {
        let (_, functions) = self.reachable(root);
        let mut functions: Vec<_> = functions.into_iter().collect();
        functions.sort();
        functions
    }

    /// Remove nodes and functions which are not reachable from `root`.
    ///
    /// Returns the number of nodes removed.
    pub fn collect_garbage(&mut self, root: FunctionId) -> usize {
        let (live_nodes, live_functions) = self.reachable(root);
        let mut removed = 0;
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.is_some() && !live_nodes.contains(&NodeId::from_index(i)) {
                *node = None;
                removed += 1;
            }
        }
        for (i, func) in self.functions.iter_mut().enumerate() {
            if !live_functions.contains(&FunctionId::from_index(i)) {
                *func = None;
            }
        }
        removed
    }

    /// Return the primitive applied by an apply node.
    pub fn primitive_of(&self, id: NodeId) -> Option<&Primitive> {
        let callee = *self.get_node(id)?.inputs()?.first()?;
        self.get_node(callee)?.as_constant()?.as_primitive()
    }

    /// Return true if `id` is an apply node of the primitive `name`.
    pub fn is_primitive_apply(&self, id: NodeId, name: &str) -> bool {
        self.primitive_of(id).is_some_and(|p| p.name() == name)
    }

    /// Return the function referenced by a constant node.
    pub fn function_ref(&self, id: NodeId) -> Option<FunctionId> {
        self.get_node(id)?.as_constant()?.as_function()
    }

    /// Return the function invoked by an apply node, if it is a call, a
    /// partial application or a kernel packet.
    pub fn called_function(&self, id: NodeId) -> Option<CalledFunction> {
        let inputs = self.get_node(id)?.inputs()?;
        match self.get_node(*inputs.first()?)?.as_constant()? {
            Value::Function(function) => Some(CalledFunction {
                function: *function,
                first_arg: 1,
                kind: CallKind::Call,
            }),
            Value::Primitive(p) if p.name() == prim::PARTIAL => Some(CalledFunction {
                function: self.function_ref(*inputs.get(1)?)?,
                first_arg: 2,
                kind: CallKind::Partial,
            }),
            Value::Primitive(p) if p.name() == prim::KERNEL_PACKET => Some(CalledFunction {
                function: p.attr(prim::ATTR_FUNC_GRAPH)?.as_function()?,
                first_arg: 1,
                kind: CallKind::KernelPacket,
            }),
            _ => None,
        }
    }

    /// Return the arguments an apply node passes to the function it calls.
    pub fn call_args(&self, id: NodeId, called: &CalledFunction) -> Vec<NodeId> {
        self.node(id)
            .inputs()
            .map(|inputs| inputs.get(called.first_arg..).unwrap_or_default().to_vec())
            .unwrap_or_default()
    }
}

/// Return true if every node in `a` has a counterpart in `b` with equal
/// contents, in the same order.
#[cfg(test)]
fn same_nodes(a: &Graph, b: &Graph) -> bool {
    a.nodes.len() == b.nodes.len()
        && std::iter::zip(&a.nodes, &b.nodes).all(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => {
                x.name() == y.name()
                    && x.kind() == y.kind()
                    && x.function() == y.function()
                    && x.abstract_value() == y.abstract_value()
            }
            (None, None) => true,
            _ => false,
        })
}

/// Assert that two graphs have the same nodes and functions.
#[cfg(test)]
pub(crate) fn assert_same_graph(a: &Graph, b: &Graph) {
    assert!(same_nodes(a, b), "graphs have different nodes");

    let signatures = |g: &Graph| -> Vec<_> {
        g.functions
            .iter()
            .map(|f| f.as_ref().map(|f| (f.params.clone(), f.output)))
            .collect()
    };
    assert_eq!(signatures(a), signatures(b));
}
