//! Symbolic shape inference for graphs with dynamic shapes.
//!
//! A [`SymbolEngine`] is built for a function and every function it calls.
//! Building happens in two phases:
//!
//! 1. Depend statuses are computed, visiting consumers before producers, to
//!    determine whether the shape and/or value of each node is needed.
//! 2. Symbols are built for each node in execution order, using the
//!    [`OperationBuilder`](crate::OperationBuilder) registered for its
//!    operator. Symbols are stored in the node's [`AbstractValue`].
//!
//! Afterwards [`SymbolEngine::infer`] resolves the symbols for concrete
//! inputs.

use std::fmt::Write;

use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use symshape_symbols::{SymValue, SymbolError, SymbolId, SymbolTable};
use thiserror::Error;

use crate::abstract_value::AbstractValue;
use crate::graph::{CallKind, CalledFunction, FunctionId, Graph, NodeId};
use crate::op_registry::{BuildContext, OpRegistry, OperationBuilder};
use crate::value::{prim, Primitive};

mod depend;
mod special;

pub use depend::DependStatus;
pub use special::SpecialNode;

/// Errors which abort building a [`SymbolEngine`].
///
/// These indicate a malformed graph. Operators which do not support symbolic
/// inference are not errors; see [`SymbolEngine::support_infer`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("call {node} passes {actual} arguments to a function with {expected} parameters")]
    ArgumentCountMismatch {
        node: String,
        expected: usize,
        actual: usize,
    },
}

/// Errors returned by [`SymbolEngine::infer`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum InferError {
    /// Some node in the graph has no symbolic shape or value builder.
    #[error("symbol engine does not support inference")]
    NotSupported,

    #[error("graph has {expected} parameters but {actual} inputs were given")]
    TooManyInputs { expected: usize, actual: usize },

    #[error("failed to update input {index}: {error}")]
    Update { index: usize, error: SymbolError },

    #[error("symbol engine has not been built")]
    NotBuilt,
}

/// Build progress of a [`SymbolEngine`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildState {
    Unbuilt,
    PreBuilding,
    PreBuilt,
    Building,
    Built,
}

/// Options for [`build_symbol_engine`].
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Skip graphs in which every node has a static shape.
    pub only_dynamic_shape_graph: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            only_dynamic_shape_graph: true,
        }
    }
}

/// Symbolic shapes and values for a function and the functions it calls.
pub struct SymbolEngine {
    root: FunctionId,
    state: BuildState,
    support_infer: bool,
    symbols: SymbolTable,

    depend_status: FxHashMap<NodeId, DependStatus>,
    special_nodes: FxHashMap<NodeId, SpecialNode>,

    /// Functions whose depend statuses have been computed.
    prebuilt: FxHashSet<FunctionId>,

    /// Functions whose symbols have been built.
    built: FxHashSet<FunctionId>,

    functions: Vec<FunctionId>,
}

impl SymbolEngine {
    fn new(root: FunctionId) -> SymbolEngine {
        SymbolEngine {
            root,
            state: BuildState::Unbuilt,
            support_infer: true,
            symbols: SymbolTable::new(),
            depend_status: FxHashMap::default(),
            special_nodes: FxHashMap::default(),
            prebuilt: FxHashSet::default(),
            built: FxHashSet::default(),
            functions: Vec::new(),
        }
    }

    /// Build symbols for `root` and every function it calls.
    ///
    /// Existing symbols on the nodes of these functions are replaced.
    pub fn build(
        graph: &mut Graph,
        root: FunctionId,
        registry: &OpRegistry,
    ) -> Result<SymbolEngine, EngineError> {
        let mut engine = SymbolEngine::new(root);

        engine.state = BuildState::PreBuilding;
        engine.pre_build_function(graph, root, registry);
        engine.state = BuildState::PreBuilt;

        let mut functions: Vec<_> = engine.prebuilt.iter().copied().collect();
        functions.sort();
        for &function in &functions {
            for node in graph.function_nodes(function) {
                graph.node_mut(node).abstract_value_mut().clear_symbols();
            }
        }
        engine.functions = functions;

        engine.state = BuildState::Building;
        engine.built.insert(root);
        for param in graph.function(root).params().to_vec() {
            let status = engine.depend_status(param);
            engine.ensure_symbols(graph, param, status);
        }
        engine.build_function(graph, root, registry)?;
        engine.state = BuildState::Built;

        debug!(
            "Built symbol engine for {} with {} operations, support infer: {}",
            graph.function(root).name(),
            engine.symbols.num_operations(),
            engine.support_infer
        );
        Ok(engine)
    }

    /// Build symbols for the nodes of a function, in execution order.
    fn build_function(
        &mut self,
        graph: &mut Graph,
        function: FunctionId,
        registry: &OpRegistry,
    ) -> Result<(), EngineError> {
        for node in graph.apply_nodes(function) {
            match graph.called_function(node) {
                Some(called) if !self.special_nodes.contains_key(&node) => {
                    self.build_subgraph(graph, node, &called, registry)?;
                }
                _ => self.build_node(graph, node, registry)?,
            }
        }

        // Outputs which are not apply nodes, such as constants, have not been
        // visited above.
        if let Some(output) = graph.function(function).output() {
            let status = self.depend_status(output);
            self.ensure_symbols(graph, output, status);
        }
        Ok(())
    }

    /// Bind the parameters of a called function and build its nodes.
    ///
    /// Each function is built only once. Later calls of the same function get
    /// the function's output symbols with the parameter symbols replaced by
    /// the symbols of their own arguments.
    fn build_subgraph(
        &mut self,
        graph: &mut Graph,
        call: NodeId,
        called: &CalledFunction,
        registry: &OpRegistry,
    ) -> Result<(), EngineError> {
        let function = called.function;
        let params = graph.function(function).params().to_vec();
        let args = graph.call_args(call, called);

        // A partial application binds leading parameters only.
        let count_ok = if called.kind == CallKind::Partial {
            args.len() <= params.len()
        } else {
            args.len() == params.len()
        };
        if !count_ok {
            return Err(EngineError::ArgumentCountMismatch {
                node: graph.node_name(call),
                expected: params.len(),
                actual: args.len(),
            });
        }

        if !self.built.insert(function) {
            self.bind_built_function(graph, call, called, &params, &args);
            return Ok(());
        }
        debug!(
            "Build function {} called by {}",
            graph.function(function).name(),
            graph.node_name(call)
        );

        for (i, &param) in params.iter().enumerate() {
            let status = self.depend_status(param);
            let Some(&arg) = args.get(i) else {
                self.ensure_symbols(graph, param, status);
                continue;
            };
            self.ensure_symbols(graph, arg, status);
            let arg_abs = graph.node(arg).abstract_value();
            let (shape, value) = (arg_abs.symbolic_shape(), arg_abs.symbolic_value());
            let param_abs = graph.node_mut(param).abstract_value_mut();
            param_abs.set_symbolic_shape(shape);
            param_abs.set_symbolic_value(value);
        }

        self.build_function(graph, function, registry)?;

        if called.kind.copies_output() {
            if let Some(output) = graph.function(function).output() {
                let out_abs = graph.node(output).abstract_value();
                let (shape, value) = (out_abs.symbolic_shape(), out_abs.symbolic_value());
                let call_abs = graph.node_mut(call).abstract_value_mut();
                call_abs.set_symbolic_shape(shape);
                call_abs.set_symbolic_value(value);
            }
        }
        Ok(())
    }

    /// Link a call of a function which has already been built to its
    /// arguments.
    ///
    /// If the function is still being built, because it calls itself, its
    /// output has no symbols yet and the call gets symbols built from its
    /// own abstract.
    fn bind_built_function(
        &mut self,
        graph: &mut Graph,
        call: NodeId,
        called: &CalledFunction,
        params: &[NodeId],
        args: &[NodeId],
    ) {
        let mut bindings = FxHashMap::default();
        for (&param, &arg) in params.iter().zip(args) {
            let status = self.depend_status(param);
            self.ensure_symbols(graph, arg, status);
            let param_abs = graph.node(param).abstract_value();
            let arg_abs = graph.node(arg).abstract_value();
            let pairs = [
                (param_abs.symbolic_shape(), arg_abs.symbolic_shape()),
                (param_abs.symbolic_value(), arg_abs.symbolic_value()),
            ];
            for (from, to) in pairs {
                if let (Some(from), Some(to)) = (from, to) {
                    self.bind_symbol(from, to, &mut bindings);
                }
            }
        }

        if called.kind.copies_output() {
            if let Some(output) = graph.function(called.function).output() {
                let out_abs = graph.node(output).abstract_value();
                let (shape, value) = (out_abs.symbolic_shape(), out_abs.symbolic_value());
                let shape = shape.map(|id| self.symbols.substitute(id, &bindings));
                let value = value.map(|id| self.symbols.substitute(id, &bindings));
                let call_abs = graph.node_mut(call).abstract_value_mut();
                call_abs.set_symbolic_shape(shape);
                call_abs.set_symbolic_value(value);
            }
            let status = self.depend_status(call);
            self.ensure_symbols(graph, call, status);
        }
    }

    /// Record that parameter symbol `from` stands for argument symbol `to`,
    /// matching list elements pairwise.
    fn bind_symbol(
        &self,
        from: SymbolId,
        to: SymbolId,
        bindings: &mut FxHashMap<SymbolId, SymbolId>,
    ) {
        if from == to || self.symbols.is_literal(from) {
            return;
        }
        bindings.insert(from, to);
        if let (Some(from_elems), Some(to_elems)) =
            (self.symbols.elements(from), self.symbols.elements(to))
        {
            if from_elems.len() == to_elems.len() {
                for (&from, &to) in from_elems.iter().zip(to_elems) {
                    self.bind_symbol(from, to, bindings);
                }
            }
        }
    }

    /// Give a node the symbols required by `status`, building any that are
    /// missing from its abstract.
    fn ensure_symbols(&mut self, graph: &mut Graph, node: NodeId, status: DependStatus) {
        let abs = graph.node_mut(node).abstract_value_mut();
        if status.shape && abs.symbolic_shape().is_none() {
            let shape = abs.shape().build_symbolic(&mut self.symbols);
            abs.set_symbolic_shape(Some(shape));
        }
        if status.value && abs.symbolic_value().is_none() {
            let value = abs.build_symbolic_value(&mut self.symbols);
            abs.set_symbolic_value(Some(value));
        }
    }

    /// Build the symbols of an apply node using the builder for its operator.
    fn build_node(
        &mut self,
        graph: &mut Graph,
        node: NodeId,
        registry: &OpRegistry,
    ) -> Result<(), EngineError> {
        let (prim, input_ids) = match self.special_nodes.get(&node).copied() {
            Some(special) => special
                .extract_inputs(self, graph, node, registry)?
                .unwrap_or_else(|| (Primitive::new(prim::SPECIAL_NODE), Vec::new())),
            None => {
                let args = graph
                    .node(node)
                    .inputs()
                    .map(|inputs| inputs[1..].to_vec())
                    .unwrap_or_default();
                let prim = graph
                    .primitive_of(node)
                    .cloned()
                    .unwrap_or_else(|| Primitive::new(prim::UNSUPPORTED_NODE));
                (prim, args)
            }
        };
        let status = self.depend_status(node);
        let name = graph.node_name(node);

        graph.node_mut(node).abstract_value_mut().clear_symbols();
        let mut output = graph.node(node).abstract_value().clone();
        let mut inputs: Vec<AbstractValue> = input_ids
            .iter()
            .map(|&id| graph.node(id).abstract_value().clone())
            .collect();
        let builder = registry.get_builder(prim.name());

        if status.value {
            let value = match self.run_builder(builder, &prim, &mut inputs, &output, true) {
                Ok(value) => value,
                Err(err) => {
                    debug!("Failed to build value of {}: {}", name, err);
                    self.support_infer = false;
                    output.build_symbolic_value(&mut self.symbols)
                }
            };
            output.set_symbolic_value(Some(value));
        }

        if status.shape {
            let shape = if !output.shape().is_dynamic() {
                debug!("Node {} has static shape {}", name, output.shape());
                output.shape().build_symbolic(&mut self.symbols)
            } else {
                match self.run_builder(builder, &prim, &mut inputs, &output, false) {
                    Ok(shape) => shape,
                    Err(err) => {
                        debug!("Failed to build shape of {}: {}", name, err);
                        self.support_infer = false;
                        output.shape().build_symbolic(&mut self.symbols)
                    }
                }
            };
            output.set_symbolic_shape(Some(shape));
        }

        // Input symbols which builders created lazily are stored on the
        // input nodes, so that later consumers share them.
        for (&id, input) in input_ids.iter().zip(&inputs) {
            let abs = graph.node_mut(id).abstract_value_mut();
            if abs.symbolic_shape().is_none() {
                abs.set_symbolic_shape(input.symbolic_shape());
            }
            if abs.symbolic_value().is_none() {
                abs.set_symbolic_value(input.symbolic_value());
            }
        }
        *graph.node_mut(node).abstract_value_mut() = output;
        Ok(())
    }

    fn run_builder(
        &mut self,
        builder: Option<&dyn OperationBuilder>,
        prim: &Primitive,
        inputs: &mut [AbstractValue],
        output: &AbstractValue,
        value: bool,
    ) -> Result<SymbolId, String> {
        let Some(builder) = builder else {
            return Err(format!("no builder for {}", prim.name()));
        };
        let mut ctx = BuildContext::new(prim, inputs, output, &mut self.symbols);
        let result = if value {
            builder.build_value(&mut ctx)
        } else {
            builder.build_shape(&mut ctx)
        };
        result.map_err(|err| err.to_string())
    }

    /// Resolve symbols for concrete inputs of the root function.
    ///
    /// `inputs` may have fewer entries than the function has parameters.
    /// Operation outputs from a previous call are recomputed.
    pub fn infer(&mut self, graph: &Graph, inputs: &[AbstractValue]) -> Result<(), InferError> {
        if self.state != BuildState::Built {
            return Err(InferError::NotBuilt);
        }
        if !self.support_infer {
            warn!(
                "Symbol engine for {} does not support inference",
                graph.function(self.root).name()
            );
            return Err(InferError::NotSupported);
        }
        let params = graph.function(self.root).params();
        if inputs.len() > params.len() {
            return Err(InferError::TooManyInputs {
                expected: params.len(),
                actual: inputs.len(),
            });
        }

        self.symbols.reset_operations();
        for (index, (&param, input)) in params.iter().zip(inputs).enumerate() {
            let abs = graph.node(param).abstract_value();
            if let Some(shape) = abs.symbolic_shape() {
                debug!("Update shape of input {} to {}", index, input.shape());
                input
                    .shape()
                    .update_symbolic(&mut self.symbols, shape)
                    .map_err(|error| InferError::Update { index, error })?;
            }
            if let Some(value) = abs.symbolic_value() {
                let data = input.value().and_then(|v| v.to_sym_value());
                self.symbols
                    .update(value, data.as_ref())
                    .map_err(|error| InferError::Update { index, error })?;
            }
        }
        self.symbols.run_operations();
        Ok(())
    }

    pub fn root(&self) -> FunctionId {
        self.root
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Return false if symbols for some node could not be built, in which
    /// case [`infer`](Self::infer) is not supported.
    pub fn support_infer(&self) -> bool {
        self.support_infer
    }

    pub fn depend_status(&self, node: NodeId) -> DependStatus {
        self.depend_status.get(&node).copied().unwrap_or_default()
    }

    /// Return true if the shape of a node is needed by its consumers.
    pub fn is_depend_shape(&self, node: NodeId) -> bool {
        self.depend_status(node).shape
    }

    /// Return true if the value of a node is needed by its consumers.
    pub fn is_depend_value(&self, node: NodeId) -> bool {
        self.depend_status(node).value
    }

    /// Return how a special node was matched, if `node` is one.
    pub fn special_node(&self, node: NodeId) -> Option<SpecialNode> {
        self.special_nodes.get(&node).copied()
    }

    /// Return the functions covered by this engine, in ID order.
    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Return the symbolic shape of a node, if it was built.
    pub fn symbolic_shape(&self, graph: &Graph, node: NodeId) -> Option<SymbolId> {
        graph.get_node(node)?.abstract_value().symbolic_shape()
    }

    /// Return the symbolic value of a node, if it was built.
    pub fn symbolic_value(&self, graph: &Graph, node: NodeId) -> Option<SymbolId> {
        graph.get_node(node)?.abstract_value().symbolic_value()
    }

    /// Return the current data of a node's symbolic shape.
    pub fn query_shape(&self, graph: &Graph, node: NodeId) -> Option<SymValue> {
        self.symbols.value(self.symbolic_shape(graph, node)?)
    }

    /// Return the current data of a node's symbolic value.
    pub fn query_value(&self, graph: &Graph, node: NodeId) -> Option<SymValue> {
        self.symbols.value(self.symbolic_value(graph, node)?)
    }

    /// Return a map from the names of the dimension symbols in a node's
    /// shape to the expressions which compute them, eg. `s3 ->
    /// ScalarMul(s0, 2)`.
    ///
    /// Dimensions which are not computed by an operation, such as those of
    /// graph inputs, map to their own name (`s0 -> s0`). Known sizes are
    /// omitted.
    pub fn query_symbol_expr(&self, graph: &Graph, node: NodeId) -> FxHashMap<String, String> {
        let mut exprs = FxHashMap::default();
        let Some(shape) = self.symbolic_shape(graph, node) else {
            return exprs;
        };
        let dims = match self.symbols.elements(shape) {
            Some(dims) => dims.to_vec(),
            None => vec![shape],
        };
        for dim in dims {
            let name = self.symbols.raw_string(dim);
            if name.starts_with('s') && !exprs.contains_key(&name) {
                let expr = self.symbols.expr_string(dim, &exprs);
                exprs.insert(name, expr);
            }
        }
        exprs
    }

    /// Return a textual dump of the recorded operations.
    pub fn dump_text(&self, graph: &Graph) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "SymbolEngine({}) support_infer={} symbols={} operations={}",
            graph
                .get_function(self.root)
                .map(|f| f.name())
                .unwrap_or("<removed>"),
            self.support_infer,
            self.symbols.len(),
            self.symbols.num_operations()
        );
        out.push_str(&self.symbols.dump_operations());
        out
    }
}

/// Remove symbolic shapes and values from all nodes reachable from `root`.
pub fn clean_symbols(graph: &mut Graph, root: FunctionId) {
    for function in graph.reachable_functions(root) {
        for node in graph.function_nodes(function) {
            graph.node_mut(node).abstract_value_mut().clear_symbols();
        }
    }
}

/// Return true if any node reachable from `root` has a dynamic shape.
fn has_dynamic_shape(graph: &Graph, root: FunctionId) -> bool {
    graph.reachable_functions(root).into_iter().any(|function| {
        graph
            .function_nodes(function)
            .into_iter()
            .any(|node| graph.node(node).abstract_value().shape().is_dynamic())
    })
}

/// Build a symbol engine for `root` if it is useful.
///
/// Returns `None` if `options` skips graphs with only static shapes and
/// `root` is such a graph, or if the graph is malformed.
pub fn build_symbol_engine(
    graph: &mut Graph,
    root: FunctionId,
    registry: &OpRegistry,
    options: BuildOptions,
) -> Option<SymbolEngine> {
    if options.only_dynamic_shape_graph && !has_dynamic_shape(graph, root) {
        debug!(
            "Skip building symbol engine for static graph {}",
            graph.function(root).name()
        );
        return None;
    }
    match SymbolEngine::build(graph, root, registry) {
        Ok(engine) => Some(engine),
        Err(err) => {
            warn!(
                "Failed to build symbol engine for {}: {}",
                graph.function(root).name(),
                err
            );
            clean_symbols(graph, root);
            None
        }
    }
}
