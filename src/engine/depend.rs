use std::ops::{BitOr, BitOrAssign};

use log::debug;
use smallvec::SmallVec;

use super::special::SpecialNode;
use super::SymbolEngine;
use crate::graph::{CalledFunction, FunctionId, Graph, NodeId};
use crate::op_registry::{DependOn, OpRegistry};

/// Whether the shape and/or the value of a node's output is needed to build
/// the symbols of its consumers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DependStatus {
    pub shape: bool,
    pub value: bool,
}

impl DependStatus {
    pub const NONE: DependStatus = DependStatus {
        shape: false,
        value: false,
    };
    pub const SHAPE: DependStatus = DependStatus {
        shape: true,
        value: false,
    };
    pub const VALUE: DependStatus = DependStatus {
        shape: false,
        value: true,
    };

    pub fn is_empty(self) -> bool {
        !self.shape && !self.value
    }
}

impl BitOr for DependStatus {
    type Output = DependStatus;

    fn bitor(self, rhs: DependStatus) -> DependStatus {
        DependStatus {
            shape: self.shape || rhs.shape,
            value: self.value || rhs.value,
        }
    }
}

impl BitOrAssign for DependStatus {
    fn bitor_assign(&mut self, rhs: DependStatus) {
        *self = *self | rhs;
    }
}

impl From<DependOn> for DependStatus {
    fn from(depend: DependOn) -> DependStatus {
        match depend {
            DependOn::Shape => DependStatus::SHAPE,
            DependOn::Value => DependStatus::VALUE,
            DependOn::Nothing => DependStatus::NONE,
        }
    }
}

impl SymbolEngine {
    pub(super) fn add_depend_status(&mut self, node: NodeId, status: DependStatus) {
        if !status.is_empty() {
            *self.depend_status.entry(node).or_default() |= status;
        }
    }

    /// Compute the depend status of the nodes of a function, visiting
    /// consumers before producers.
    ///
    /// Each function is visited at most once per engine.
    pub(super) fn pre_build_function(
        &mut self,
        graph: &Graph,
        function: FunctionId,
        registry: &OpRegistry,
    ) {
        if !self.prebuilt.insert(function) {
            return;
        }
        for node in graph.apply_nodes(function).into_iter().rev() {
            self.pre_build_node(graph, node, registry);
        }
    }

    fn pre_build_node(&mut self, graph: &Graph, node: NodeId, registry: &OpRegistry) {
        let status = self.depend_status.entry(node).or_default();
        if status.is_empty() {
            *status = DependStatus::SHAPE;
        }
        let status = *status;

        let Some(inputs) = graph.node(node).inputs() else {
            return;
        };
        let Some(&callee) = inputs.first() else {
            return;
        };

        if graph.node(callee).is_apply() {
            let special = SpecialNode::match_node(graph, node);
            special.set_depend_status(self, graph, node, status, registry);
            self.special_nodes.insert(node, special);
            return;
        }

        if let Some(called) = graph.called_function(node) {
            self.pre_build_call(graph, node, &called, status, registry);
            return;
        }

        let Some(prim) = graph.primitive_of(node) else {
            return;
        };
        let Some(builder) = registry.get_builder(prim.name()) else {
            debug!(
                "No builder for {}, inputs of {} are not needed",
                prim.name(),
                graph.node_name(node)
            );
            return;
        };
        let args = &inputs[1..];
        if status.shape {
            self.add_input_depends(graph, args, builder.depends(prim, false), DependOn::Shape);
        }
        if status.value {
            self.add_input_depends(graph, args, builder.depends(prim, true), DependOn::Value);
        }
    }

    /// Record what an operator needs from each of its inputs.
    ///
    /// An empty `depends` list means every input is needed the same way as
    /// the output (`inherit`), except side-effect inputs.
    fn add_input_depends(
        &mut self,
        graph: &Graph,
        args: &[NodeId],
        depends: SmallVec<[DependOn; 4]>,
        inherit: DependOn,
    ) {
        for (i, &arg) in args.iter().enumerate() {
            let depend = if depends.is_empty() {
                if graph.node(arg).abstract_value().is_monad() {
                    DependOn::Nothing
                } else {
                    inherit
                }
            } else {
                depends.get(i).copied().unwrap_or(DependOn::Nothing)
            };
            self.add_depend_status(arg, depend.into());
        }
    }

    /// Propagate the status of a call into the called function, then
    /// propagate the status of the function's parameters to the arguments.
    pub(super) fn pre_build_call(
        &mut self,
        graph: &Graph,
        node: NodeId,
        called: &CalledFunction,
        status: DependStatus,
        registry: &OpRegistry,
    ) {
        self.pre_build_branch(graph, called.function, status, registry);

        let params = graph.function(called.function).params();
        for (&param, arg) in params.iter().zip(graph.call_args(node, called)) {
            let param_status = self.depend_status(param);
            self.add_depend_status(arg, param_status);
        }
    }

    /// Propagate `status` into a function as if its output was used with
    /// that status.
    pub(super) fn pre_build_branch(
        &mut self,
        graph: &Graph,
        function: FunctionId,
        status: DependStatus,
        registry: &OpRegistry,
    ) {
        if let Some(output) = graph.function(function).output() {
            self.add_depend_status(output, status);
        }
        self.pre_build_function(graph, function, registry);
    }
}
