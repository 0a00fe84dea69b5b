use super::{FunctionId, NodeId};
use crate::abstract_value::AbstractValue;
use crate::value::Value;

/// Backend kernel selection info for a node.
///
/// This is opaque to the symbol engine. It is carried across node
/// replacements so that a backend does not need to select kernels again.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelInfo {
    pub kernel_name: String,
    pub backend: String,
    pub formats: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// A parameter of a function.
    Parameter,
    Constant(Value),
    /// An application of `inputs[0]` to `inputs[1..]`.
    ///
    /// The callee is usually a primitive or function constant. If it is
    /// another apply node, this is a *special* call whose callee is computed,
    /// such as the result of a conditional.
    Apply(Vec<NodeId>),
}

#[derive(Clone, Debug)]
pub struct Node {
    name: Option<String>,
    function: FunctionId,
    kind: NodeKind,
    abs: AbstractValue,
    kernel_info: Option<KernelInfo>,
}

impl Node {
    pub(crate) fn new(
        name: Option<&str>,
        function: FunctionId,
        kind: NodeKind,
        abs: AbstractValue,
    ) -> Node {
        Node {
            name: name.map(|s| s.to_string()),
            function,
            kind,
            abs,
            kernel_info: None,
        }
    }

    /// Return the debug name of this node.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Return the function which this node belongs to.
    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub(crate) fn set_function(&mut self, function: FunctionId) {
        self.function = function;
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    /// Return the inputs of an apply node, including the callee.
    pub fn inputs(&self) -> Option<&[NodeId]> {
        match &self.kind {
            NodeKind::Apply(inputs) => Some(inputs),
            _ => None,
        }
    }

    pub fn is_apply(&self) -> bool {
        matches!(self.kind, NodeKind::Apply(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, NodeKind::Parameter)
    }

    /// Return the value of a constant node.
    pub fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Return the type, shape and symbolic information of this node's output.
    pub fn abstract_value(&self) -> &AbstractValue {
        &self.abs
    }

    pub fn abstract_value_mut(&mut self) -> &mut AbstractValue {
        &mut self.abs
    }

    pub fn kernel_info(&self) -> Option<&KernelInfo> {
        self.kernel_info.as_ref()
    }

    pub fn set_kernel_info(&mut self, info: Option<KernelInfo>) {
        self.kernel_info = info;
    }

    /// Replace an input in the node's list of inputs.
    pub(super) fn replace_input(&mut self, old_id: NodeId, new_id: NodeId) -> bool {
        let mut replaced = false;
        if let NodeKind::Apply(inputs) = &mut self.kind {
            for input_id in inputs.iter_mut().filter(|id| **id == old_id) {
                *input_id = new_id;
                replaced = true;
            }
        }
        replaced
    }
}
