//! Tools to simplify building graphs in tests.

use super::{FunctionId, Graph, NodeId};
use crate::abstract_value::AbstractValue;
use crate::value::{prim, Primitive, Value};

/// Builds the body of one function in a [`Graph`].
///
/// ```
/// use symshape::{dims, AbstractValue, DataType, FunctionBuilder, Graph};
///
/// let mut graph = Graph::new();
/// let mut main = FunctionBuilder::new(&mut graph, "main");
/// let x = main.param("x", AbstractValue::tensor(DataType::Float32, dims![?, 4]));
/// let y = main.op("Neg", &[x], AbstractValue::tensor(DataType::Float32, dims![?, 4]));
/// let main = main.output(y);
///
/// assert_eq!(graph.apply_nodes(main), [y]);
/// ```
pub struct FunctionBuilder<'a> {
    graph: &'a mut Graph,
    function: FunctionId,
}

impl<'a> FunctionBuilder<'a> {
    /// Add a new function to `graph` and return a builder for it.
    pub fn new(graph: &'a mut Graph, name: &str) -> FunctionBuilder<'a> {
        let function = graph.add_function(name);
        FunctionBuilder { graph, function }
    }

    /// Return the ID of the function being built.
    pub fn id(&self) -> FunctionId {
        self.function
    }

    pub fn graph(&mut self) -> &mut Graph {
        self.graph
    }

    pub fn param(&mut self, name: &str, abs: AbstractValue) -> NodeId {
        self.graph.add_parameter(self.function, Some(name), abs)
    }

    pub fn constant(&mut self, value: impl Into<Value>) -> NodeId {
        self.graph.add_constant(self.function, value.into())
    }

    /// Add a reference to a function.
    pub fn function_ref(&mut self, function: FunctionId) -> NodeId {
        self.graph.add_constant(self.function, Value::Function(function))
    }

    /// Apply a primitive to `inputs`.
    pub fn op(&mut self, prim: impl Into<Primitive>, inputs: &[NodeId], abs: AbstractValue) -> NodeId {
        self.graph
            .add_primitive_apply(self.function, prim.into(), inputs, abs)
    }

    /// Call a function.
    pub fn call(&mut self, callee: FunctionId, args: &[NodeId], abs: AbstractValue) -> NodeId {
        self.graph.add_call(self.function, callee, args, abs)
    }

    /// Partially apply a function to leading arguments.
    pub fn partial(&mut self, callee: FunctionId, args: &[NodeId]) -> NodeId {
        let callee = self.function_ref(callee);
        let mut inputs = vec![callee];
        inputs.extend_from_slice(args);
        self.op(prim::PARTIAL, &inputs, AbstractValue::function())
    }

    /// Apply the result of another node to `args`.
    pub fn apply(&mut self, callee: NodeId, args: &[NodeId], abs: AbstractValue) -> NodeId {
        let mut inputs = vec![callee];
        inputs.extend_from_slice(args);
        self.graph.add_apply(self.function, None, &inputs, abs)
    }

    /// Set the function's output and finish building.
    pub fn output(self, output: NodeId) -> FunctionId {
        self.graph.set_output(self.function, output);
        self.function
    }
}
