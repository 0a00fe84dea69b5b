//! Graph rewrites driven by symbolic shapes.

use log::debug;
use symshape_symbols::{SymValue, SymbolId, SymbolTable};

use crate::engine::SymbolEngine;
use crate::graph::{FunctionId, Graph, NodeId};
use crate::value::{prim, Value};

mod diagnostics;

pub use diagnostics::{DiagnosticLevel, Diagnostics};

/// Operators which return their first input unchanged if their output shape
/// equals the input shape.
const SHAPE_PRESERVING_OPS: [&str; 4] = ["Reshape", "ReduceSum", "ReduceMax", "ReduceMin"];

/// Primitives whose inputs are not folded into constants.
const NO_FOLD_OPS: [&str; 5] = [
    prim::PARTIAL,
    prim::SWITCH,
    prim::J,
    prim::UPDATE_STATE,
    prim::KERNEL_PACKET,
];

/// Simplifies a graph using the symbols of a [`SymbolEngine`] built for it.
///
/// The rewrites are:
///
/// - Reshapes and reductions whose output shape is symbolically equal to
///   their input shape are removed.
/// - `ReduceSum` nodes which sum a gradient over the axes computed by
///   `BroadcastGradientArgs` are removed if the operand has the same shape
///   as the forward operator's output, so that nothing was broadcast.
/// - Computed `Reshape` targets whose value is known up to one size are
///   replaced with constants, using `-1` for the unknown size.
/// - Other computed inputs whose value is a known list of integers are
///   replaced with constants.
/// - `Shape` nodes with the same symbolic value as an earlier `Shape` node in
///   the same function are replaced by the earlier node.
pub struct ShapeOptimizer {
    diagnostics: Diagnostics,
}

impl ShapeOptimizer {
    pub fn new() -> Self {
        Self::with_diagnostics(Diagnostics::default())
    }

    pub fn with_diagnostics(diagnostics: Diagnostics) -> Self {
        ShapeOptimizer { diagnostics }
    }

    /// Apply rewrites to the functions covered by `engine`, which must have
    /// been built for `root`.
    ///
    /// Returns true if the graph was changed. Nothing is done if the engine
    /// does not support inference.
    pub fn optimize(&self, graph: &mut Graph, root: FunctionId, engine: &SymbolEngine) -> bool {
        if !engine.support_infer() {
            debug!(
                "Skip shape optimizations for {} as inference is not supported",
                graph.function(root).name()
            );
            return false;
        }

        let mut changed = false;
        for &function in engine.functions() {
            if graph.get_function(function).is_none() {
                continue;
            }
            changed |= self.eliminate_ineffective_ops(graph, function, engine);
            changed |= self.eliminate_broadcast_gradient_sums(graph, function, engine);
            changed |= self.fold_reshape_targets(graph, function, engine);
            changed |= self.fold_constant_inputs(graph, function, engine);
            changed |= self.eliminate_duplicate_shapes(graph, function, engine);
        }

        if changed {
            graph.collect_garbage(root);
        }
        changed
    }

    fn eliminate_ineffective_ops(
        &self,
        graph: &mut Graph,
        function: FunctionId,
        engine: &SymbolEngine,
    ) -> bool {
        let mut changed = false;
        for node in graph.apply_nodes(function) {
            let Some(op_name) = graph
                .primitive_of(node)
                .map(|p| p.name())
                .filter(|name| SHAPE_PRESERVING_OPS.contains(name))
                .map(|name| name.to_string())
            else {
                continue;
            };
            let Some(&input) = graph.node(node).inputs().and_then(|inputs| inputs.get(1)) else {
                continue;
            };
            let (Some(input_shape), Some(output_shape)) = (
                engine.symbolic_shape(graph, input),
                engine.symbolic_shape(graph, node),
            ) else {
                continue;
            };
            if !engine.symbols().equals(input_shape, output_shape) {
                continue;
            }

            graph.replace(node, input);
            self.diagnostics.info(
                graph,
                node,
                format_args!(
                    "Removed {} which does not change the shape of {}",
                    op_name,
                    graph.node_name(input)
                ),
            );
            changed = true;
        }
        changed
    }

    fn eliminate_broadcast_gradient_sums(
        &self,
        graph: &mut Graph,
        function: FunctionId,
        engine: &SymbolEngine,
    ) -> bool {
        let mut changed = false;
        for node in graph.apply_nodes(function) {
            if !graph.is_primitive_apply(node, "ReduceSum") {
                continue;
            }
            let Some(&[_, dout, axes, _, _]) = graph.node(node).inputs() else {
                continue;
            };
            let Some((calc, input_index)) = match_gradient_axes(graph, axes) else {
                continue;
            };
            if !gradient_needs_no_sum(graph, engine, calc, input_index) {
                continue;
            }

            graph.replace(node, dout);
            self.diagnostics.info(
                graph,
                node,
                format_args!(
                    "Removed sum of gradient for input {} of {}, which was not broadcast",
                    input_index,
                    graph.node_name(calc)
                ),
            );
            changed = true;
        }
        changed
    }

    fn fold_reshape_targets(
        &self,
        graph: &mut Graph,
        function: FunctionId,
        engine: &SymbolEngine,
    ) -> bool {
        let mut changed = false;
        for node in graph.apply_nodes(function) {
            if !graph.is_primitive_apply(node, "Reshape") {
                continue;
            }
            let Some(&target) = graph.node(node).inputs().and_then(|inputs| inputs.get(2)) else {
                continue;
            };
            if !graph.node(target).is_apply() {
                continue;
            }
            let Some(value) = engine.symbolic_value(graph, target) else {
                continue;
            };
            let sizes = match constant_sizes(engine.symbols(), value) {
                Ok(sizes) => sizes,
                Err(reason) => {
                    self.diagnostics.warn(
                        graph,
                        node,
                        format_args!("Could not fold target shape: {}", reason),
                    );
                    continue;
                }
            };

            let owner = graph.node(node).function();
            let constant = graph.add_constant(owner, Value::Ints(sizes.clone()));
            if let Err(err) = graph.set_input(node, 2, constant) {
                self.diagnostics
                    .warn(graph, node, format_args!("Could not fold target shape: {}", err));
                continue;
            }
            self.diagnostics.info(
                graph,
                node,
                format_args!(
                    "Replaced target shape {} with {:?}",
                    graph.node_name(target),
                    sizes
                ),
            );
            changed = true;
        }
        changed
    }

    fn fold_constant_inputs(
        &self,
        graph: &mut Graph,
        function: FunctionId,
        engine: &SymbolEngine,
    ) -> bool {
        let symbols = engine.symbols();
        let is_literal = |value: Option<SymbolId>| value.is_some_and(|v| symbols.is_literal(v));

        let mut changed = false;
        for node in graph.apply_nodes(function) {
            let foldable = graph
                .primitive_of(node)
                .is_some_and(|p| !NO_FOLD_OPS.contains(&p.name()));
            if !foldable || is_literal(engine.symbolic_value(graph, node)) {
                continue;
            }
            let inputs = graph.node(node).inputs().unwrap_or_default().to_vec();
            for (index, &input) in inputs.iter().enumerate().skip(1) {
                if !graph.node(input).is_apply() {
                    continue;
                }
                let Some(value) = engine
                    .symbolic_value(graph, input)
                    .filter(|&v| symbols.is_literal(v))
                else {
                    continue;
                };
                let Some(sizes) = symbols
                    .value(value)
                    .filter(|v| matches!(v, SymValue::List(_)))
                    .and_then(|v| v.to_ints())
                else {
                    debug!(
                        "Not folding input {} of {} as it is not a list of integers",
                        index,
                        graph.node_name(node)
                    );
                    continue;
                };

                let owner = graph.node(node).function();
                let constant = graph.add_constant(owner, Value::Ints(sizes.clone()));
                graph
                    .node_mut(constant)
                    .abstract_value_mut()
                    .set_symbolic_value(Some(value));
                if let Err(err) = graph.set_input(node, index, constant) {
                    self.diagnostics
                        .warn(graph, node, format_args!("Could not fold input {}: {}", index, err));
                    continue;
                }
                self.diagnostics.info(
                    graph,
                    node,
                    format_args!(
                        "Replaced input {} {} with constant {:?}",
                        index,
                        graph.node_name(input),
                        sizes
                    ),
                );
                changed = true;
            }
        }
        changed
    }

    fn eliminate_duplicate_shapes(
        &self,
        graph: &mut Graph,
        function: FunctionId,
        engine: &SymbolEngine,
    ) -> bool {
        let mut changed = false;
        let mut shapes: Vec<(NodeId, SymbolId)> = Vec::new();
        for node in graph.apply_nodes(function) {
            if !graph.is_primitive_apply(node, "Shape") {
                continue;
            }
            let Some(value) = engine.symbolic_value(graph, node) else {
                continue;
            };
            let earlier = shapes
                .iter()
                .find(|(_, other)| engine.symbols().equals(*other, value))
                .map(|(id, _)| *id);
            let Some(earlier) = earlier else {
                shapes.push((node, value));
                continue;
            };

            graph.replace(node, earlier);
            self.diagnostics.info(
                graph,
                node,
                format_args!("Replaced by equivalent {}", graph.node_name(earlier)),
            );
            changed = true;
        }
        changed
    }
}

impl Default for ShapeOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert the symbolic value of a reshape target into constant sizes, with
/// `-1` for the size which is unknown.
fn constant_sizes(table: &SymbolTable, value: SymbolId) -> Result<Vec<i64>, String> {
    let elements = table
        .elements(value)
        .ok_or_else(|| "rank is unknown".to_string())?;
    let mut sizes = Vec::with_capacity(elements.len());
    for &element in elements {
        let size = if table.is_literal(element) {
            table
                .int_value(element)
                .ok_or_else(|| format!("size {} is not an integer", table.raw_string(element)))?
        } else {
            -1
        };
        sizes.push(size);
    }
    let n_unknown = sizes.iter().filter(|&&size| size == -1).count();
    if n_unknown > 1 {
        return Err(format!("{} sizes are unknown", n_unknown));
    }
    Ok(sizes)
}

/// Match `TupleGetItem(calc, i)` where `calc` computes the reduction axes
/// for the gradients of a broadcasting binary operator.
///
/// Returns `calc` and the index of its input which describes the operand
/// whose gradient is reduced along axes `i`.
fn match_gradient_axes(graph: &Graph, axes: NodeId) -> Option<(NodeId, usize)> {
    if !graph.is_primitive_apply(axes, prim::TUPLE_GET_ITEM) {
        return None;
    }
    let &[_, calc, index] = graph.node(axes).inputs()? else {
        return None;
    };
    let index = match graph.node(index).as_constant()? {
        Value::Int(i @ (0 | 1)) => *i as usize,
        _ => return None,
    };
    let calc_prim = graph.primitive_of(calc)?;
    let is_gradient_args = calc_prim.name() == "BroadcastGradientArgs"
        || (calc_prim.name() == "ShapeCalc"
            && calc_prim.str_attr("functor") == Some("BroadcastGradientArgs"));
    let n_inputs = graph.node(calc).inputs()?.len();
    (is_gradient_args && n_inputs == 3).then_some((calc, index + 1))
}

/// Return true if the operand described by input `input_index` of the
/// backward node `calc` has the same shape as the output of the forward
/// operator `calc` was generated for.
///
/// The last `shift` dimensions, given by `calc`'s attribute of that name,
/// are not compared.
fn gradient_needs_no_sum(
    graph: &Graph,
    engine: &SymbolEngine,
    calc: NodeId,
    input_index: usize,
) -> bool {
    let Some(calc_prim) = graph.primitive_of(calc) else {
        return false;
    };
    let Some(forward_id) = calc_prim.attr(prim::ATTR_FORWARD_UNIQUE_ID) else {
        return false;
    };
    let shift = calc_prim.int_attr("shift").unwrap_or(0).max(0) as usize;
    let Some(&input) = graph.node(calc).inputs().and_then(|i| i.get(input_index)) else {
        return false;
    };

    // The input is either the operand or its shape.
    let operand = if graph.is_primitive_apply(input, "Shape") {
        graph
            .node(input)
            .inputs()
            .and_then(|i| i.get(1))
            .copied()
            .unwrap_or(input)
    } else {
        input
    };
    let forward = graph.users(operand).into_iter().find(|&user| {
        graph
            .primitive_of(user)
            .and_then(|p| p.attr(prim::ATTR_UNIQUE_ID))
            == Some(forward_id)
    });
    let Some(forward) = forward else {
        return false;
    };

    let (Some(input_shape), Some(output_shape)) = (
        engine.symbolic_shape(graph, operand),
        engine.symbolic_shape(graph, forward),
    ) else {
        return false;
    };
    trailing_dims_equal(engine.symbols(), input_shape, output_shape, shift)
}

/// Return true if the dimensions of `input` equal the aligned trailing
/// dimensions of `output`, excluding the last `shift`.
///
/// `input` must have at least the rank of `output`.
fn trailing_dims_equal(
    table: &SymbolTable,
    input: SymbolId,
    output: SymbolId,
    shift: usize,
) -> bool {
    let (Some(input), Some(output)) = (table.elements(input), table.elements(output)) else {
        return false;
    };
    if input.len() < output.len() {
        return false;
    }
    (shift + 1..=input.len()).all(|i| {
        i > output.len() || table.equals(input[input.len() - i], output[output.len() - i])
    })
}
