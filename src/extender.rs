//! Fusion of value-dependent shape computations into kernel packets.
//!
//! Shape computations which depend on the values of other nodes, such as
//! `Reshape(x, MakeTuple(TupleGetItem(Shape(y), 0)))`, would otherwise run as
//! many tiny kernels. [`ShapeClusterExtender`] finds such clusters, checks
//! that symbolic inference supports them and replaces each one with a call of
//! a fused function.

use log::{debug, info};
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::engine::SymbolEngine;
use crate::graph::{CallKind, FunctionId, Graph, Include, NodeId, Successors};
use crate::op_registry::OpRegistry;
use crate::value::{prim, Primitive};

/// Errors reported by [`convert_call_to_prim`].
#[derive(Debug, Error, PartialEq)]
pub enum ExtendError {
    #[error("node {0} is not a call of a kernel packet function")]
    NotKernelPacketCall(String),
}

/// Options for [`ShapeClusterExtender`].
#[derive(Clone, Debug)]
pub struct ExtenderOptions {
    /// Minimum number of nodes in a cluster, including the node which
    /// consumes the computed shape.
    pub min_cluster_size: usize,
}

impl Default for ExtenderOptions {
    fn default() -> Self {
        ExtenderOptions {
            min_cluster_size: 2,
        }
    }
}

/// A cluster which was replaced by a call of a fused function.
#[derive(Clone, Debug, PartialEq)]
pub struct FusedCluster {
    /// The node whose shape depends on the cluster. This is the output of
    /// the fused function.
    pub begin: NodeId,

    /// Nodes of the cluster in execution order, ending with `begin`.
    pub nodes: Vec<NodeId>,

    /// The fused function, tagged as a kernel packet.
    pub function: FunctionId,

    /// Call of `function` which replaced `begin`.
    pub call: NodeId,
}

/// Finds clusters of value-dependent shape computations and fuses them.
pub struct ShapeClusterExtender<'a> {
    registry: &'a OpRegistry,
    options: ExtenderOptions,
}

impl<'a> ShapeClusterExtender<'a> {
    pub fn new(registry: &'a OpRegistry) -> Self {
        Self::with_options(registry, ExtenderOptions::default())
    }

    pub fn with_options(registry: &'a OpRegistry, options: ExtenderOptions) -> Self {
        ShapeClusterExtender { registry, options }
    }

    /// Fuse clusters in the functions covered by `engine`, which must have
    /// been built for `root`.
    ///
    /// Clusters which cannot be fused are skipped. If any cluster is fused,
    /// nodes and functions which are no longer reachable from `root` are
    /// removed.
    pub fn run(
        &self,
        graph: &mut Graph,
        root: FunctionId,
        engine: &SymbolEngine,
    ) -> Vec<FusedCluster> {
        let mut fused = Vec::new();

        // Nodes of clusters fused so far. These are dead until the graph is
        // garbage collected.
        let mut removed = FxHashSet::default();

        for &function in engine.functions() {
            if graph.get_function(function).is_none() {
                continue;
            }
            for node in graph.apply_nodes(function) {
                if removed.contains(&node) || !is_begin_op(graph, engine, node) {
                    continue;
                }
                let Some(cluster) = self.try_fuse(graph, engine, node, &removed) else {
                    continue;
                };
                removed.extend(cluster.nodes.iter().copied());
                fused.push(cluster);
            }
        }

        if !fused.is_empty() {
            let n_removed = graph.collect_garbage(root);
            debug!("Removed {} nodes after fusing shape clusters", n_removed);
        }
        fused
    }

    fn try_fuse(
        &self,
        graph: &mut Graph,
        engine: &SymbolEngine,
        begin: NodeId,
        removed: &FxHashSet<NodeId>,
    ) -> Option<FusedCluster> {
        let name = graph.node_name(begin);
        let nodes = find_nodes_depend_on_value(graph, engine, begin);
        if nodes.len() < self.options.min_cluster_size {
            debug!(
                "Cluster for {} has {} nodes, which is too few to fuse",
                name,
                nodes.len()
            );
            return None;
        }

        if let Some(used) = find_node_used_outside_cluster(graph, &nodes, begin, removed) {
            debug!(
                "Not fusing cluster for {} as {} is used outside it",
                name,
                graph.node_name(used)
            );
            return None;
        }

        let mut extracted = match graph.extract(&nodes, begin, &format!("{}_packet", name)) {
            Ok(extracted) => extracted,
            Err(err) => {
                debug!("Failed to extract cluster for {}: {}", name, err);
                return None;
            }
        };

        // Check that the cluster supports inference using a disposable engine
        // which only sees the extracted graph.
        let supported =
            SymbolEngine::build(&mut extracted.graph, extracted.function, self.registry)
                .is_ok_and(|built| built.support_infer());
        if !supported {
            debug!(
                "Not fusing cluster for {} as it does not support symbolic inference",
                name
            );
            return None;
        }

        let owner = graph.node(begin).function();
        let function = graph.import_function(extracted.graph, extracted.function);
        graph.function_mut(function).set_kernel_packet(true);
        let abs = graph.node(begin).abstract_value().clone();
        let call = graph.add_call(owner, function, &extracted.inputs, abs);
        graph.transplant_kernel_info(begin, call);
        graph.replace(begin, call);

        info!(
            "Fused {} nodes into kernel packet {}",
            nodes.len(),
            graph.function(function).name()
        );

        Some(FusedCluster {
            begin,
            nodes,
            function,
            call,
        })
    }
}

/// Return true if `node` consumes a shape which may be computed from values.
///
/// The node must apply a plain primitive and have a dynamic shape with a
/// known rank.
fn is_begin_op(graph: &Graph, engine: &SymbolEngine, node: NodeId) -> bool {
    let Some(prim) = graph.primitive_of(node) else {
        return false;
    };
    if prim.name() == prim::KERNEL_PACKET || !engine.is_depend_shape(node) {
        return false;
    }
    let shape = graph.node(node).abstract_value().shape();
    shape.is_dynamic() && !shape.is_dynamic_rank()
}

/// Return true if `node` can be part of a cluster in `function`.
fn can_cluster(graph: &Graph, engine: &SymbolEngine, function: FunctionId, node: NodeId) -> bool {
    graph.node(node).function() == function
        && graph
            .primitive_of(node)
            .is_some_and(|p| p.name() != prim::UPDATE_STATE && p.name() != prim::KERNEL_PACKET)
        && engine.is_depend_value(node)
}

/// Collect `begin` and the value-dependent nodes which it transitively
/// depends on, in execution order.
///
/// The walk does not cross `UpdateState` nodes. Nodes which precede an
/// `UpdateState` input of the cluster are excluded, so that side effects
/// ordered by the state stay outside the fused function.
fn find_nodes_depend_on_value(graph: &Graph, engine: &SymbolEngine, begin: NodeId) -> Vec<NodeId> {
    let function = graph.node(begin).function();
    let walked = graph.topo_sort(&[begin], Successors::Incoming, |id| {
        if id == begin || can_cluster(graph, engine, function, id) {
            Include::Follow
        } else {
            Include::Exclude
        }
    });

    let states: Vec<NodeId> = walked
        .iter()
        .filter_map(|&id| graph.node(id).inputs())
        .flatten()
        .copied()
        .filter(|&input| graph.is_primitive_apply(input, prim::UPDATE_STATE))
        .collect();
    if states.is_empty() {
        return walked;
    }

    let black_set: FxHashSet<NodeId> = graph
        .topo_sort(&states, Successors::Incoming, |id| {
            if graph.node(id).function() == function {
                Include::Follow
            } else {
                Include::Exclude
            }
        })
        .into_iter()
        .collect();
    walked
        .into_iter()
        .filter(|id| *id == begin || !black_set.contains(id))
        .collect()
}

/// Find a node of a cluster, other than its output, whose result is used
/// outside the cluster.
fn find_node_used_outside_cluster(
    graph: &Graph,
    nodes: &[NodeId],
    output: NodeId,
    removed: &FxHashSet<NodeId>,
) -> Option<NodeId> {
    nodes.iter().copied().find(|&id| {
        id != output
            && (graph.is_function_output(id)
                || graph
                    .users(id)
                    .into_iter()
                    .any(|user| !nodes.contains(&user) && !removed.contains(&user)))
    })
}

/// Replace a call of a kernel packet function with an application of the
/// `KernelPacket` primitive, carrying the function as an attribute.
///
/// Kernel info of the call is moved to the new node. Returns the new node.
pub fn convert_call_to_prim(graph: &mut Graph, call: NodeId) -> Result<NodeId, ExtendError> {
    let Some(called) = graph
        .called_function(call)
        .filter(|called| called.kind == CallKind::Call)
        .filter(|called| graph.function(called.function).is_kernel_packet())
    else {
        return Err(ExtendError::NotKernelPacketCall(graph.node_name(call)));
    };

    let args = graph.call_args(call, &called);
    let node = graph.node(call);
    let (owner, abs) = (node.function(), node.abstract_value().clone());
    let prim = Primitive::new(prim::KERNEL_PACKET).with_attr(prim::ATTR_FUNC_GRAPH, called.function);
    let packet = graph.add_primitive_apply(owner, prim, &args, abs);
    graph.transplant_kernel_info(call, packet);
    graph.replace(call, packet);

    debug!(
        "Converted call {} of {} to {}",
        graph.node_name(call),
        graph.function(called.function).name(),
        graph.node_name(packet)
    );
    Ok(packet)
}

#[cfg(test)]
mod tests;
