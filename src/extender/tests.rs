use symshape_symbols::SymValue;

use super::{convert_call_to_prim, ExtendError, ExtenderOptions, ShapeClusterExtender};
use crate::abstract_value::{AbstractValue, DataType, Shape};
use crate::dims;
use crate::engine::SymbolEngine;
use crate::graph::{assert_same_graph, CallKind, FunctionBuilder, FunctionId, Graph, KernelInfo, NodeId};
use crate::op_registry::OpRegistry;
use crate::value::prim;
use crate::Dimension;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn float(dims: Vec<Dimension>) -> AbstractValue {
    AbstractValue::tensor(DataType::Float32, dims)
}

fn int(dims: Vec<Dimension>) -> AbstractValue {
    AbstractValue::tensor(DataType::Int64, dims)
}

fn int_scalar() -> AbstractValue {
    AbstractValue::scalar(DataType::Int64)
}

/// Nodes of a graph computing `Reshape(z, MakeTuple(middle(Shape(x))))`.
struct ReshapeGraph {
    graph: Graph,
    main: FunctionId,
    shape: NodeId,
    middle: NodeId,
    target: NodeId,
    reshape: NodeId,
}

/// Build a graph where the target shape of a `Reshape` is computed from the
/// shape of another input. `middle_op` extracts the first dimension.
fn reshape_graph(middle_op: &str) -> ReshapeGraph {
    let mut graph = Graph::new();
    let mut main = FunctionBuilder::new(&mut graph, "main");
    let x = main.param("x", float(dims![?, 4]));
    let z = main.param("z", float(dims![?]));
    let shape = main.op("Shape", &[x], int(dims![2]));
    let index = main.constant(0i64);
    let middle = main.op(middle_op, &[shape, index], int_scalar());
    let target = main.op(
        "MakeTuple",
        &[middle],
        AbstractValue::tuple(vec![int_scalar()]),
    );
    let reshape = main.op("Reshape", &[z, target], float(dims![?]));
    let main = main.output(reshape);
    ReshapeGraph {
        graph,
        main,
        shape,
        middle,
        target,
        reshape,
    }
}

#[test]
fn test_fuse_value_dependent_cluster() {
    init_logging();

    let ReshapeGraph {
        mut graph,
        main,
        shape,
        middle,
        target,
        reshape,
    } = reshape_graph(prim::TUPLE_GET_ITEM);
    let kernel_info = KernelInfo {
        kernel_name: "Reshape".to_string(),
        backend: "cpu".to_string(),
        formats: vec!["default".to_string()],
    };
    graph
        .node_mut(reshape)
        .set_kernel_info(Some(kernel_info.clone()));

    let registry = OpRegistry::with_all_ops();
    let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    let fused = ShapeClusterExtender::new(&registry).run(&mut graph, main, &engine);

    assert_eq!(fused.len(), 1);
    let cluster = &fused[0];
    assert_eq!(cluster.begin, reshape);
    assert_eq!(cluster.nodes, [shape, middle, target, reshape]);

    // The call replaces the `Reshape` and the cluster's nodes are removed.
    assert_eq!(graph.function(main).output(), Some(cluster.call));
    let called = graph.called_function(cluster.call).unwrap();
    assert_eq!(called.kind, CallKind::Call);
    assert_eq!(called.function, cluster.function);
    assert!(graph.function(cluster.function).is_kernel_packet());
    assert_eq!(graph.apply_nodes(cluster.function).len(), 4);
    assert_eq!(graph.function(cluster.function).params().len(), 2);
    for node in &cluster.nodes {
        assert!(graph.get_node(*node).is_none());
    }
    assert_eq!(graph.node(cluster.call).kernel_info(), Some(&kernel_info));
    assert_eq!(
        graph.node(cluster.call).abstract_value().shape(),
        &Shape::Tensor(dims![?])
    );

    // Calls are converted to the `KernelPacket` primitive once kernels have
    // been selected.
    let packet = convert_call_to_prim(&mut graph, cluster.call).unwrap();
    assert!(graph.is_primitive_apply(packet, prim::KERNEL_PACKET));
    assert_eq!(graph.function(main).output(), Some(packet));
    assert_eq!(graph.node(packet).kernel_info(), Some(&kernel_info));
    let called = graph.called_function(packet).unwrap();
    assert_eq!(called.kind, CallKind::KernelPacket);
    assert_eq!(called.function, cluster.function);

    // The fused graph still supports symbolic inference.
    let x = graph.function(main).params()[0];
    let mut engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    assert!(engine.is_depend_shape(x));
    assert!(engine.support_infer());
    engine
        .infer(&graph, &[float(dims![3, 4]), float(dims![3])])
        .unwrap();
    assert_eq!(engine.query_shape(&graph, packet), Some(SymValue::ints(&[3])));
}

#[test]
fn test_unsupported_cluster_is_not_fused() {
    let ReshapeGraph {
        mut graph, main, ..
    } = reshape_graph("CustomGetItem");

    let registry = OpRegistry::with_all_ops();
    let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    assert!(!engine.support_infer());
    let before = graph.clone();

    let fused = ShapeClusterExtender::new(&registry).run(&mut graph, main, &engine);
    assert!(fused.is_empty());
    assert_same_graph(&graph, &before);
}

#[test]
fn test_min_cluster_size() {
    let ReshapeGraph {
        mut graph, main, ..
    } = reshape_graph(prim::TUPLE_GET_ITEM);

    let registry = OpRegistry::with_all_ops();
    let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    let before = graph.clone();

    let options = ExtenderOptions {
        min_cluster_size: 5,
    };
    let fused = ShapeClusterExtender::with_options(&registry, options).run(&mut graph, main, &engine);
    assert!(fused.is_empty());
    assert_same_graph(&graph, &before);
}

#[test]
fn test_single_node_is_not_fused() {
    let mut graph = Graph::new();
    let mut main = FunctionBuilder::new(&mut graph, "main");
    let z = main.param("z", float(dims![?]));
    let target = main.param("target", int(dims![2]));
    let reshape = main.op("Reshape", &[z, target], float(dims![?, ?]));
    let main = main.output(reshape);

    let registry = OpRegistry::with_all_ops();
    let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    let before = graph.clone();

    let fused = ShapeClusterExtender::new(&registry).run(&mut graph, main, &engine);
    assert!(fused.is_empty());
    assert_same_graph(&graph, &before);
}

#[test]
fn test_intermediate_used_outside_cluster() {
    let mut graph = Graph::new();
    let mut main = FunctionBuilder::new(&mut graph, "main");
    let x = main.param("x", float(dims![?, 4]));
    let z = main.param("z", float(dims![?]));
    let shape = main.op("Shape", &[x], int(dims![2]));
    let index = main.constant(0i64);
    let size = main.op(prim::TUPLE_GET_ITEM, &[shape, index], int_scalar());
    let target = main.op(
        "MakeTuple",
        &[size],
        AbstractValue::tuple(vec![int_scalar()]),
    );
    let reshape = main.op("Reshape", &[z, target], float(dims![?]));
    let output = main.op(
        "MakeTuple",
        &[reshape, size],
        AbstractValue::tuple(vec![float(dims![?]), int_scalar()]),
    );
    let main = main.output(output);

    let registry = OpRegistry::with_all_ops();
    let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    let before = graph.clone();

    let fused = ShapeClusterExtender::new(&registry).run(&mut graph, main, &engine);
    assert!(fused.is_empty());
    assert_same_graph(&graph, &before);
}

#[test]
fn test_update_state_is_not_crossed() {
    let mut graph = Graph::new();
    let mut main = FunctionBuilder::new(&mut graph, "main");
    let x = main.param("x", float(dims![?, 4]));
    let z = main.param("z", float(dims![?]));
    let u = main.param("u", AbstractValue::monad());
    let shape = main.op("Shape", &[x], int(dims![2]));
    let state = main.op(prim::UPDATE_STATE, &[u, shape], AbstractValue::monad());
    let loaded = main.op("Load", &[shape, state], int(dims![2]));
    let index = main.constant(0i64);
    let size = main.op(prim::TUPLE_GET_ITEM, &[loaded, index], int_scalar());
    let target = main.op(
        "MakeTuple",
        &[size],
        AbstractValue::tuple(vec![int_scalar()]),
    );
    let reshape = main.op("Reshape", &[z, target], float(dims![?]));
    let main = main.output(reshape);

    let registry = OpRegistry::with_all_ops();
    let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
    assert!(engine.is_depend_value(shape));

    let fused = ShapeClusterExtender::new(&registry).run(&mut graph, main, &engine);
    assert_eq!(fused.len(), 1);
    let cluster = &fused[0];
    assert_eq!(cluster.nodes, [loaded, size, target, reshape]);

    // Nodes ordered before the state stay in the main function and are
    // passed to the fused function.
    assert!(graph.get_node(shape).is_some());
    assert!(graph.get_node(state).is_some());
    let called = graph.called_function(cluster.call).unwrap();
    let args = graph.call_args(cluster.call, &called);
    assert_eq!(args, [shape, state, z]);
}

#[test]
fn test_convert_requires_kernel_packet_call() {
    let mut graph = Graph::new();
    let mut inner = FunctionBuilder::new(&mut graph, "inner");
    let p = inner.param("p", float(dims![?]));
    let inner = inner.output(p);

    let mut main = FunctionBuilder::new(&mut graph, "main");
    let x = main.param("x", float(dims![?]));
    let call = main.call(inner, &[x], float(dims![?]));
    main.output(call);

    assert_eq!(
        convert_call_to_prim(&mut graph, call),
        Err(ExtendError::NotKernelPacketCall(graph.node_name(call)))
    );

    graph.function_mut(inner).set_kernel_packet(true);
    let packet = convert_call_to_prim(&mut graph, call).unwrap();
    assert_eq!(graph.node(packet).inputs().map(|i| &i[1..]), Some(&[x][..]));
}
