//! symshape builds symbolic shapes and values for computation graphs whose
//! tensors have dynamic dimensions.
//!
//! # Overview
//!
//! The workflow for analyzing a graph is:
//!
//! 1. Construct a [`Graph`], for example using [`FunctionBuilder`]. Each node
//!    has an [`AbstractValue`] describing its type and compile-time shape,
//!    where dimensions may be unknown.
//! 2. Build a [`SymbolEngine`] for the graph's root function, using an
//!    [`OpRegistry`] of [`OperationBuilder`]s which know how each operator
//!    computes its output shape and value. Afterwards each node's abstract
//!    refers to symbols in the engine's symbol table.
//! 3. Use the symbols to compare shapes symbolically, or call
//!    [`SymbolEngine::infer`] to resolve them for concrete input shapes.
//!
//! The symbols also drive graph transformations:
//!
//! - [`ShapeClusterExtender`] fuses shape computations which depend on the
//!   values of other nodes into kernel packets.
//! - [`ShapeOptimizer`] removes operators which do not change shapes,
//!   drops gradient sums over broadcast axes which are always empty and
//!   folds shape inputs with known values into constants.
//!
//! ```
//! use symshape::{dims, AbstractValue, DataType, FunctionBuilder, Graph, OpRegistry, SymbolEngine};
//!
//! let mut graph = Graph::new();
//! let mut main = FunctionBuilder::new(&mut graph, "main");
//! let x = main.param("x", AbstractValue::tensor(DataType::Float32, dims![?, 4]));
//! let shape = main.op("Shape", &[x], AbstractValue::tensor(DataType::Int64, dims![2]));
//! let y = main.op("Reshape", &[x, shape], AbstractValue::tensor(DataType::Float32, dims![?, 4]));
//! let main = main.output(y);
//!
//! let registry = OpRegistry::with_all_ops();
//! let engine = SymbolEngine::build(&mut graph, main, &registry).unwrap();
//!
//! let x_shape = engine.symbolic_shape(&graph, x).unwrap();
//! let y_shape = engine.symbolic_shape(&graph, y).unwrap();
//! assert!(engine.symbols().equals(x_shape, y_shape));
//! ```

mod abstract_value;
mod engine;
mod extender;
pub mod graph;
mod op_registry;
pub mod ops;
mod optimize;
mod value;

pub use abstract_value::{AbstractValue, DataType, Dimension, Shape};
pub use engine::{
    build_symbol_engine, clean_symbols, BuildOptions, BuildState, DependStatus, EngineError,
    InferError, SpecialNode, SymbolEngine,
};
pub use extender::{
    convert_call_to_prim, ExtendError, ExtenderOptions, FusedCluster, ShapeClusterExtender,
};
pub use graph::{FunctionBuilder, FunctionId, Graph, NodeId};
pub use op_registry::{BuildContext, BuildError, DependOn, OpRegistry, OperationBuilder};
pub use optimize::{DiagnosticLevel, Diagnostics, ShapeOptimizer};
pub use value::{prim, Primitive, Value};

// Symbol types appear in the public API of the engine and builders.
pub use symshape_symbols::{SymValue, SymbolError, SymbolId, SymbolKind, SymbolTable};
