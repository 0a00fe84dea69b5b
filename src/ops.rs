//! Built-in [`OperationBuilder`](crate::OperationBuilder)s.

use symshape_symbols::{SymbolId, SymbolTable};

use crate::op_registry::{BuildError, OpRegistry};

mod array;
mod control_flow;
mod math;
mod shape_calc;

pub use array::{Concat, Depend, MakeTuple, Reshape, Shape, TupleGetItem, UpdateState};
pub use control_flow::{ControlFlowJoin, JFuncCaller};
pub use math::{ArithOp, BinaryElementwise, Reduce, ScalarBinary, UnaryElementwise, UnaryValue};
pub use shape_calc::{ShapeCalc, ShapeFunctor};

/// Return the elements of a list symbol with known length.
fn known_elements(
    table: &SymbolTable,
    id: SymbolId,
    index: usize,
) -> Result<Vec<SymbolId>, BuildError> {
    table
        .elements(id)
        .map(|e| e.to_vec())
        .ok_or(BuildError::InvalidInput {
            index,
            reason: "rank is unknown",
        })
}

/// Resolve a possibly negative axis against a rank.
fn resolve_axis(axis: i64, rank: usize, index: usize) -> Result<usize, BuildError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(BuildError::InvalidInput {
            index,
            reason: "axis out of range",
        });
    }
    Ok(resolved as usize)
}

/// Register builders for all built-in operators.
pub(crate) fn register_all(reg: &mut OpRegistry) {
    macro_rules! register_op {
        ($name:literal, $builder:expr) => {
            reg.register($name, $builder)
        };
    }

    register_op!("Shape", Shape);
    register_op!("TensorShape", Shape);
    register_op!("Reshape", Reshape);
    register_op!("TupleGetItem", TupleGetItem);
    register_op!("MakeTuple", MakeTuple);
    register_op!("Concat", Concat);
    register_op!("Depend", Depend);
    register_op!("Load", Depend);
    register_op!("UpdateState", UpdateState);

    register_op!("ScalarAdd", ScalarBinary(ArithOp::Add));
    register_op!("ScalarSub", ScalarBinary(ArithOp::Sub));
    register_op!("ScalarMul", ScalarBinary(ArithOp::Mul));
    register_op!("ScalarFloorDiv", ScalarBinary(ArithOp::FloorDiv));
    register_op!("ScalarMax", ScalarBinary(ArithOp::Max));
    register_op!("ScalarMin", ScalarBinary(ArithOp::Min));

    register_op!("Add", BinaryElementwise::with_value(ArithOp::Add));
    register_op!("Sub", BinaryElementwise::with_value(ArithOp::Sub));
    register_op!("Mul", BinaryElementwise::with_value(ArithOp::Mul));
    register_op!("FloorDiv", BinaryElementwise::with_value(ArithOp::FloorDiv));
    register_op!("Maximum", BinaryElementwise::with_value(ArithOp::Max));
    register_op!("Minimum", BinaryElementwise::with_value(ArithOp::Min));
    register_op!("Div", BinaryElementwise::shape_only());
    register_op!("RealDiv", BinaryElementwise::shape_only());
    register_op!("Pow", BinaryElementwise::shape_only());
    register_op!("Equal", BinaryElementwise::shape_only());
    register_op!("NotEqual", BinaryElementwise::shape_only());
    register_op!("Less", BinaryElementwise::shape_only());
    register_op!("LessEqual", BinaryElementwise::shape_only());
    register_op!("Greater", BinaryElementwise::shape_only());
    register_op!("GreaterEqual", BinaryElementwise::shape_only());
    register_op!("LogicalAnd", BinaryElementwise::shape_only());
    register_op!("LogicalOr", BinaryElementwise::shape_only());

    register_op!("Neg", UnaryElementwise(UnaryValue::Negate));
    register_op!("Cast", UnaryElementwise(UnaryValue::Identity));
    register_op!("Identity", UnaryElementwise(UnaryValue::Identity));
    register_op!("StopGradient", UnaryElementwise(UnaryValue::Identity));
    register_op!("Abs", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Exp", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Log", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Sqrt", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Square", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Relu", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Sigmoid", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("Tanh", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("ZerosLike", UnaryElementwise(UnaryValue::Unsupported));
    register_op!("OnesLike", UnaryElementwise(UnaryValue::Unsupported));

    register_op!("ReduceSum", Reduce);
    register_op!("ReduceMax", Reduce);
    register_op!("ReduceMin", Reduce);
    register_op!("ReduceMean", Reduce);
    register_op!("ReduceProd", Reduce);

    register_op!("ShapeCalc", ShapeCalc::from_attrs());
    register_op!(
        "BroadcastGradientArgs",
        ShapeCalc::with_functor(ShapeFunctor::BroadcastGradientArgs)
    );

    register_op!("ControlFlowJoin", ControlFlowJoin);
    register_op!("JFuncCaller", JFuncCaller);
}
